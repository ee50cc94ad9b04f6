//! Randomized marker-index operations checked against brute force over the
//! index's own dump: the treap's spanning sets and rotations have to agree
//! with a flat scan of every marker range.

use std::collections::HashMap;

use layertext::{MarkerId, MarkerIndex, Point, Range};
use rand::prelude::*;

fn random_point(rng: &mut SmallRng) -> Point {
    Point::new(rng.gen_range(0..12), rng.gen_range(0..20))
}

fn random_ordered_pair(rng: &mut SmallRng) -> (Point, Point) {
    let a = random_point(rng);
    let b = random_point(rng);
    if b < a {
        (b, a)
    } else {
        (a, b)
    }
}

fn contains(range: &Range, point: Point) -> bool {
    range.start <= point && point <= range.end
}

fn intersects(range: &Range, start: Point, end: Point) -> bool {
    range.start <= end && start <= range.end
}

fn check_queries(index: &MarkerIndex, dump: &HashMap<MarkerId, Range>, rng: &mut SmallRng) {
    let (start, end) = random_ordered_pair(rng);

    let expected: Vec<MarkerId> = {
        let mut ids: Vec<MarkerId> = dump
            .iter()
            .filter(|(_, range)| intersects(range, start, end))
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    };
    let actual: Vec<MarkerId> = index.find_intersecting(start, end).into_iter().collect();
    assert_eq!(actual, expected, "find_intersecting({:?}, {:?})", start, end);

    let expected: Vec<MarkerId> = {
        let mut ids: Vec<MarkerId> = dump
            .iter()
            .filter(|(_, range)| contains(range, start) && contains(range, end))
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    };
    let actual: Vec<MarkerId> = index.find_containing(start, end).into_iter().collect();
    assert_eq!(actual, expected, "find_containing({:?}, {:?})", start, end);

    let expected: Vec<MarkerId> = {
        let mut ids: Vec<MarkerId> = dump
            .iter()
            .filter(|(_, range)| start <= range.start && range.end <= end)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    };
    let actual: Vec<MarkerId> = index.find_contained_in(start, end).into_iter().collect();
    assert_eq!(actual, expected, "find_contained_in({:?}, {:?})", start, end);

    let expected: Vec<MarkerId> = {
        let mut ids: Vec<MarkerId> = dump
            .iter()
            .filter(|(_, range)| start <= range.start && range.start <= end)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    };
    let actual: Vec<MarkerId> = index.find_starting_in(start, end).into_iter().collect();
    assert_eq!(actual, expected, "find_starting_in({:?}, {:?})", start, end);

    let expected: Vec<MarkerId> = {
        let mut ids: Vec<MarkerId> = dump
            .iter()
            .filter(|(_, range)| start <= range.end && range.end <= end)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    };
    let actual: Vec<MarkerId> = index.find_ending_in(start, end).into_iter().collect();
    assert_eq!(actual, expected, "find_ending_in({:?}, {:?})", start, end);
}

#[test]
fn random_inserts_removes_and_queries() {
    for seed in 0..60u64 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut index = MarkerIndex::new(seed as u32);
        let mut next_id: MarkerId = 0;
        let mut live: Vec<MarkerId> = Vec::new();

        for _ in 0..40 {
            match rng.gen_range(0..10) {
                0..=5 => {
                    let (start, end) = random_ordered_pair(&mut rng);
                    index.insert(next_id, start, end);
                    if rng.gen_bool(0.3) {
                        index.set_exclusive(next_id, true);
                    }
                    live.push(next_id);
                    next_id += 1;
                }
                6..=7 if !live.is_empty() => {
                    let id = live.swap_remove(rng.gen_range(0..live.len()));
                    index.remove(id);
                }
                _ => {}
            }

            let dump = index.dump();
            assert_eq!(dump.len(), live.len(), "seed {}", seed);
            for id in &live {
                let range = dump[id];
                assert!(range.start <= range.end);
                assert_eq!(index.get_range(*id), range, "seed {}", seed);
            }
            check_queries(&index, &dump, &mut rng);
        }
    }
}

#[test]
fn random_splices_shift_markers_consistently() {
    for seed in 0..60u64 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut index = MarkerIndex::new(seed as u32);

        for id in 0..15u32 {
            let (start, end) = random_ordered_pair(&mut rng);
            index.insert(id, start, end);
        }

        for _ in 0..10 {
            let before = index.dump();
            let start = random_point(&mut rng);
            let old_extent = Point::new(rng.gen_range(0..3), rng.gen_range(0..6));
            let new_extent = Point::new(rng.gen_range(0..3), rng.gen_range(0..6));
            let old_end = start.traverse(old_extent);
            let new_end = start.traverse(new_extent);

            let result = index.splice(start, old_extent, new_extent);
            let after = index.dump();

            assert!(result.overlap.is_superset(&result.surround), "seed {}", seed);
            assert!(result.inside.is_superset(&result.overlap), "seed {}", seed);
            assert!(result.touch.is_superset(&result.inside), "seed {}", seed);

            for (id, range) in &before {
                let relocated = after[id];

                // Endpoints strictly before the splice never move; endpoints
                // strictly beyond the old end shift by the splice delta.
                // Endpoints exactly on a boundary are governed by the
                // inclusive/exclusive rules instead.
                if range.end < start {
                    assert_eq!(relocated, *range, "seed {}", seed);
                }
                if range.start > old_end {
                    let expected_start = new_end.traverse(range.start.traversal(old_end));
                    assert_eq!(relocated.start, expected_start, "seed {}", seed);
                }
                if range.end > old_end {
                    let expected_end = new_end.traverse(range.end.traversal(old_end));
                    assert_eq!(relocated.end, expected_end, "seed {}", seed);
                }

                // Markers the splice never touched must not appear in any
                // invalidation set.
                if range.end < start || range.start > old_end {
                    assert!(!result.touch.contains(id), "seed {}", seed);
                }
            }
        }
    }
}
