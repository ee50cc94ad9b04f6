//! Randomized buffer edits checked against a naive `Text` model, with live
//! snapshots being read from worker threads while the writer keeps going.
//!
//! Run a longer soak with:
//! `cargo test --test buffer_random -- --ignored`

use std::thread;

use layertext::{Point, Range, Snapshot, Text, TextBuffer, TextSlice};
use rand::prelude::*;

const CR: u16 = b'\r' as u16;
const LF: u16 = b'\n' as u16;

fn random_text(rng: &mut SmallRng, max_units: u32) -> Text {
    let count = rng.gen_range(0..=max_units);
    let mut content = Vec::new();
    let mut i = 0;
    while i < count {
        if rng.gen_ratio(1, 12) {
            content.push(LF);
        } else if rng.gen_ratio(1, 12) {
            content.push(CR);
            content.push(LF);
            i += 1;
        } else if rng.gen_ratio(1, 12) {
            content.push(CR);
        } else {
            content.push(rng.gen_range(b'a'..=b'z') as u16);
        }
        i += 1;
    }
    Text::from_units(content)
}

fn random_range(rng: &mut SmallRng, text: &Text) -> Range {
    let extent = text.extent();
    let start_row = rng.gen_range(0..=extent.row);
    let line_length = text.line_length_for_row(start_row);
    let start_column = if line_length == 0 { 0 } else { rng.gen_range(0..=line_length) };
    let start = Point::new(start_row, start_column);
    let mut end = start;
    while rng.gen_ratio(3, 10) {
        let step = Point::new(rng.gen_range(0..2), rng.gen_range(0..8));
        end = text.clip_position(end.traverse(step)).position;
    }
    Range::new(start, end)
}

fn spawn_snapshot_reader(snapshot: Snapshot, expected: Text) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for _ in 0..3 {
            assert_eq!(snapshot.text(), expected);
            assert_eq!(snapshot.extent(), expected.extent());
            assert_eq!(snapshot.size(), expected.size());
            for row in 0..expected.extent().row + 1 {
                assert_eq!(
                    snapshot.line_length_for_row(row),
                    expected.line_length_for_row(row),
                    "row {}",
                    row
                );
            }
        }
    })
}

fn run_random_edits(seed: u64, iterations: usize) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let base = random_text(&mut rng, 200);
    let mut model = base.clone();
    let mut buffer = TextBuffer::from(base);
    let mut readers: Vec<thread::JoinHandle<()>> = Vec::new();

    for _ in 0..iterations {
        if rng.gen_ratio(1, 3) {
            let snapshot = buffer.create_snapshot();
            readers.push(spawn_snapshot_reader(snapshot, model.clone()));
        }

        let deleted_range = random_range(&mut rng, &model);
        let inserted = random_text(&mut rng, 20);
        model.splice(deleted_range.start, deleted_range.extent(), TextSlice::from(&inserted));
        buffer.set_text_in_range(deleted_range, inserted);

        assert_eq!(buffer.extent(), model.extent(), "seed {}", seed);
        assert_eq!(buffer.size(), model.size(), "seed {}", seed);
        assert_eq!(buffer.text(), model, "seed {}", seed);

        for _ in 0..4 {
            let query_range = random_range(&mut rng, &model);
            assert_eq!(
                buffer.text_in_range(query_range),
                TextSlice::from(&model).slice(query_range).to_text(),
                "seed {} range {:?}",
                seed,
                query_range
            );
            let clipped = buffer.clip_position(query_range.start);
            assert_eq!(
                buffer.position_for_offset(clipped.offset),
                clipped.position,
                "seed {}",
                seed
            );
        }

        if rng.gen_ratio(1, 4) && !readers.is_empty() {
            let index = rng.gen_range(0..readers.len());
            readers.swap_remove(index).join().unwrap();
        }
    }

    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn random_edits_with_concurrent_snapshot_readers() {
    for seed in 0..25 {
        run_random_edits(seed, 12);
    }
}

#[test]
#[ignore]
fn random_edits_soak() {
    for seed in 0..500 {
        run_random_edits(seed, 30);
    }
}
