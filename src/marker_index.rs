//! A treap over document positions that tracks a population of labelled
//! ranges ("markers"). Each node is a position carrying the ids of markers
//! that start or end there, plus two spanning sets (`left_marker_ids`,
//! `right_marker_ids`) recording markers that cover the node's entire left or
//! right subtree. The spanning sets are what make intersection queries
//! O(log n + k): a descent only has to look at the sets along its path.
//!
//! Rotations rewrite the spanning sets so the invariant survives rebalancing;
//! `splice` relies on this by bubbling two synthetic boundary nodes to the
//! root with sentinel priorities, which leaves the whole spliced region
//! hanging off the lower boundary as a single subtree.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::mem;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::point::Point;
use crate::range::Range;

const NIL: u32 = u32::MAX;

pub type MarkerId = u32;
pub type MarkerIdSet = BTreeSet<MarkerId>;

/// The markers affected by a splice, grouped by how the edit touched them.
/// The sets are nested: `surround ⊆ overlap ⊆ inside ⊆ touch`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SpliceResult {
    pub touch: MarkerIdSet,
    pub inside: MarkerIdSet,
    pub overlap: MarkerIdSet,
    pub surround: MarkerIdSet,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Boundary {
    pub position: Point,
    pub starting: MarkerIdSet,
    pub ending: MarkerIdSet,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BoundaryQueryResult {
    pub containing_start: Vec<MarkerId>,
    pub boundaries: Vec<Boundary>,
}

#[derive(Debug)]
struct Node {
    parent: u32,
    left: u32,
    right: u32,
    // Position of this node relative to its left ancestor.
    left_extent: Point,
    // 0 = not yet assigned; -1/-2 are the splice boundary sentinels and
    // i32::MAX evicts a node to a leaf for deletion.
    priority: i32,
    left_marker_ids: MarkerIdSet,
    right_marker_ids: MarkerIdSet,
    start_marker_ids: MarkerIdSet,
    end_marker_ids: MarkerIdSet,
}

impl Node {
    fn new(parent: u32, left_extent: Point) -> Node {
        Node {
            parent,
            left: NIL,
            right: NIL,
            left_extent,
            priority: 0,
            left_marker_ids: MarkerIdSet::new(),
            right_marker_ids: MarkerIdSet::new(),
            start_marker_ids: MarkerIdSet::new(),
            end_marker_ids: MarkerIdSet::new(),
        }
    }

    fn is_marker_endpoint(&self) -> bool {
        !self.start_marker_ids.is_empty() || !self.end_marker_ids.is_empty()
    }
}

// Walk state: the node id plus the ancestor positions needed to convert
// relative extents into absolute positions on the way down.
struct Cursor {
    node: u32,
    position: Point,
    left_ancestor_position: Point,
    right_ancestor_position: Point,
    left_ancestor_stack: SmallVec<[Point; 16]>,
    right_ancestor_stack: SmallVec<[Point; 16]>,
}

pub struct MarkerIndex {
    nodes: Vec<Node>,
    free: Vec<u32>,
    root: u32,
    rng: SmallRng,
    start_nodes_by_id: HashMap<MarkerId, u32>,
    end_nodes_by_id: HashMap<MarkerId, u32>,
    exclusive_marker_ids: HashSet<MarkerId>,
}

impl MarkerIndex {
    pub fn new(seed: u32) -> MarkerIndex {
        MarkerIndex {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NIL,
            rng: SmallRng::seed_from_u64(seed as u64),
            start_nodes_by_id: HashMap::new(),
            end_nodes_by_id: HashMap::new(),
            exclusive_marker_ids: HashSet::new(),
        }
    }

    /// The treap's priority stream. Exposed so tests can pin the sequence.
    pub fn generate_random_number(&mut self) -> i32 {
        self.rng.gen_range(1..i32::MAX)
    }

    /// Register marker `id` over `[start, end]`. Callers must `remove` an id
    /// before inserting it again.
    pub fn insert(&mut self, id: MarkerId, start: Point, end: Point) {
        let start_node = self.insert_marker_start(id, start, end);
        let end_node = self.insert_marker_end(id, start, end);

        self.nodes[start_node as usize].start_marker_ids.insert(id);
        self.nodes[end_node as usize].end_marker_ids.insert(id);

        if self.nodes[start_node as usize].priority == 0 {
            let priority = self.generate_random_number();
            self.nodes[start_node as usize].priority = priority;
            self.bubble_node_up(start_node);
        }
        if self.nodes[end_node as usize].priority == 0 {
            let priority = self.generate_random_number();
            self.nodes[end_node as usize].priority = priority;
            self.bubble_node_up(end_node);
        }

        self.start_nodes_by_id.insert(id, start_node);
        self.end_nodes_by_id.insert(id, end_node);
    }

    pub fn set_exclusive(&mut self, id: MarkerId, exclusive: bool) {
        if exclusive {
            self.exclusive_marker_ids.insert(id);
        } else {
            self.exclusive_marker_ids.remove(&id);
        }
    }

    pub fn remove(&mut self, id: MarkerId) {
        let (Some(&start_node), Some(&end_node)) =
            (self.start_nodes_by_id.get(&id), self.end_nodes_by_id.get(&id))
        else {
            return;
        };

        let mut node = start_node;
        while node != NIL {
            self.nodes[node as usize].right_marker_ids.remove(&id);
            node = self.nodes[node as usize].parent;
        }
        let mut node = end_node;
        while node != NIL {
            self.nodes[node as usize].left_marker_ids.remove(&id);
            node = self.nodes[node as usize].parent;
        }

        self.nodes[start_node as usize].start_marker_ids.remove(&id);
        self.nodes[end_node as usize].end_marker_ids.remove(&id);

        if !self.nodes[start_node as usize].is_marker_endpoint() {
            self.delete_single_node(start_node);
        }
        if end_node != start_node && !self.nodes[end_node as usize].is_marker_endpoint() {
            self.delete_single_node(end_node);
        }

        self.start_nodes_by_id.remove(&id);
        self.end_nodes_by_id.remove(&id);
    }

    pub fn has(&self, id: MarkerId) -> bool {
        self.start_nodes_by_id.contains_key(&id)
    }

    pub fn get_start(&self, id: MarkerId) -> Point {
        match self.start_nodes_by_id.get(&id) {
            Some(&node) => self.get_node_position(node),
            None => Point::zero(),
        }
    }

    pub fn get_end(&self, id: MarkerId) -> Point {
        match self.end_nodes_by_id.get(&id) {
            Some(&node) => self.get_node_position(node),
            None => Point::zero(),
        }
    }

    pub fn get_range(&self, id: MarkerId) -> Range {
        Range::new(self.get_start(id), self.get_end(id))
    }

    /// Order two markers by start ascending, ties broken by end descending
    /// (outer markers sort first).
    pub fn compare(&self, id1: MarkerId, id2: MarkerId) -> std::cmp::Ordering {
        self.get_start(id1)
            .cmp(&self.get_start(id2))
            .then_with(|| self.get_end(id2).cmp(&self.get_end(id1)))
    }

    /// Relocate every marker endpoint affected by an edit at `start` that
    /// replaced `old_extent` with `new_extent`, and report which markers were
    /// touched and how.
    pub fn splice(&mut self, start: Point, old_extent: Point, new_extent: Point) -> SpliceResult {
        let mut invalidated = SpliceResult::default();
        if self.root == NIL || (old_extent.is_zero() && new_extent.is_zero()) {
            return invalidated;
        }

        let is_insertion = old_extent.is_zero();
        let start_node = self.insert_splice_boundary(start, false);
        let end_node = self.insert_splice_boundary(start.traverse(old_extent), is_insertion);

        self.nodes[start_node as usize].priority = -1;
        self.bubble_node_up(start_node);
        self.nodes[end_node as usize].priority = -2;
        self.bubble_node_up(end_node);

        let mut starting_inside_splice = MarkerIdSet::new();
        let mut ending_inside_splice = MarkerIdSet::new();

        if is_insertion {
            let starting: Vec<MarkerId> =
                self.nodes[start_node as usize].start_marker_ids.iter().copied().collect();
            for id in starting {
                if self.exclusive_marker_ids.contains(&id) {
                    let node = &mut self.nodes[start_node as usize];
                    node.start_marker_ids.remove(&id);
                    node.right_marker_ids.remove(&id);
                    self.nodes[end_node as usize].start_marker_ids.insert(id);
                    self.start_nodes_by_id.insert(id, end_node);
                }
            }
            let ending: Vec<MarkerId> =
                self.nodes[start_node as usize].end_marker_ids.iter().copied().collect();
            for id in ending {
                if !self.exclusive_marker_ids.contains(&id)
                    || self.nodes[end_node as usize].start_marker_ids.contains(&id)
                {
                    self.nodes[start_node as usize].end_marker_ids.remove(&id);
                    if !self.nodes[end_node as usize].start_marker_ids.contains(&id) {
                        self.nodes[start_node as usize].right_marker_ids.insert(id);
                    }
                    self.nodes[end_node as usize].end_marker_ids.insert(id);
                    self.end_nodes_by_id.insert(id, end_node);
                }
            }
        } else {
            let interior = self.nodes[start_node as usize].right;
            self.collect_starting_and_ending_markers(
                interior,
                &mut starting_inside_splice,
                &mut ending_inside_splice,
            );

            for &id in &ending_inside_splice {
                self.nodes[end_node as usize].end_marker_ids.insert(id);
                if !starting_inside_splice.contains(&id) {
                    self.nodes[start_node as usize].right_marker_ids.insert(id);
                }
                self.end_nodes_by_id.insert(id, end_node);
            }

            let ending_at_end: Vec<MarkerId> =
                self.nodes[end_node as usize].end_marker_ids.iter().copied().collect();
            for id in ending_at_end {
                if self.exclusive_marker_ids.contains(&id)
                    && !self.nodes[end_node as usize].start_marker_ids.contains(&id)
                {
                    ending_inside_splice.insert(id);
                }
            }

            for &id in &starting_inside_splice {
                self.nodes[end_node as usize].start_marker_ids.insert(id);
                self.start_nodes_by_id.insert(id, end_node);
            }

            let starting_at_start: Vec<MarkerId> =
                self.nodes[start_node as usize].start_marker_ids.iter().copied().collect();
            for id in starting_at_start {
                if self.exclusive_marker_ids.contains(&id)
                    && !self.nodes[start_node as usize].end_marker_ids.contains(&id)
                {
                    let node = &mut self.nodes[start_node as usize];
                    node.start_marker_ids.remove(&id);
                    node.right_marker_ids.remove(&id);
                    self.nodes[end_node as usize].start_marker_ids.insert(id);
                    self.start_nodes_by_id.insert(id, end_node);
                    starting_inside_splice.insert(id);
                }
            }
        }

        self.populate_splice_invalidation_sets(
            &mut invalidated,
            start_node,
            end_node,
            &starting_inside_splice,
            &ending_inside_splice,
        );

        let interior = self.nodes[start_node as usize].right;
        if interior != NIL {
            self.nodes[start_node as usize].right = NIL;
            self.delete_whole_subtree(interior);
        }

        self.nodes[end_node as usize].left_extent = start.traverse(new_extent);

        if self.nodes[start_node as usize].left_extent
            == self.nodes[end_node as usize].left_extent
        {
            let starting: Vec<MarkerId> =
                self.nodes[end_node as usize].start_marker_ids.iter().copied().collect();
            for id in starting {
                let node = &mut self.nodes[start_node as usize];
                node.start_marker_ids.insert(id);
                node.right_marker_ids.insert(id);
                self.start_nodes_by_id.insert(id, start_node);
            }
            let ending: Vec<MarkerId> =
                self.nodes[end_node as usize].end_marker_ids.iter().copied().collect();
            for id in ending {
                self.nodes[start_node as usize].end_marker_ids.insert(id);
                if self.nodes[end_node as usize].left_marker_ids.contains(&id) {
                    self.nodes[start_node as usize].left_marker_ids.insert(id);
                    self.nodes[end_node as usize].left_marker_ids.remove(&id);
                }
                self.end_nodes_by_id.insert(id, start_node);
            }
            self.delete_single_node(end_node);
        } else if self.nodes[end_node as usize].is_marker_endpoint() {
            self.nodes[end_node as usize].priority = self.generate_random_number();
            self.bubble_node_down(end_node);
        } else {
            self.delete_single_node(end_node);
        }

        if self.nodes[start_node as usize].is_marker_endpoint() {
            self.nodes[start_node as usize].priority = self.generate_random_number();
            self.bubble_node_down(start_node);
        } else {
            self.delete_single_node(start_node);
        }

        invalidated
    }

    pub fn find_intersecting(&self, start: Point, end: Point) -> MarkerIdSet {
        let mut result = MarkerIdSet::new();
        self.find_intersecting_into(start, end, &mut result);
        result
    }

    pub fn find_containing(&self, start: Point, end: Point) -> MarkerIdSet {
        let containing_start = self.find_intersecting(start, start);
        if end == start {
            return containing_start;
        }
        let containing_end = self.find_intersecting(end, end);
        containing_start.intersection(&containing_end).copied().collect()
    }

    pub fn find_contained_in(&self, start: Point, end: Point) -> MarkerIdSet {
        let mut result = MarkerIdSet::new();
        let Some(mut cursor) = self.cursor() else { return result };
        self.seek_to_first_node_greater_than_or_equal_to(&mut cursor, start);

        let mut started = MarkerIdSet::new();
        while cursor.node != NIL && cursor.position <= end {
            let node = &self.nodes[cursor.node as usize];
            started.extend(node.start_marker_ids.iter().copied());
            for id in &node.end_marker_ids {
                if started.contains(id) {
                    result.insert(*id);
                }
            }
            self.move_to_successor(&mut cursor);
        }
        result
    }

    pub fn find_starting_in(&self, start: Point, end: Point) -> MarkerIdSet {
        let mut result = MarkerIdSet::new();
        let Some(mut cursor) = self.cursor() else { return result };
        self.seek_to_first_node_greater_than_or_equal_to(&mut cursor, start);
        while cursor.node != NIL && cursor.position <= end {
            result.extend(self.nodes[cursor.node as usize].start_marker_ids.iter().copied());
            self.move_to_successor(&mut cursor);
        }
        result
    }

    pub fn find_starting_at(&self, position: Point) -> MarkerIdSet {
        self.find_starting_in(position, position)
    }

    pub fn find_ending_in(&self, start: Point, end: Point) -> MarkerIdSet {
        let mut result = MarkerIdSet::new();
        let Some(mut cursor) = self.cursor() else { return result };
        self.seek_to_first_node_greater_than_or_equal_to(&mut cursor, start);
        while cursor.node != NIL && cursor.position <= end {
            result.extend(self.nodes[cursor.node as usize].end_marker_ids.iter().copied());
            self.move_to_successor(&mut cursor);
        }
        result
    }

    pub fn find_ending_at(&self, position: Point) -> MarkerIdSet {
        self.find_ending_in(position, position)
    }

    /// Walk endpoint-carrying positions in order starting from the first one
    /// at or after `start`, returning up to `max_count` of them along with
    /// the markers whose ranges contain `start`.
    pub fn find_boundaries_after(&self, start: Point, max_count: usize) -> BoundaryQueryResult {
        let mut result = BoundaryQueryResult {
            containing_start: self.find_intersecting(start, start).into_iter().collect(),
            boundaries: Vec::new(),
        };

        let Some(mut cursor) = self.cursor() else { return result };
        self.seek_to_first_node_greater_than_or_equal_to(&mut cursor, start);
        while cursor.node != NIL && result.boundaries.len() < max_count {
            let node = &self.nodes[cursor.node as usize];
            if node.is_marker_endpoint() {
                result.boundaries.push(Boundary {
                    position: cursor.position,
                    starting: node.start_marker_ids.clone(),
                    ending: node.end_marker_ids.clone(),
                });
            }
            self.move_to_successor(&mut cursor);
        }
        result
    }

    pub fn dump(&self) -> HashMap<MarkerId, Range> {
        let mut snapshot = HashMap::new();
        let Some(mut cursor) = self.cursor() else { return snapshot };

        while self.nodes[cursor.node as usize].left != NIL {
            self.descend_left(&mut cursor);
        }
        while cursor.node != NIL {
            let node = &self.nodes[cursor.node as usize];
            for &id in &node.start_marker_ids {
                snapshot.insert(id, Range { start: cursor.position, end: cursor.position });
            }
            for &id in &node.end_marker_ids {
                if let Some(range) = snapshot.get_mut(&id) {
                    range.end = cursor.position;
                }
            }
            self.move_to_successor(&mut cursor);
        }
        snapshot
    }

    // --- cursor machinery ---

    fn cursor(&self) -> Option<Cursor> {
        if self.root == NIL {
            return None;
        }
        Some(Cursor {
            node: self.root,
            position: self.nodes[self.root as usize].left_extent,
            left_ancestor_position: Point::zero(),
            right_ancestor_position: Point::max(),
            left_ancestor_stack: SmallVec::new(),
            right_ancestor_stack: SmallVec::new(),
        })
    }

    fn descend_left(&self, cursor: &mut Cursor) {
        cursor.left_ancestor_stack.push(cursor.left_ancestor_position);
        cursor.right_ancestor_stack.push(cursor.right_ancestor_position);

        cursor.right_ancestor_position = cursor.position;
        cursor.node = self.nodes[cursor.node as usize].left;
        cursor.position = cursor
            .left_ancestor_position
            .traverse(self.nodes[cursor.node as usize].left_extent);
    }

    fn descend_right(&self, cursor: &mut Cursor) {
        cursor.left_ancestor_stack.push(cursor.left_ancestor_position);
        cursor.right_ancestor_stack.push(cursor.right_ancestor_position);

        cursor.left_ancestor_position = cursor.position;
        cursor.node = self.nodes[cursor.node as usize].right;
        cursor.position = cursor
            .left_ancestor_position
            .traverse(self.nodes[cursor.node as usize].left_extent);
    }

    fn ascend(&self, cursor: &mut Cursor) {
        let parent = self.nodes[cursor.node as usize].parent;
        if parent != NIL {
            if self.nodes[parent as usize].left == cursor.node {
                cursor.position = cursor.right_ancestor_position;
            } else {
                cursor.position = cursor.left_ancestor_position;
            }
            cursor.left_ancestor_position = cursor.left_ancestor_stack.pop().unwrap_or_default();
            cursor.right_ancestor_position =
                cursor.right_ancestor_stack.pop().unwrap_or(Point::max());
            cursor.node = parent;
        } else {
            cursor.node = NIL;
            cursor.position = Point::zero();
            cursor.left_ancestor_position = Point::zero();
            cursor.right_ancestor_position = Point::max();
        }
    }

    fn move_to_successor(&self, cursor: &mut Cursor) {
        if cursor.node == NIL {
            return;
        }
        if self.nodes[cursor.node as usize].right != NIL {
            self.descend_right(cursor);
            while self.nodes[cursor.node as usize].left != NIL {
                self.descend_left(cursor);
            }
        } else {
            loop {
                let parent = self.nodes[cursor.node as usize].parent;
                if parent != NIL && self.nodes[parent as usize].right == cursor.node {
                    self.ascend(cursor);
                } else {
                    break;
                }
            }
            self.ascend(cursor);
        }
    }

    fn seek_to_first_node_greater_than_or_equal_to(&self, cursor: &mut Cursor, position: Point) {
        loop {
            if position == cursor.position {
                break;
            } else if position < cursor.position {
                if self.nodes[cursor.node as usize].left != NIL {
                    self.descend_left(cursor);
                } else {
                    break;
                }
            } else if self.nodes[cursor.node as usize].right != NIL {
                self.descend_right(cursor);
            } else {
                break;
            }
        }
        if cursor.position < position {
            self.move_to_successor(cursor);
        }
    }

    fn check_intersection(
        &self,
        cursor: &Cursor,
        start: Point,
        end: Point,
        result: &mut MarkerIdSet,
    ) {
        let node = &self.nodes[cursor.node as usize];
        if cursor.left_ancestor_position <= end && start <= cursor.position {
            result.extend(node.left_marker_ids.iter().copied());
        }
        if start <= cursor.position && cursor.position <= end {
            result.extend(node.start_marker_ids.iter().copied());
            result.extend(node.end_marker_ids.iter().copied());
        }
        if cursor.position <= end && start <= cursor.right_ancestor_position {
            result.extend(node.right_marker_ids.iter().copied());
        }
    }

    fn find_intersecting_into(&self, start: Point, end: Point, result: &mut MarkerIdSet) {
        let Some(mut cursor) = self.cursor() else { return };

        loop {
            if start < cursor.position {
                if self.nodes[cursor.node as usize].left != NIL {
                    self.check_intersection(&cursor, start, end, result);
                    self.descend_left(&mut cursor);
                } else {
                    break;
                }
            } else if self.nodes[cursor.node as usize].right != NIL {
                self.check_intersection(&cursor, start, end, result);
                self.descend_right(&mut cursor);
            } else {
                break;
            }
        }

        loop {
            self.check_intersection(&cursor, start, end, result);
            self.move_to_successor(&mut cursor);
            if cursor.node == NIL || cursor.position > end {
                break;
            }
        }
    }

    // --- insertion walks ---

    fn insert_marker_start(&mut self, id: MarkerId, start: Point, end: Point) -> u32 {
        let Some(mut cursor) = self.cursor() else {
            let node = self.build_node(NIL, start);
            self.root = node;
            return node;
        };

        loop {
            match start.cmp(&cursor.position) {
                std::cmp::Ordering::Equal => {
                    self.mark_right(&cursor, id, start, end);
                    return cursor.node;
                }
                std::cmp::Ordering::Less => {
                    self.mark_right(&cursor, id, start, end);
                    if self.nodes[cursor.node as usize].left != NIL {
                        self.descend_left(&mut cursor);
                    } else {
                        self.insert_left_child(&cursor, start);
                        self.descend_left(&mut cursor);
                        self.mark_right(&cursor, id, start, end);
                        return cursor.node;
                    }
                }
                std::cmp::Ordering::Greater => {
                    if self.nodes[cursor.node as usize].right != NIL {
                        self.descend_right(&mut cursor);
                    } else {
                        self.insert_right_child(&cursor, start);
                        self.descend_right(&mut cursor);
                        self.mark_right(&cursor, id, start, end);
                        return cursor.node;
                    }
                }
            }
        }
    }

    fn insert_marker_end(&mut self, id: MarkerId, start: Point, end: Point) -> u32 {
        let Some(mut cursor) = self.cursor() else {
            let node = self.build_node(NIL, end);
            self.root = node;
            return node;
        };

        loop {
            match end.cmp(&cursor.position) {
                std::cmp::Ordering::Equal => {
                    self.mark_left(&cursor, id, start, end);
                    return cursor.node;
                }
                std::cmp::Ordering::Less => {
                    if self.nodes[cursor.node as usize].left != NIL {
                        self.descend_left(&mut cursor);
                    } else {
                        self.insert_left_child(&cursor, end);
                        self.descend_left(&mut cursor);
                        self.mark_left(&cursor, id, start, end);
                        return cursor.node;
                    }
                }
                std::cmp::Ordering::Greater => {
                    self.mark_left(&cursor, id, start, end);
                    if self.nodes[cursor.node as usize].right != NIL {
                        self.descend_right(&mut cursor);
                    } else {
                        self.insert_right_child(&cursor, end);
                        self.descend_right(&mut cursor);
                        self.mark_left(&cursor, id, start, end);
                        return cursor.node;
                    }
                }
            }
        }
    }

    // For insertions the end boundary must land after any existing node at
    // the same position, so inclusive markers anchored there stay put.
    fn insert_splice_boundary(&mut self, position: Point, is_insertion_end: bool) -> u32 {
        let mut cursor = match self.cursor() {
            Some(cursor) => cursor,
            None => unreachable!("splice boundaries are only inserted into non-empty trees"),
        };

        loop {
            match position.cmp(&cursor.position) {
                std::cmp::Ordering::Equal if !is_insertion_end => return cursor.node,
                std::cmp::Ordering::Less => {
                    if self.nodes[cursor.node as usize].left != NIL {
                        self.descend_left(&mut cursor);
                    } else {
                        return self.insert_left_child(&cursor, position);
                    }
                }
                _ => {
                    if self.nodes[cursor.node as usize].right != NIL {
                        self.descend_right(&mut cursor);
                    } else {
                        return self.insert_right_child(&cursor, position);
                    }
                }
            }
        }
    }

    fn insert_left_child(&mut self, cursor: &Cursor, position: Point) -> u32 {
        let child = self.build_node(cursor.node, position.traversal(cursor.left_ancestor_position));
        self.nodes[cursor.node as usize].left = child;
        child
    }

    fn insert_right_child(&mut self, cursor: &Cursor, position: Point) -> u32 {
        let child = self.build_node(cursor.node, position.traversal(cursor.position));
        self.nodes[cursor.node as usize].right = child;
        child
    }

    fn mark_right(&mut self, cursor: &Cursor, id: MarkerId, start: Point, end: Point) {
        if cursor.left_ancestor_position < start
            && start <= cursor.position
            && cursor.right_ancestor_position <= end
        {
            self.nodes[cursor.node as usize].right_marker_ids.insert(id);
        }
    }

    fn mark_left(&mut self, cursor: &Cursor, id: MarkerId, start: Point, end: Point) {
        if !cursor.position.is_zero()
            && start <= cursor.left_ancestor_position
            && cursor.position <= end
        {
            self.nodes[cursor.node as usize].left_marker_ids.insert(id);
        }
    }

    // --- treap plumbing ---

    fn build_node(&mut self, parent: u32, left_extent: Point) -> u32 {
        let node = Node::new(parent, left_extent);
        match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn free_node(&mut self, id: u32) {
        let node = &mut self.nodes[id as usize];
        node.parent = NIL;
        node.left = NIL;
        node.right = NIL;
        node.priority = 0;
        node.left_marker_ids.clear();
        node.right_marker_ids.clear();
        node.start_marker_ids.clear();
        node.end_marker_ids.clear();
        self.free.push(id);
    }

    fn get_node_position(&self, node: u32) -> Point {
        let mut position = self.nodes[node as usize].left_extent;
        let mut current = node;
        loop {
            let parent = self.nodes[current as usize].parent;
            if parent == NIL {
                break;
            }
            if self.nodes[parent as usize].right == current {
                position = self.nodes[parent as usize].left_extent.traverse(position);
            }
            current = parent;
        }
        position
    }

    fn delete_single_node(&mut self, node: u32) {
        self.nodes[node as usize].priority = i32::MAX;
        self.bubble_node_down(node);
        let parent = self.nodes[node as usize].parent;
        if parent != NIL {
            if self.nodes[parent as usize].left == node {
                self.nodes[parent as usize].left = NIL;
            } else {
                self.nodes[parent as usize].right = NIL;
            }
        } else {
            self.root = NIL;
        }
        self.free_node(node);
    }

    fn delete_whole_subtree(&mut self, node: u32) {
        let mut stack: SmallVec<[u32; 16]> = SmallVec::new();
        stack.push(node);
        while let Some(id) = stack.pop() {
            let (left, right) = {
                let n = &self.nodes[id as usize];
                (n.left, n.right)
            };
            if left != NIL {
                stack.push(left);
            }
            if right != NIL {
                stack.push(right);
            }
            self.free_node(id);
        }
    }

    fn bubble_node_up(&mut self, node: u32) {
        loop {
            let parent = self.nodes[node as usize].parent;
            if parent == NIL
                || self.nodes[node as usize].priority >= self.nodes[parent as usize].priority
            {
                break;
            }
            if self.nodes[parent as usize].left == node {
                self.rotate_node_right(node);
            } else {
                self.rotate_node_left(node);
            }
        }
    }

    fn bubble_node_down(&mut self, node: u32) {
        loop {
            let (left, right, priority) = {
                let n = &self.nodes[node as usize];
                (n.left, n.right, n.priority)
            };
            let left_priority =
                if left != NIL { self.nodes[left as usize].priority } else { i32::MAX };
            let right_priority =
                if right != NIL { self.nodes[right as usize].priority } else { i32::MAX };

            if left_priority < right_priority && left_priority < priority {
                self.rotate_node_right(left);
            } else if right_priority < priority {
                self.rotate_node_left(right);
            } else {
                break;
            }
        }
    }

    fn rotate_node_left(&mut self, pivot: u32) {
        let root = self.nodes[pivot as usize].parent;
        let root_parent = self.nodes[root as usize].parent;

        if root_parent != NIL {
            if self.nodes[root_parent as usize].left == root {
                self.nodes[root_parent as usize].left = pivot;
            } else {
                self.nodes[root_parent as usize].right = pivot;
            }
        } else {
            self.root = pivot;
        }
        self.nodes[pivot as usize].parent = root_parent;

        let pivot_left = self.nodes[pivot as usize].left;
        self.nodes[root as usize].right = pivot_left;
        if pivot_left != NIL {
            self.nodes[pivot_left as usize].parent = root;
        }

        self.nodes[pivot as usize].left = root;
        self.nodes[root as usize].parent = pivot;

        self.nodes[pivot as usize].left_extent = self.nodes[root as usize]
            .left_extent
            .traverse(self.nodes[pivot as usize].left_extent);

        // The pivot inherits coverage of the root's old right subtree; ids
        // that covered the pivot's old left subtree either stay spanning
        // (when they also covered the root's left side) or retreat to the
        // root's right set.
        let root_right: Vec<MarkerId> =
            self.nodes[root as usize].right_marker_ids.iter().copied().collect();
        self.nodes[pivot as usize].right_marker_ids.extend(root_right);

        let mut pivot_left_ids = mem::take(&mut self.nodes[pivot as usize].left_marker_ids);
        let mut root_left_ids = mem::take(&mut self.nodes[root as usize].left_marker_ids);
        let mut root_right_ids = mem::take(&mut self.nodes[root as usize].right_marker_ids);
        pivot_left_ids.retain(|id| {
            if root_left_ids.remove(id) {
                true
            } else {
                root_right_ids.insert(*id);
                false
            }
        });
        self.nodes[pivot as usize].left_marker_ids = pivot_left_ids;
        self.nodes[root as usize].left_marker_ids = root_left_ids;
        self.nodes[root as usize].right_marker_ids = root_right_ids;
    }

    fn rotate_node_right(&mut self, pivot: u32) {
        let root = self.nodes[pivot as usize].parent;
        let root_parent = self.nodes[root as usize].parent;

        if root_parent != NIL {
            if self.nodes[root_parent as usize].left == root {
                self.nodes[root_parent as usize].left = pivot;
            } else {
                self.nodes[root_parent as usize].right = pivot;
            }
        } else {
            self.root = pivot;
        }
        self.nodes[pivot as usize].parent = root_parent;

        let pivot_right = self.nodes[pivot as usize].right;
        self.nodes[root as usize].left = pivot_right;
        if pivot_right != NIL {
            self.nodes[pivot_right as usize].parent = root;
        }

        self.nodes[pivot as usize].right = root;
        self.nodes[root as usize].parent = pivot;

        self.nodes[root as usize].left_extent = self.nodes[root as usize]
            .left_extent
            .traversal(self.nodes[pivot as usize].left_extent);

        let root_left: Vec<MarkerId> =
            self.nodes[root as usize].left_marker_ids.iter().copied().collect();
        for id in root_left {
            if !self.nodes[pivot as usize].start_marker_ids.contains(&id) {
                self.nodes[pivot as usize].left_marker_ids.insert(id);
            }
        }

        let mut pivot_right_ids = mem::take(&mut self.nodes[pivot as usize].right_marker_ids);
        let mut root_right_ids = mem::take(&mut self.nodes[root as usize].right_marker_ids);
        let mut root_left_ids = mem::take(&mut self.nodes[root as usize].left_marker_ids);
        pivot_right_ids.retain(|id| {
            if root_right_ids.remove(id) {
                true
            } else {
                root_left_ids.insert(*id);
                false
            }
        });
        self.nodes[pivot as usize].right_marker_ids = pivot_right_ids;
        self.nodes[root as usize].right_marker_ids = root_right_ids;
        self.nodes[root as usize].left_marker_ids = root_left_ids;
    }

    fn collect_starting_and_ending_markers(
        &self,
        node: u32,
        starting: &mut MarkerIdSet,
        ending: &mut MarkerIdSet,
    ) {
        if node == NIL {
            return;
        }
        let mut stack: SmallVec<[u32; 16]> = SmallVec::new();
        stack.push(node);
        while let Some(id) = stack.pop() {
            let n = &self.nodes[id as usize];
            starting.extend(n.start_marker_ids.iter().copied());
            ending.extend(n.end_marker_ids.iter().copied());
            if n.left != NIL {
                stack.push(n.left);
            }
            if n.right != NIL {
                stack.push(n.right);
            }
        }
    }

    fn populate_splice_invalidation_sets(
        &self,
        invalidated: &mut SpliceResult,
        start_node: u32,
        end_node: u32,
        starting_inside_splice: &MarkerIdSet,
        ending_inside_splice: &MarkerIdSet,
    ) {
        let start = &self.nodes[start_node as usize];
        let end = &self.nodes[end_node as usize];

        invalidated.touch.extend(start.end_marker_ids.iter().copied());
        invalidated.touch.extend(end.start_marker_ids.iter().copied());

        for &id in &start.right_marker_ids {
            invalidated.touch.insert(id);
            invalidated.inside.insert(id);
        }
        for &id in &end.left_marker_ids {
            invalidated.touch.insert(id);
            invalidated.inside.insert(id);
        }

        for &id in starting_inside_splice {
            invalidated.touch.insert(id);
            invalidated.inside.insert(id);
            invalidated.overlap.insert(id);
            if ending_inside_splice.contains(&id) {
                invalidated.surround.insert(id);
            }
        }
        for &id in ending_inside_splice {
            invalidated.touch.insert(id);
            invalidated.inside.insert(id);
            invalidated.overlap.insert(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(row: u32, column: u32) -> Point {
        Point::new(row, column)
    }

    fn ids(values: &[MarkerId]) -> MarkerIdSet {
        values.iter().copied().collect()
    }

    #[test]
    fn insert_get_remove() {
        let mut index = MarkerIndex::new(42);
        index.insert(1, point(0, 2), point(0, 8));
        index.insert(2, point(0, 4), point(1, 3));

        assert!(index.has(1));
        assert!(!index.has(3));
        assert_eq!(index.get_start(1), point(0, 2));
        assert_eq!(index.get_end(1), point(0, 8));
        assert_eq!(index.get_range(2), Range::new(point(0, 4), point(1, 3)));
        assert_eq!(index.get_start(99), Point::zero());

        index.remove(1);
        assert!(!index.has(1));
        assert_eq!(index.get_range(2), Range::new(point(0, 4), point(1, 3)));

        let dump = index.dump();
        assert_eq!(dump.len(), 1);
        assert_eq!(dump[&2], Range::new(point(0, 4), point(1, 3)));
    }

    #[test]
    fn compare_orders_by_start_then_reversed_end() {
        let mut index = MarkerIndex::new(1);
        index.insert(1, point(0, 2), point(0, 9));
        index.insert(2, point(0, 2), point(0, 5));
        index.insert(3, point(0, 4), point(0, 5));

        assert_eq!(index.compare(1, 2), std::cmp::Ordering::Less);
        assert_eq!(index.compare(2, 1), std::cmp::Ordering::Greater);
        assert_eq!(index.compare(2, 3), std::cmp::Ordering::Less);
        assert_eq!(index.compare(1, 1), std::cmp::Ordering::Equal);
    }

    #[test]
    fn splice_relocates_markers_and_reports_invalidation() {
        let mut index = MarkerIndex::new(7);
        index.insert(1, point(0, 2), point(0, 8));

        let result = index.splice(point(0, 4), point(0, 2), point(0, 5));
        assert_eq!(index.get_range(1), Range::new(point(0, 2), point(0, 11)));
        assert!(result.inside.contains(&1));
        assert!(result.touch.contains(&1));
        assert!(!result.overlap.contains(&1));
        assert!(!result.surround.contains(&1));
    }

    #[test]
    fn splice_invalidation_sets_are_nested() {
        let mut index = MarkerIndex::new(3);
        index.insert(1, point(0, 0), point(0, 20)); // spans the splice
        index.insert(2, point(0, 6), point(0, 7)); // strictly inside
        index.insert(3, point(0, 4), point(0, 7)); // one endpoint inside
        index.insert(4, point(0, 30), point(0, 31)); // unaffected

        let result = index.splice(point(0, 5), point(0, 4), point(0, 1));
        assert_eq!(result.surround, ids(&[2]));
        assert!(result.overlap.is_superset(&result.surround));
        assert!(result.inside.is_superset(&result.overlap));
        assert!(result.touch.is_superset(&result.inside));
        assert!(!result.touch.contains(&4));
        assert_eq!(index.get_range(4), Range::new(point(0, 27), point(0, 28)));
    }

    #[test]
    fn insertions_grow_inclusive_markers_and_push_exclusive_ones() {
        let mut index = MarkerIndex::new(11);
        index.insert(1, point(0, 5), point(0, 5));
        index.insert(2, point(0, 5), point(0, 5));
        index.set_exclusive(2, true);

        index.splice(point(0, 5), Point::zero(), point(0, 3));

        // The inclusive marker absorbs the insertion; the exclusive one is
        // carried past it, leaving position 5 behind.
        assert_eq!(index.get_range(1), Range::new(point(0, 5), point(0, 8)));
        assert_eq!(index.get_range(2), Range::new(point(0, 8), point(0, 8)));
    }

    #[test]
    fn exclusive_markers_do_not_extend_at_their_start() {
        let mut index = MarkerIndex::new(11);
        index.insert(1, point(0, 5), point(0, 9));
        index.set_exclusive(1, true);

        index.splice(point(0, 5), Point::zero(), point(0, 2));
        assert_eq!(index.get_range(1), Range::new(point(0, 7), point(0, 11)));

        index.splice(point(0, 11), Point::zero(), point(0, 2));
        assert_eq!(index.get_range(1), Range::new(point(0, 7), point(0, 11)));
    }

    #[test]
    fn deletions_collapse_interior_endpoints() {
        let mut index = MarkerIndex::new(5);
        index.insert(1, point(0, 3), point(0, 10));
        index.insert(2, point(0, 6), point(0, 8));

        let result = index.splice(point(0, 4), point(0, 10), point(0, 1));
        assert_eq!(index.get_range(1), Range::new(point(0, 3), point(0, 5)));
        assert_eq!(index.get_range(2), Range::new(point(0, 5), point(0, 5)));
        assert!(result.surround.contains(&2));
        assert!(result.inside.contains(&1));
    }

    #[test]
    fn intersection_queries() {
        let mut index = MarkerIndex::new(9);
        index.insert(1, point(0, 0), point(0, 4));
        index.insert(2, point(0, 2), point(0, 6));
        index.insert(3, point(0, 5), point(0, 9));
        index.insert(4, point(1, 0), point(2, 0));

        assert_eq!(index.find_intersecting(point(0, 0), point(0, 1)), ids(&[1]));
        assert_eq!(index.find_intersecting(point(0, 3), point(0, 5)), ids(&[1, 2, 3]));
        assert_eq!(index.find_intersecting(point(0, 10), point(0, 20)), ids(&[]));
        assert_eq!(index.find_intersecting(point(1, 5), point(1, 5)), ids(&[4]));

        assert_eq!(index.find_containing(point(0, 3), point(0, 4)), ids(&[1, 2]));
        assert_eq!(index.find_containing(point(0, 3), point(0, 3)), ids(&[1, 2]));

        assert_eq!(index.find_contained_in(point(0, 0), point(0, 6)), ids(&[1, 2]));
        assert_eq!(index.find_contained_in(point(0, 1), point(0, 9)), ids(&[2, 3]));

        assert_eq!(index.find_starting_in(point(0, 1), point(0, 5)), ids(&[2, 3]));
        assert_eq!(index.find_starting_at(point(0, 5)), ids(&[3]));
        assert_eq!(index.find_ending_in(point(0, 4), point(0, 6)), ids(&[1, 2]));
        assert_eq!(index.find_ending_at(point(0, 9)), ids(&[3]));
    }

    #[test]
    fn boundary_queries() {
        let mut index = MarkerIndex::new(13);
        index.insert(1, point(0, 0), point(0, 10));
        index.insert(2, point(0, 4), point(0, 6));
        index.insert(3, point(0, 6), point(0, 8));

        let result = index.find_boundaries_after(point(0, 5), 3);
        assert_eq!(result.containing_start, vec![1, 2]);
        assert_eq!(result.boundaries.len(), 3);
        assert_eq!(result.boundaries[0].position, point(0, 6));
        assert_eq!(result.boundaries[0].starting, ids(&[3]));
        assert_eq!(result.boundaries[0].ending, ids(&[2]));
        assert_eq!(result.boundaries[1].position, point(0, 8));
        assert_eq!(result.boundaries[1].ending, ids(&[3]));
        assert_eq!(result.boundaries[2].position, point(0, 10));
        assert_eq!(result.boundaries[2].ending, ids(&[1]));

        let result = index.find_boundaries_after(point(0, 0), 1);
        assert_eq!(result.boundaries.len(), 1);
        assert_eq!(result.boundaries[0].position, point(0, 0));
        assert_eq!(result.boundaries[0].starting, ids(&[1]));
    }

    #[test]
    fn markers_after_the_splice_shift_by_the_delta() {
        let mut index = MarkerIndex::new(21);
        index.insert(1, point(2, 3), point(4, 5));
        index.insert(2, point(0, 1), point(0, 2));

        index.splice(point(1, 0), point(1, 0), point(0, 4));
        assert_eq!(index.get_range(1), Range::new(point(1, 7), point(3, 5)));
        assert_eq!(index.get_range(2), Range::new(point(0, 1), point(0, 2)));
    }
}
