//! A balanced tree of non-overlapping changes mapping an "old" coordinate
//! space onto a "new" one. The tree is a splay tree keyed simultaneously by
//! both spaces: each node stores its distance from its left ancestor in both
//! spaces, so looking a position up in either space is a single descent.
//!
//! Nodes live in an index arena (`Vec<Node>` plus `u32` ids with a free
//! list). Rotations are pointer swaps on indices, and a deserialized patch is
//! simply an arena laid out in preorder, which is what makes the frozen form
//! cheap.

use std::error::Error;
use std::fmt::{Display, Formatter};

use log::debug;
use num_enum::TryFromPrimitive;
use smallvec::SmallVec;

use crate::point::Point;
use crate::serializer::{Deserializer, Serializer};
use crate::text::Text;
use crate::text_slice::TextSlice;

const NIL: u32 = u32::MAX;
const SERIALIZATION_VERSION: u32 = 1;

type NodeStack = SmallVec<[u32; 16]>;

/// Returned by `splice`/`splice_old` on a deserialized (frozen) patch.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrozenPatchError;

impl Display for FrozenPatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("patch is frozen and cannot be spliced")
    }
}

impl Error for FrozenPatchError {}

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[repr(u32)]
enum Transition {
    Left = 1,
    Right = 2,
    Up = 3,
}

#[derive(Clone, Debug)]
struct Node {
    left: u32,
    right: u32,
    old_distance_from_left_ancestor: Point,
    new_distance_from_left_ancestor: Point,
    old_extent: Point,
    new_extent: Point,
    old_text: Option<Text>,
    new_text: Option<Text>,
    // Code-unit size of the old region, used when old_text is absent.
    old_text_size: u32,
    // Totals over this subtree, including this node. These are what let
    // point queries report preceding text sizes without walking the tree.
    subtree_old_text_size: u32,
    subtree_new_text_size: u32,
}

impl Node {
    fn own_old_text_size(&self) -> u32 {
        self.old_text.as_ref().map_or(self.old_text_size, |text| text.size())
    }

    fn own_new_text_size(&self) -> u32 {
        self.new_text.as_ref().map_or(0, |text| text.size())
    }
}

/// One element of a patch, with owned copies of any recorded text.
#[derive(Clone, Debug)]
pub struct Change {
    pub old_start: Point,
    pub old_end: Point,
    pub new_start: Point,
    pub new_end: Point,
    pub old_text: Option<Text>,
    pub new_text: Option<Text>,
    pub preceding_old_text_size: u32,
    pub preceding_new_text_size: u32,
    pub old_text_size: u32,
}

// The size fields are derived bookkeeping; two changes describing the same
// edit are equal.
impl PartialEq for Change {
    fn eq(&self, other: &Self) -> bool {
        self.old_start == other.old_start
            && self.old_end == other.old_end
            && self.new_start == other.new_start
            && self.new_end == other.new_end
            && self.old_text == other.old_text
            && self.new_text == other.new_text
    }
}

impl Eq for Change {}

/// A borrowed view of a change, produced by the point queries.
#[derive(Copy, Clone, Debug)]
pub struct ChangeRef<'a> {
    pub old_start: Point,
    pub old_end: Point,
    pub new_start: Point,
    pub new_end: Point,
    pub old_text: Option<&'a Text>,
    pub new_text: Option<&'a Text>,
    pub preceding_old_text_size: u32,
    pub preceding_new_text_size: u32,
    pub old_text_size: u32,
}

impl ChangeRef<'_> {
    pub fn new_text_size(&self) -> u32 {
        self.new_text.map_or(0, |text| text.size())
    }

    pub fn to_change(&self) -> Change {
        Change {
            old_start: self.old_start,
            old_end: self.old_end,
            new_start: self.new_start,
            new_end: self.new_end,
            old_text: self.old_text.cloned(),
            new_text: self.new_text.cloned(),
            preceding_old_text_size: self.preceding_old_text_size,
            preceding_new_text_size: self.preceding_new_text_size,
            old_text_size: self.old_text_size,
        }
    }
}

// Selects which of the two coordinate spaces a traversal is keyed by.
trait CoordinateSpace {
    fn distance_from_left_ancestor(node: &Node) -> Point;
    fn extent(node: &Node) -> Point;
    fn choose(old: Point, new: Point) -> Point;
}

struct OldCoordinates;
struct NewCoordinates;

impl CoordinateSpace for OldCoordinates {
    fn distance_from_left_ancestor(node: &Node) -> Point {
        node.old_distance_from_left_ancestor
    }
    fn extent(node: &Node) -> Point {
        node.old_extent
    }
    fn choose(old: Point, _new: Point) -> Point {
        old
    }
}

impl CoordinateSpace for NewCoordinates {
    fn distance_from_left_ancestor(node: &Node) -> Point {
        node.new_distance_from_left_ancestor
    }
    fn extent(node: &Node) -> Point {
        node.new_extent
    }
    fn choose(_old: Point, new: Point) -> Point {
        new
    }
}

#[derive(Copy, Clone, Default)]
struct PositionStackEntry {
    old_end: Point,
    new_end: Point,
}

#[derive(Debug)]
pub struct Patch {
    nodes: Vec<Node>,
    free: Vec<u32>,
    root: u32,
    frozen: bool,
    merges_adjacent_changes: bool,
    change_count: u32,
}

impl Default for Patch {
    fn default() -> Self {
        Patch::new(true)
    }
}

impl Clone for Patch {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl Patch {
    pub fn new(merges_adjacent_changes: bool) -> Patch {
        Patch {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NIL,
            frozen: false,
            merges_adjacent_changes,
            change_count: 0,
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get_change_count(&self) -> u32 {
        self.change_count
    }

    pub fn is_empty(&self) -> bool {
        self.change_count == 0
    }

    /// Deep copy. The copy is always mutable, even when `self` is frozen.
    pub fn copy(&self) -> Patch {
        Patch {
            nodes: self.nodes.clone(),
            free: self.free.clone(),
            root: self.root,
            frozen: false,
            merges_adjacent_changes: self.merges_adjacent_changes,
            change_count: self.change_count,
        }
    }

    /// A patch mapping the new space back onto the old one.
    pub fn invert(&self) -> Patch {
        let nodes = self
            .nodes
            .iter()
            .map(|node| Node {
                left: node.left,
                right: node.right,
                old_distance_from_left_ancestor: node.new_distance_from_left_ancestor,
                new_distance_from_left_ancestor: node.old_distance_from_left_ancestor,
                old_extent: node.new_extent,
                new_extent: node.old_extent,
                old_text: node.new_text.clone(),
                new_text: node.old_text.clone(),
                old_text_size: 0,
                subtree_old_text_size: 0,
                subtree_new_text_size: 0,
            })
            .collect();
        let mut inverted = Patch {
            nodes,
            free: self.free.clone(),
            root: self.root,
            frozen: false,
            merges_adjacent_changes: self.merges_adjacent_changes,
            change_count: self.change_count,
        };
        inverted.recompute_all_subtree_text_sizes();
        inverted
    }

    /// Compose a sequence of patches left to right: the result maps the first
    /// patch's old space onto the last patch's new space. Iteration direction
    /// alternates per input so each pass replays edits through the
    /// accumulator in whichever order keeps its coordinates valid.
    pub fn compose(patches: &[&Patch]) -> Patch {
        let mut result = Patch::new(true);
        let mut left_to_right = true;
        for patch in patches {
            result.combine_impl(patch, left_to_right);
            left_to_right = !left_to_right;
        }
        result
    }

    /// Splice another patch's changes into this one. With `left_to_right`,
    /// `other`'s old space must be this patch's new space; otherwise the
    /// reverse replay applies `other`'s changes in its own old coordinates.
    pub fn combine(&mut self, other: &Patch, left_to_right: bool) -> Result<(), FrozenPatchError> {
        if self.frozen {
            return Err(FrozenPatchError);
        }
        self.combine_impl(other, left_to_right);
        Ok(())
    }

    pub(crate) fn combine_impl(&mut self, other: &Patch, left_to_right: bool) {
        let changes = other.get_changes();
        if left_to_right {
            for change in &changes {
                self.splice_impl(
                    change.new_start,
                    change.old_end.traversal(change.old_start),
                    change.new_end.traversal(change.new_start),
                    change.old_text.clone(),
                    change.new_text.clone(),
                    change.old_text_size,
                );
            }
        } else {
            for change in changes.iter().rev() {
                self.splice_impl(
                    change.old_start,
                    change.old_end.traversal(change.old_start),
                    change.new_end.traversal(change.new_start),
                    change.old_text.clone(),
                    change.new_text.clone(),
                    change.old_text_size,
                );
            }
        }
    }

    /// Record an edit expressed in new-space coordinates: at `start`, a
    /// region spanning `deletion_extent` was replaced by one spanning
    /// `insertion_extent`. `deleted_text_size` is the code-unit size of the
    /// deleted region and is only consulted when `deleted_text` is absent.
    pub fn splice(
        &mut self,
        start: Point,
        deletion_extent: Point,
        insertion_extent: Point,
        deleted_text: Option<Text>,
        inserted_text: Option<Text>,
        deleted_text_size: u32,
    ) -> Result<(), FrozenPatchError> {
        if self.frozen {
            return Err(FrozenPatchError);
        }
        self.splice_impl(
            start,
            deletion_extent,
            insertion_extent,
            deleted_text,
            inserted_text,
            deleted_text_size,
        );
        Ok(())
    }

    /// Shift the old side of the patch to reflect an edit to the underlying
    /// document, expressed in old-space coordinates.
    pub fn splice_old(
        &mut self,
        start: Point,
        deletion_extent: Point,
        insertion_extent: Point,
    ) -> Result<(), FrozenPatchError> {
        if self.frozen {
            return Err(FrozenPatchError);
        }
        self.splice_old_impl(start, deletion_extent, insertion_extent);
        Ok(())
    }

    pub fn get_changes(&self) -> Vec<Change> {
        self.collect_changes::<NewCoordinates>(None)
    }

    pub fn get_changes_in_new_range(&self, start: Point, end: Point, inclusive: bool) -> Vec<Change> {
        self.collect_changes::<NewCoordinates>(Some((start, end, inclusive)))
    }

    pub fn get_changes_in_old_range(&self, start: Point, end: Point) -> Vec<Change> {
        self.collect_changes::<OldCoordinates>(Some((start, end, false)))
    }

    /// Splaying lookup of the change starting at or before a new-space
    /// position. Amortizes repeated nearby lookups; shared readers should use
    /// [`find_change_for_new_position`](Patch::find_change_for_new_position).
    pub fn change_for_new_position(&mut self, target: Point) -> Option<ChangeRef<'_>> {
        self.splay_node_starting_before::<NewCoordinates>(target)?;
        Some(self.change_ref_for_root())
    }

    pub fn change_for_old_position(&mut self, target: Point) -> Option<ChangeRef<'_>> {
        self.splay_node_starting_before::<OldCoordinates>(target)?;
        Some(self.change_ref_for_root())
    }

    /// Non-splaying lookup of the change starting at or before a new-space
    /// position.
    pub fn find_change_for_new_position(&self, target: Point) -> Option<ChangeRef<'_>> {
        self.find_change_starting_before::<NewCoordinates>(target)
    }

    pub fn find_change_for_old_position(&self, target: Point) -> Option<ChangeRef<'_>> {
        self.find_change_starting_before::<OldCoordinates>(target)
    }

    /// Non-splaying lookup of the leftmost change whose new-space end is
    /// strictly after `target`.
    pub fn find_change_ending_after_new_position(&self, target: Point) -> Option<ChangeRef<'_>> {
        let mut node = self.root;
        let mut entry = PositionStackEntry::default();
        let mut preceding_old = 0;
        let mut preceding_new = 0;
        let mut found: Option<(u32, PositionStackEntry, u32, u32)> = None;

        while node != NIL {
            let n = self.node(node);
            let old_start = entry.old_end.traverse(n.old_distance_from_left_ancestor);
            let new_start = entry.new_end.traverse(n.new_distance_from_left_ancestor);
            let old_end = old_start.traverse(n.old_extent);
            let new_end = new_start.traverse(n.new_extent);
            if new_end > target {
                found = Some((node, entry, preceding_old, preceding_new));
                node = n.left;
            } else {
                preceding_old += self.left_subtree_old_text_size(node) + n.own_old_text_size();
                preceding_new += self.left_subtree_new_text_size(node) + n.own_new_text_size();
                entry = PositionStackEntry { old_end, new_end };
                node = n.right;
            }
        }

        let (node, entry, preceding_old, preceding_new) = found?;
        let preceding_old = preceding_old + self.left_subtree_old_text_size(node);
        let preceding_new = preceding_new + self.left_subtree_new_text_size(node);
        Some(self.change_ref_for_node(node, entry, preceding_old, preceding_new))
    }

    /// Restore logarithmic depth with the classic vine-to-tree rotation
    /// sequence.
    pub fn rebalance(&mut self) {
        if self.root == NIL {
            return;
        }

        // Transform the tree to a vine.
        let mut pseudo_root = self.root;
        let mut pseudo_root_parent = NIL;
        while pseudo_root != NIL {
            let left = self.node(pseudo_root).left;
            let right = self.node(pseudo_root).right;
            if left != NIL {
                self.rotate_node_right(left, pseudo_root, pseudo_root_parent);
                pseudo_root = left;
            } else {
                pseudo_root_parent = pseudo_root;
                pseudo_root = right;
            }
        }

        // Transform the vine to a balanced tree.
        let n = self.change_count;
        let mut m = if n == 0 { 0 } else { (1u32 << (31 - (n + 1).leading_zeros())) - 1 };
        self.perform_rebalancing_rotations(n - m);
        while m > 1 {
            m /= 2;
            self.perform_rebalancing_rotations(m);
        }
    }

    pub fn serialize(&self, output: &mut Serializer) {
        if self.root == NIL {
            return;
        }

        output.append_u32(SERIALIZATION_VERSION);
        output.append_u32(self.change_count);
        self.serialize_node(output, self.root);

        let mut node = self.root;
        let mut stack: NodeStack = SmallVec::new();
        let mut previous_child_index: i32 = -1;
        loop {
            let (left, right) = {
                let n = self.node(node);
                (n.left, n.right)
            };
            if left != NIL && previous_child_index < 0 {
                output.append_u32(Transition::Left as u32);
                self.serialize_node(output, left);
                stack.push(node);
                node = left;
                previous_child_index = -1;
            } else if right != NIL && previous_child_index < 1 {
                output.append_u32(Transition::Right as u32);
                self.serialize_node(output, right);
                stack.push(node);
                node = right;
                previous_child_index = -1;
            } else if let Some(parent) = stack.pop() {
                output.append_u32(Transition::Up as u32);
                previous_child_index = if self.node(parent).left == node { 0 } else { 1 };
                node = parent;
            } else {
                break;
            }
        }
    }

    /// Reconstruct a patch from its wire form. A version mismatch, an invalid
    /// transition tag or a truncated body all produce an empty patch. The
    /// result is frozen; [`copy`](Patch::copy) it to get a mutable one.
    pub fn deserialize(input: &mut Deserializer) -> Patch {
        let mut patch = Patch::new(true);

        let version = input.read_u32();
        if version != SERIALIZATION_VERSION {
            debug!("rejecting patch payload with serialization version {}", version);
            return patch;
        }

        let node_count = input.read_u32();
        if node_count == 0 {
            return patch;
        }

        patch.nodes.reserve(node_count as usize);
        patch.nodes.push(Self::deserialize_node(input));
        patch.root = 0;

        let mut node: u32 = 0;
        let mut stack: NodeStack = SmallVec::new();
        while (patch.nodes.len() as u32) < node_count {
            let next = patch.nodes.len() as u32;
            match Transition::try_from(input.read_u32()) {
                Ok(Transition::Left) => {
                    patch.nodes.push(Self::deserialize_node(input));
                    patch.nodes[node as usize].left = next;
                    stack.push(node);
                    node = next;
                }
                Ok(Transition::Right) => {
                    patch.nodes.push(Self::deserialize_node(input));
                    patch.nodes[node as usize].right = next;
                    stack.push(node);
                    node = next;
                }
                Ok(Transition::Up) => match stack.pop() {
                    Some(parent) => node = parent,
                    None => {
                        debug!("patch payload underflowed its transition stack");
                        return Patch::new(true);
                    }
                },
                Err(_) => {
                    debug!("patch payload contained an invalid transition tag");
                    return Patch::new(true);
                }
            }
        }

        patch.change_count = node_count;
        patch.frozen = true;
        patch.recompute_all_subtree_text_sizes();
        patch
    }

    // --- arena plumbing ---

    #[inline]
    fn node(&self, id: u32) -> &Node {
        &self.nodes[id as usize]
    }

    #[inline]
    fn node_mut(&mut self, id: u32) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    fn left_subtree_old_text_size(&self, id: u32) -> u32 {
        match self.node(id).left {
            NIL => 0,
            left => self.node(left).subtree_old_text_size,
        }
    }

    fn left_subtree_new_text_size(&self, id: u32) -> u32 {
        match self.node(id).left {
            NIL => 0,
            left => self.node(left).subtree_new_text_size,
        }
    }

    fn update_subtree_text_sizes(&mut self, id: u32) {
        let (left, right) = {
            let n = self.node(id);
            (n.left, n.right)
        };
        let mut old = self.node(id).own_old_text_size();
        let mut new = self.node(id).own_new_text_size();
        if left != NIL {
            old += self.node(left).subtree_old_text_size;
            new += self.node(left).subtree_new_text_size;
        }
        if right != NIL {
            old += self.node(right).subtree_old_text_size;
            new += self.node(right).subtree_new_text_size;
        }
        let n = self.node_mut(id);
        n.subtree_old_text_size = old;
        n.subtree_new_text_size = new;
    }

    fn recompute_all_subtree_text_sizes(&mut self) {
        if self.root == NIL {
            return;
        }
        let mut stack: Vec<(u32, bool)> = vec![(self.root, false)];
        while let Some((id, children_done)) = stack.pop() {
            if children_done {
                self.update_subtree_text_sizes(id);
            } else {
                stack.push((id, true));
                let n = self.node(id);
                if n.left != NIL {
                    stack.push((n.left, false));
                }
                if n.right != NIL {
                    stack.push((n.right, false));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_node(
        &mut self,
        left: u32,
        right: u32,
        old_distance_from_left_ancestor: Point,
        new_distance_from_left_ancestor: Point,
        old_extent: Point,
        new_extent: Point,
        old_text: Option<Text>,
        new_text: Option<Text>,
        old_text_size: u32,
    ) -> u32 {
        self.change_count += 1;
        let node = Node {
            left,
            right,
            old_distance_from_left_ancestor,
            new_distance_from_left_ancestor,
            old_extent,
            new_extent,
            old_text,
            new_text,
            old_text_size,
            subtree_old_text_size: 0,
            subtree_new_text_size: 0,
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        };
        self.update_subtree_text_sizes(id);
        id
    }

    fn free_node(&mut self, id: u32) {
        debug_assert!(self.change_count > 0);
        self.change_count -= 1;
        let node = self.node_mut(id);
        node.old_text = None;
        node.new_text = None;
        node.left = NIL;
        node.right = NIL;
        self.free.push(id);
    }

    // Frees `id` and its whole subtree. The caller detaches the link.
    fn delete_subtree(&mut self, id: u32) {
        if id == NIL {
            return;
        }
        let mut stack: NodeStack = SmallVec::new();
        stack.push(id);
        while let Some(node) = stack.pop() {
            let (left, right) = {
                let n = self.node(node);
                (n.left, n.right)
            };
            if left != NIL {
                stack.push(left);
            }
            if right != NIL {
                stack.push(right);
            }
            self.free_node(node);
        }
    }

    fn get_subtree_end(&self, id: u32) -> (Point, Point) {
        let mut old_end = Point::zero();
        let mut new_end = Point::zero();
        let mut node = id;
        while node != NIL {
            let n = self.node(node);
            old_end = old_end.traverse(n.old_distance_from_left_ancestor).traverse(n.old_extent);
            new_end = new_end.traverse(n.new_distance_from_left_ancestor).traverse(n.new_extent);
            node = n.right;
        }
        (old_end, new_end)
    }

    // --- rotations and splaying ---

    fn rotate_node_left(&mut self, pivot: u32, root: u32, root_parent: u32) {
        if root_parent != NIL {
            if self.node(root_parent).left == root {
                self.node_mut(root_parent).left = pivot;
            } else {
                self.node_mut(root_parent).right = pivot;
            }
        } else {
            self.root = pivot;
        }

        self.node_mut(root).right = self.node(pivot).left;
        self.node_mut(pivot).left = root;

        let root_old_dist = self.node(root).old_distance_from_left_ancestor;
        let root_new_dist = self.node(root).new_distance_from_left_ancestor;
        let root_old_extent = self.node(root).old_extent;
        let root_new_extent = self.node(root).new_extent;
        let pivot_node = self.node_mut(pivot);
        pivot_node.old_distance_from_left_ancestor = root_old_dist
            .traverse(root_old_extent)
            .traverse(pivot_node.old_distance_from_left_ancestor);
        pivot_node.new_distance_from_left_ancestor = root_new_dist
            .traverse(root_new_extent)
            .traverse(pivot_node.new_distance_from_left_ancestor);

        self.update_subtree_text_sizes(root);
        self.update_subtree_text_sizes(pivot);
    }

    fn rotate_node_right(&mut self, pivot: u32, root: u32, root_parent: u32) {
        if root_parent != NIL {
            if self.node(root_parent).left == root {
                self.node_mut(root_parent).left = pivot;
            } else {
                self.node_mut(root_parent).right = pivot;
            }
        } else {
            self.root = pivot;
        }

        self.node_mut(root).left = self.node(pivot).right;
        self.node_mut(pivot).right = root;

        let pivot_old = self
            .node(pivot)
            .old_distance_from_left_ancestor
            .traverse(self.node(pivot).old_extent);
        let pivot_new = self
            .node(pivot)
            .new_distance_from_left_ancestor
            .traverse(self.node(pivot).new_extent);
        let root_node = self.node_mut(root);
        root_node.old_distance_from_left_ancestor =
            root_node.old_distance_from_left_ancestor.traversal(pivot_old);
        root_node.new_distance_from_left_ancestor =
            root_node.new_distance_from_left_ancestor.traversal(pivot_new);

        self.update_subtree_text_sizes(root);
        self.update_subtree_text_sizes(pivot);
    }

    fn splay_node(&mut self, node: u32, stack: &mut NodeStack) {
        while let Some(parent) = stack.pop() {
            let grandparent = stack.pop();

            if let Some(grandparent) = grandparent {
                let great_grandparent = stack.last().copied().unwrap_or(NIL);
                let parent_is_left = self.node(grandparent).left == parent;
                let node_is_left = self.node(parent).left == node;

                match (parent_is_left, node_is_left) {
                    (true, false) => {
                        self.rotate_node_left(node, parent, grandparent);
                        self.rotate_node_right(node, grandparent, great_grandparent);
                    }
                    (false, true) => {
                        self.rotate_node_right(node, parent, grandparent);
                        self.rotate_node_left(node, grandparent, great_grandparent);
                    }
                    (true, true) => {
                        self.rotate_node_right(parent, grandparent, great_grandparent);
                        self.rotate_node_right(node, parent, great_grandparent);
                    }
                    (false, false) => {
                        self.rotate_node_left(parent, grandparent, great_grandparent);
                        self.rotate_node_left(node, parent, great_grandparent);
                    }
                }
            } else if self.node(parent).left == node {
                self.rotate_node_right(node, parent, NIL);
            } else {
                self.rotate_node_left(node, parent, NIL);
            }
        }
    }

    fn splay_node_starting_before<C: CoordinateSpace>(&mut self, target: Point) -> Option<u32> {
        let mut splayed_node = None;
        let mut splayed_ancestor_count = 0;
        let mut left_ancestor_end = Point::zero();
        let mut node = self.root;
        let mut stack: NodeStack = SmallVec::new();

        while node != NIL {
            let n = self.node(node);
            let node_start = left_ancestor_end.traverse(C::distance_from_left_ancestor(n));
            let node_end = node_start.traverse(C::extent(n));
            if node_start <= target {
                splayed_node = Some(node);
                splayed_ancestor_count = stack.len();
                if n.right != NIL {
                    left_ancestor_end = node_end;
                    stack.push(node);
                    node = n.right;
                } else {
                    break;
                }
            } else if n.left != NIL {
                stack.push(node);
                node = n.left;
            } else {
                break;
            }
        }

        let splayed_node = splayed_node?;
        stack.truncate(splayed_ancestor_count);
        self.splay_node(splayed_node, &mut stack);
        Some(splayed_node)
    }

    fn splay_node_ending_before<C: CoordinateSpace>(&mut self, target: Point) -> Option<u32> {
        let mut splayed_node = None;
        let mut splayed_ancestor_count = 0;
        let mut left_ancestor_end = Point::zero();
        let mut node = self.root;
        let mut stack: NodeStack = SmallVec::new();

        while node != NIL {
            let n = self.node(node);
            let node_start = left_ancestor_end.traverse(C::distance_from_left_ancestor(n));
            let node_end = node_start.traverse(C::extent(n));
            if node_end <= target {
                splayed_node = Some(node);
                splayed_ancestor_count = stack.len();
                if n.right != NIL {
                    left_ancestor_end = node_end;
                    stack.push(node);
                    node = n.right;
                } else {
                    break;
                }
            } else if n.left != NIL {
                stack.push(node);
                node = n.left;
            } else {
                break;
            }
        }

        let splayed_node = splayed_node?;
        stack.truncate(splayed_ancestor_count);
        self.splay_node(splayed_node, &mut stack);
        Some(splayed_node)
    }

    fn splay_node_ending_after<C: CoordinateSpace>(
        &mut self,
        splice_start: Point,
        splice_end: Point,
    ) -> Option<u32> {
        let mut splayed_node = None;
        let mut splayed_ancestor_count = 0;
        let mut left_ancestor_end = Point::zero();
        let mut node = self.root;
        let mut stack: NodeStack = SmallVec::new();

        while node != NIL {
            let n = self.node(node);
            let node_start = left_ancestor_end.traverse(C::distance_from_left_ancestor(n));
            let node_end = node_start.traverse(C::extent(n));
            if node_end >= splice_end && node_end > splice_start {
                splayed_node = Some(node);
                splayed_ancestor_count = stack.len();
                if n.left != NIL {
                    stack.push(node);
                    node = n.left;
                } else {
                    break;
                }
            } else if n.right != NIL {
                left_ancestor_end = node_end;
                stack.push(node);
                node = n.right;
            } else {
                break;
            }
        }

        let splayed_node = splayed_node?;
        stack.truncate(splayed_ancestor_count);
        self.splay_node(splayed_node, &mut stack);
        Some(splayed_node)
    }

    fn splay_node_starting_after<C: CoordinateSpace>(
        &mut self,
        splice_start: Point,
        splice_end: Point,
    ) -> Option<u32> {
        let mut splayed_node = None;
        let mut splayed_ancestor_count = 0;
        let mut left_ancestor_end = Point::zero();
        let mut node = self.root;
        let mut stack: NodeStack = SmallVec::new();

        while node != NIL {
            let n = self.node(node);
            let node_start = left_ancestor_end.traverse(C::distance_from_left_ancestor(n));
            let node_end = node_start.traverse(C::extent(n));
            if node_start >= splice_end && node_start > splice_start {
                splayed_node = Some(node);
                splayed_ancestor_count = stack.len();
                if n.left != NIL {
                    stack.push(node);
                    node = n.left;
                } else {
                    break;
                }
            } else if n.right != NIL {
                left_ancestor_end = node_end;
                stack.push(node);
                node = n.right;
            } else {
                break;
            }
        }

        let splayed_node = splayed_node?;
        stack.truncate(splayed_ancestor_count);
        self.splay_node(splayed_node, &mut stack);
        Some(splayed_node)
    }

    // Rotate the root down until it is a leaf, then remove it. Used to
    // coalesce a change whose extents have both shrunk to zero.
    fn delete_root(&mut self) {
        let mut node = self.root;
        let mut parent = NIL;
        loop {
            let (left, right) = {
                let n = self.node(node);
                (n.left, n.right)
            };
            if left != NIL {
                self.rotate_node_right(left, node, parent);
                parent = left;
            } else if right != NIL {
                self.rotate_node_left(right, node, parent);
                parent = right;
            } else {
                if parent != NIL {
                    if self.node(parent).left == node {
                        self.node_mut(parent).left = NIL;
                    } else {
                        self.node_mut(parent).right = NIL;
                    }
                } else {
                    self.root = NIL;
                }
                self.free_node(node);
                break;
            }
        }
    }

    fn perform_rebalancing_rotations(&mut self, count: u32) {
        let mut pseudo_root = self.root;
        let mut pseudo_root_parent = NIL;
        for _ in 0..count {
            if pseudo_root == NIL {
                return;
            }
            let right_child = self.node(pseudo_root).right;
            if right_child == NIL {
                return;
            }
            self.rotate_node_left(right_child, pseudo_root, pseudo_root_parent);
            pseudo_root = self.node(right_child).right;
            pseudo_root_parent = right_child;
        }
    }

    // --- queries ---

    fn change_ref_for_node(
        &self,
        id: u32,
        entry: PositionStackEntry,
        preceding_old_text_size: u32,
        preceding_new_text_size: u32,
    ) -> ChangeRef<'_> {
        let node = self.node(id);
        let old_start = entry.old_end.traverse(node.old_distance_from_left_ancestor);
        let new_start = entry.new_end.traverse(node.new_distance_from_left_ancestor);
        ChangeRef {
            old_start,
            old_end: old_start.traverse(node.old_extent),
            new_start,
            new_end: new_start.traverse(node.new_extent),
            old_text: node.old_text.as_ref(),
            new_text: node.new_text.as_ref(),
            preceding_old_text_size,
            preceding_new_text_size,
            old_text_size: node.own_old_text_size(),
        }
    }

    fn change_ref_for_root(&self) -> ChangeRef<'_> {
        let preceding_old = self.left_subtree_old_text_size(self.root);
        let preceding_new = self.left_subtree_new_text_size(self.root);
        self.change_ref_for_node(self.root, PositionStackEntry::default(), preceding_old, preceding_new)
    }

    fn find_change_starting_before<C: CoordinateSpace>(&self, target: Point) -> Option<ChangeRef<'_>> {
        let mut node = self.root;
        let mut entry = PositionStackEntry::default();
        let mut preceding_old = 0;
        let mut preceding_new = 0;
        let mut found: Option<(u32, PositionStackEntry, u32, u32)> = None;

        while node != NIL {
            let n = self.node(node);
            let old_start = entry.old_end.traverse(n.old_distance_from_left_ancestor);
            let new_start = entry.new_end.traverse(n.new_distance_from_left_ancestor);
            let node_start = C::choose(old_start, new_start);
            if node_start <= target {
                found = Some((node, entry, preceding_old, preceding_new));
                preceding_old += self.left_subtree_old_text_size(node) + n.own_old_text_size();
                preceding_new += self.left_subtree_new_text_size(node) + n.own_new_text_size();
                entry = PositionStackEntry {
                    old_end: old_start.traverse(n.old_extent),
                    new_end: new_start.traverse(n.new_extent),
                };
                node = n.right;
            } else {
                node = n.left;
            }
        }

        let (node, entry, preceding_old, preceding_new) = found?;
        let preceding_old = preceding_old + self.left_subtree_old_text_size(node);
        let preceding_new = preceding_new + self.left_subtree_new_text_size(node);
        Some(self.change_ref_for_node(node, entry, preceding_old, preceding_new))
    }

    // In-order walk, optionally constrained to the changes overlapping a
    // range in the chosen coordinate space. The explicit ancestor and entry
    // stacks make each hop O(1).
    fn collect_changes<C: CoordinateSpace>(
        &self,
        bounds: Option<(Point, Point, bool)>,
    ) -> Vec<Change> {
        let mut result = Vec::new();
        if self.root == NIL {
            return result;
        }

        let mut node_stack: NodeStack = SmallVec::new();
        let mut entry_stack: SmallVec<[PositionStackEntry; 16]> = SmallVec::new();
        entry_stack.push(PositionStackEntry::default());
        let mut preceding_old = 0u32;
        let mut preceding_new = 0u32;
        let mut node;

        // Position the walk on the last change starting at or before the
        // range start, or on the leftmost change if there is none.
        let mut candidate: Option<(u32, usize, usize, u32, u32)> = None;
        if let Some((start, _, _)) = bounds {
            let mut current = self.root;
            while current != NIL {
                let n = self.node(current);
                let entry = *entry_stack.last().unwrap();
                let old_start = entry.old_end.traverse(n.old_distance_from_left_ancestor);
                let new_start = entry.new_end.traverse(n.new_distance_from_left_ancestor);
                if C::choose(old_start, new_start) <= start {
                    candidate =
                        Some((current, node_stack.len(), entry_stack.len(), preceding_old, preceding_new));
                    if n.right == NIL {
                        break;
                    }
                    preceding_old += self.left_subtree_old_text_size(current) + n.own_old_text_size();
                    preceding_new += self.left_subtree_new_text_size(current) + n.own_new_text_size();
                    node_stack.push(current);
                    entry_stack.push(PositionStackEntry {
                        old_end: old_start.traverse(n.old_extent),
                        new_end: new_start.traverse(n.new_extent),
                    });
                    current = n.right;
                } else if n.left != NIL {
                    node_stack.push(current);
                    current = n.left;
                } else {
                    break;
                }
            }
        }

        match candidate {
            Some((found, node_depth, entry_depth, old, new)) => {
                node_stack.truncate(node_depth);
                entry_stack.truncate(entry_depth);
                preceding_old = old + self.left_subtree_old_text_size(found);
                preceding_new = new + self.left_subtree_new_text_size(found);
                node = found;
            }
            None => {
                node_stack.clear();
                entry_stack.clear();
                entry_stack.push(PositionStackEntry::default());
                preceding_old = 0;
                preceding_new = 0;
                node = self.root;
                while self.node(node).left != NIL {
                    node_stack.push(node);
                    node = self.node(node).left;
                }
            }
        }

        loop {
            let entry = *entry_stack.last().unwrap();
            let n = self.node(node);
            let old_start = entry.old_end.traverse(n.old_distance_from_left_ancestor);
            let new_start = entry.new_end.traverse(n.new_distance_from_left_ancestor);
            let old_end = old_start.traverse(n.old_extent);
            let new_end = new_start.traverse(n.new_extent);
            let change_start = C::choose(old_start, new_start);
            let change_end = C::choose(old_end, new_end);

            let mut done = false;
            match bounds {
                Some((start, end, inclusive)) => {
                    if inclusive {
                        if change_start > end {
                            done = true;
                        } else if change_end >= start {
                            result.push(Change {
                                old_start,
                                old_end,
                                new_start,
                                new_end,
                                old_text: n.old_text.clone(),
                                new_text: n.new_text.clone(),
                                preceding_old_text_size: preceding_old,
                                preceding_new_text_size: preceding_new,
                                old_text_size: n.own_old_text_size(),
                            });
                        }
                    } else if change_start >= end {
                        done = true;
                    } else if change_end > start {
                        result.push(Change {
                            old_start,
                            old_end,
                            new_start,
                            new_end,
                            old_text: n.old_text.clone(),
                            new_text: n.new_text.clone(),
                            preceding_old_text_size: preceding_old,
                            preceding_new_text_size: preceding_new,
                            old_text_size: n.own_old_text_size(),
                        });
                    }
                }
                None => {
                    result.push(Change {
                        old_start,
                        old_end,
                        new_start,
                        new_end,
                        old_text: n.old_text.clone(),
                        new_text: n.new_text.clone(),
                        preceding_old_text_size: preceding_old,
                        preceding_new_text_size: preceding_new,
                        old_text_size: n.own_old_text_size(),
                    });
                }
            }
            if done {
                break;
            }

            preceding_old += n.own_old_text_size();
            preceding_new += n.own_new_text_size();

            if n.right != NIL {
                entry_stack.push(PositionStackEntry { old_end, new_end });
                node_stack.push(node);
                node = n.right;
                while self.node(node).left != NIL {
                    node_stack.push(node);
                    node = self.node(node).left;
                }
            } else {
                loop {
                    match node_stack.last() {
                        Some(&parent) if self.node(parent).right == node => {
                            node_stack.pop();
                            entry_stack.pop();
                            node = parent;
                        }
                        _ => break,
                    }
                }
                match node_stack.pop() {
                    Some(parent) => node = parent,
                    None => break,
                }
            }
        }

        result
    }

    // --- splicing ---

    // Stitch the recorded old text of the changes overlapped by a splice
    // together with the freshly deleted text, so the combined change still
    // remembers the content of the region before any of the edits. If any
    // overlapped change has no old text, the information is already gone and
    // the result is None.
    fn compute_old_text(
        &self,
        deleted_text: Option<Text>,
        new_splice_start: Point,
        new_deletion_end: Point,
    ) -> Option<Text> {
        let deleted_text = deleted_text?;
        let mut result = Text::new();
        let overlapping = self.get_changes_in_new_range(
            new_splice_start,
            new_deletion_end,
            self.merges_adjacent_changes,
        );

        let mut slice_start = new_splice_start;
        let mut remaining = TextSlice::from(&deleted_text);
        for change in &overlapping {
            let old_text = change.old_text.as_ref()?;
            if change.new_start > slice_start {
                let (prefix, rest) = remaining.split(change.new_start.traversal(slice_start));
                result.append(prefix);
                slice_start = change.new_start;
                remaining = rest;
            }
            result.append(TextSlice::from(old_text));
            remaining = remaining.suffix(change.new_end.traversal(slice_start));
            slice_start = change.new_end.max(slice_start);
        }
        result.append(remaining);
        Some(result)
    }

    // Code-unit counterpart of compute_old_text, for changes that carry no
    // text payload. The part of the deleted span covered by an overlapped
    // change's new text belongs to that change, so it trades for the change's
    // old size; coverage is measured through the overlapped change's new
    // text when present.
    fn compute_old_text_size(
        &self,
        deleted_text_size: u32,
        new_splice_start: Point,
        new_deletion_end: Point,
    ) -> u32 {
        let overlapping = self.get_changes_in_new_range(
            new_splice_start,
            new_deletion_end,
            self.merges_adjacent_changes,
        );
        let mut result = deleted_text_size;
        for change in &overlapping {
            result += change.old_text_size;
            if let Some(new_text) = &change.new_text {
                let overlap_start = new_splice_start.max(change.new_start);
                let overlap_end = new_deletion_end.min(change.new_end);
                if overlap_end > overlap_start {
                    let from = new_text.offset_for_position(overlap_start.traversal(change.new_start));
                    let to = new_text.offset_for_position(overlap_end.traversal(change.new_start));
                    result -= to - from;
                }
            }
        }
        result
    }

    pub(crate) fn splice_impl(
        &mut self,
        new_splice_start: Point,
        new_deletion_extent: Point,
        new_insertion_extent: Point,
        deleted_text: Option<Text>,
        inserted_text: Option<Text>,
        deleted_text_size: u32,
    ) {
        if new_deletion_extent.is_zero() && new_insertion_extent.is_zero() {
            return;
        }

        let deleted_text_size =
            deleted_text.as_ref().map_or(deleted_text_size, |text| text.size());

        if self.root == NIL {
            self.root = self.build_node(
                NIL,
                NIL,
                new_splice_start,
                new_splice_start,
                new_deletion_extent,
                new_insertion_extent,
                deleted_text,
                inserted_text,
                deleted_text_size,
            );
            return;
        }

        let new_deletion_end = new_splice_start.traverse(new_deletion_extent);
        let new_insertion_end = new_splice_start.traverse(new_insertion_extent);

        let lower_bound = self.splay_node_starting_before::<NewCoordinates>(new_splice_start);
        let old_text = self.compute_old_text(deleted_text, new_splice_start, new_deletion_end);
        let old_text_size = if old_text.is_some() {
            0
        } else {
            self.compute_old_text_size(deleted_text_size, new_splice_start, new_deletion_end)
        };
        let upper_bound =
            self.splay_node_ending_after::<NewCoordinates>(new_splice_start, new_deletion_end);

        if let (Some(lower), Some(upper)) = (lower_bound, upper_bound) {
            if lower != upper && self.node(upper).left != lower {
                let upper_left = self.node(upper).left;
                self.rotate_node_right(lower, upper_left, upper);
            }
        }

        match (lower_bound, upper_bound) {
            (Some(lower), Some(upper)) => {
                let lower_old_start = self.node(lower).old_distance_from_left_ancestor;
                let lower_new_start = self.node(lower).new_distance_from_left_ancestor;
                let upper_old_start = self.node(upper).old_distance_from_left_ancestor;
                let upper_new_start = self.node(upper).new_distance_from_left_ancestor;
                let lower_old_end = lower_old_start.traverse(self.node(lower).old_extent);
                let lower_new_end = lower_new_start.traverse(self.node(lower).new_extent);
                let upper_old_end = upper_old_start.traverse(self.node(upper).old_extent);
                let upper_new_end = upper_new_start.traverse(self.node(upper).new_extent);

                let (overlaps_lower_bound, overlaps_upper_bound) = if self.merges_adjacent_changes {
                    (
                        new_splice_start <= lower_new_end,
                        new_deletion_end >= upper_new_start,
                    )
                } else {
                    (
                        new_splice_start < lower_new_end && new_deletion_end > lower_new_start,
                        new_splice_start < upper_new_end && new_deletion_end > upper_new_start,
                    )
                };

                if overlaps_lower_bound && overlaps_upper_bound {
                    let new_extent_prefix = new_splice_start.traversal(lower_new_start);
                    let new_extent_suffix = upper_new_end.traversal(new_deletion_end);

                    let new_text = match
                        (&inserted_text, &self.node(lower).new_text, &self.node(upper).new_text)
                    {
                        (Some(inserted), Some(lower_text), Some(upper_text)) => {
                            let prefix = TextSlice::from(lower_text).prefix(new_extent_prefix);
                            let suffix = TextSlice::from(upper_text)
                                .suffix(new_deletion_end.traversal(upper_new_start));
                            Some(Text::concat(&[prefix, TextSlice::from(inserted), suffix]))
                        }
                        _ => None,
                    };

                    {
                        let upper_node = self.node_mut(upper);
                        upper_node.old_extent = upper_old_end.traversal(lower_old_start);
                        upper_node.new_extent = new_extent_prefix
                            .traverse(new_insertion_extent)
                            .traverse(new_extent_suffix);
                        upper_node.old_distance_from_left_ancestor = lower_old_start;
                        upper_node.new_distance_from_left_ancestor = lower_new_start;
                        upper_node.new_text = new_text;
                        upper_node.old_text = old_text;
                        upper_node.old_text_size = old_text_size;
                    }

                    if lower == upper {
                        self.update_subtree_text_sizes(upper);
                        let root = self.root;
                        if self.node(root).old_extent.is_zero()
                            && self.node(root).new_extent.is_zero()
                        {
                            self.delete_root();
                        }
                    } else {
                        let lower_left = self.node(lower).left;
                        self.node_mut(upper).left = lower_left;
                        self.node_mut(lower).left = NIL;
                        self.delete_subtree(lower);
                        self.update_subtree_text_sizes(upper);
                    }
                } else if overlaps_upper_bound {
                    let old_splice_start =
                        lower_old_end.traverse(new_splice_start.traversal(lower_new_end));
                    let new_extent_suffix = upper_new_end.traversal(new_deletion_end);

                    let new_text = match (&inserted_text, &self.node(upper).new_text) {
                        (Some(inserted), Some(upper_text)) => {
                            let suffix = TextSlice::from(upper_text)
                                .suffix(new_deletion_end.traversal(upper_new_start));
                            Some(Text::concat(&[TextSlice::from(inserted), suffix]))
                        }
                        _ => None,
                    };

                    {
                        let upper_node = self.node_mut(upper);
                        upper_node.old_distance_from_left_ancestor = old_splice_start;
                        upper_node.new_distance_from_left_ancestor = new_splice_start;
                        upper_node.old_extent = upper_old_end.traversal(old_splice_start);
                        upper_node.new_extent = new_insertion_extent.traverse(new_extent_suffix);
                        upper_node.new_text = new_text;
                        upper_node.old_text = old_text;
                        upper_node.old_text_size = old_text_size;
                    }

                    let lower_right = self.node(lower).right;
                    self.node_mut(lower).right = NIL;
                    self.delete_subtree(lower_right);
                    self.update_subtree_text_sizes(lower);
                    if self.node(upper).left != lower {
                        let upper_left = self.node(upper).left;
                        self.node_mut(upper).left = NIL;
                        self.delete_subtree(upper_left);
                    }
                    self.update_subtree_text_sizes(upper);
                } else if overlaps_lower_bound {
                    let (rightmost_old_end, rightmost_new_end) = self.get_subtree_end(lower);
                    let old_deletion_end =
                        rightmost_old_end.traverse(new_deletion_end.traversal(rightmost_new_end));
                    let new_extent_prefix = new_splice_start.traversal(lower_new_start);

                    let new_text = match (&inserted_text, &self.node(lower).new_text) {
                        (Some(inserted), Some(lower_text)) => {
                            let prefix = TextSlice::from(lower_text).prefix(new_extent_prefix);
                            Some(Text::concat(&[prefix, TextSlice::from(inserted)]))
                        }
                        _ => None,
                    };

                    self.node_mut(upper).new_distance_from_left_ancestor =
                        new_insertion_end.traverse(upper_new_start.traversal(new_deletion_end));
                    {
                        let lower_node = self.node_mut(lower);
                        lower_node.old_extent = old_deletion_end.traversal(lower_old_start);
                        lower_node.new_extent = new_extent_prefix.traverse(new_insertion_extent);
                        lower_node.new_text = new_text;
                        lower_node.old_text = old_text;
                        lower_node.old_text_size = old_text_size;
                    }

                    let lower_right = self.node(lower).right;
                    self.node_mut(lower).right = NIL;
                    self.delete_subtree(lower_right);
                    self.update_subtree_text_sizes(lower);
                    self.update_subtree_text_sizes(upper);
                    self.rotate_node_right(lower, upper, NIL);
                } else if lower == upper {
                    // An insertion at the start of an existing change with
                    // merges_adjacent_changes disabled: the new change lands
                    // to the left of the existing node at the same position.
                    debug_assert!(!self.merges_adjacent_changes);
                    debug_assert!(new_deletion_extent.is_zero());

                    let upper_left = self.node(upper).left;
                    {
                        let upper_node = self.node_mut(upper);
                        upper_node.left = NIL;
                        upper_node.old_distance_from_left_ancestor = Point::zero();
                        upper_node.new_distance_from_left_ancestor = Point::zero();
                    }
                    self.update_subtree_text_sizes(upper);
                    self.root = self.build_node(
                        upper_left,
                        upper,
                        upper_old_start,
                        upper_new_start,
                        Point::zero(),
                        new_insertion_extent,
                        old_text,
                        inserted_text,
                        old_text_size,
                    );
                } else {
                    let (rightmost_old_end, rightmost_new_end) = self.get_subtree_end(lower);
                    let old_splice_start =
                        lower_old_end.traverse(new_splice_start.traversal(lower_new_end));
                    let old_deletion_end =
                        rightmost_old_end.traverse(new_deletion_end.traversal(rightmost_new_end));

                    let lower_right = self.node(lower).right;
                    self.node_mut(lower).right = NIL;
                    self.delete_subtree(lower_right);
                    self.update_subtree_text_sizes(lower);
                    {
                        let upper_node = self.node_mut(upper);
                        upper_node.left = NIL;
                        upper_node.old_distance_from_left_ancestor =
                            upper_old_start.traversal(old_deletion_end);
                        upper_node.new_distance_from_left_ancestor =
                            upper_new_start.traversal(new_deletion_end);
                    }
                    self.update_subtree_text_sizes(upper);
                    self.root = self.build_node(
                        lower,
                        upper,
                        old_splice_start,
                        new_splice_start,
                        old_deletion_end.traversal(old_splice_start),
                        new_insertion_extent,
                        old_text,
                        inserted_text,
                        old_text_size,
                    );
                }
            }

            (Some(lower), None) => {
                let lower_old_start = self.node(lower).old_distance_from_left_ancestor;
                let lower_new_start = self.node(lower).new_distance_from_left_ancestor;
                let lower_old_end = lower_old_start.traverse(self.node(lower).old_extent);
                let lower_new_end = lower_new_start.traverse(self.node(lower).new_extent);
                let (rightmost_old_end, rightmost_new_end) = self.get_subtree_end(lower);
                let old_deletion_end =
                    rightmost_old_end.traverse(new_deletion_end.traversal(rightmost_new_end));
                let overlaps_lower_bound = new_splice_start < lower_new_end
                    || (self.merges_adjacent_changes && new_splice_start == lower_new_end);

                let lower_right = self.node(lower).right;
                self.node_mut(lower).right = NIL;
                self.delete_subtree(lower_right);

                if overlaps_lower_bound {
                    let new_text = match (&inserted_text, &self.node(lower).new_text) {
                        (Some(inserted), Some(lower_text)) => {
                            let prefix = TextSlice::from(lower_text)
                                .prefix(new_splice_start.traversal(lower_new_start));
                            Some(Text::concat(&[prefix, TextSlice::from(inserted)]))
                        }
                        _ => None,
                    };

                    let lower_node = self.node_mut(lower);
                    lower_node.old_extent = old_deletion_end.traversal(lower_old_start);
                    lower_node.new_extent = new_insertion_end.traversal(lower_new_start);
                    lower_node.new_text = new_text;
                    lower_node.old_text = old_text;
                    lower_node.old_text_size = old_text_size;
                    self.update_subtree_text_sizes(lower);
                } else {
                    self.update_subtree_text_sizes(lower);
                    let old_splice_start =
                        lower_old_end.traverse(new_splice_start.traversal(lower_new_end));
                    self.root = self.build_node(
                        lower,
                        NIL,
                        old_splice_start,
                        new_splice_start,
                        old_deletion_end.traversal(old_splice_start),
                        new_insertion_extent,
                        old_text,
                        inserted_text,
                        old_text_size,
                    );
                }
            }

            (None, Some(upper)) => {
                let upper_old_start = self.node(upper).old_distance_from_left_ancestor;
                let upper_new_start = self.node(upper).new_distance_from_left_ancestor;
                let upper_new_end = upper_new_start.traverse(self.node(upper).new_extent);
                let overlaps_upper_bound = new_deletion_end > upper_new_start
                    || (self.merges_adjacent_changes && new_deletion_end == upper_new_start);

                let upper_left = self.node(upper).left;
                let old_deletion_end = if upper_left != NIL {
                    let (rightmost_old_end, rightmost_new_end) = self.get_subtree_end(upper_left);
                    rightmost_old_end.traverse(new_deletion_end.traversal(rightmost_new_end))
                } else {
                    new_deletion_end
                };

                self.node_mut(upper).left = NIL;
                self.delete_subtree(upper_left);

                if overlaps_upper_bound {
                    let new_text = match (&inserted_text, &self.node(upper).new_text) {
                        (Some(inserted), Some(upper_text)) => {
                            let suffix = TextSlice::from(upper_text)
                                .suffix(new_deletion_end.traversal(upper_new_start));
                            Some(Text::concat(&[TextSlice::from(inserted), suffix]))
                        }
                        _ => None,
                    };

                    let upper_node = self.node_mut(upper);
                    upper_node.old_distance_from_left_ancestor = new_splice_start;
                    upper_node.new_distance_from_left_ancestor = new_splice_start;
                    upper_node.old_extent = upper_old_start
                        .traversal(new_splice_start)
                        .traverse(upper_node.old_extent);
                    upper_node.new_extent = new_insertion_extent
                        .traverse(upper_new_end.traversal(new_deletion_end));
                    upper_node.new_text = new_text;
                    upper_node.old_text = old_text;
                    upper_node.old_text_size = old_text_size;
                    self.update_subtree_text_sizes(upper);
                } else {
                    let distance_to_upper_bound = upper_new_start.traversal(new_deletion_end);
                    {
                        let upper_node = self.node_mut(upper);
                        upper_node.old_distance_from_left_ancestor = distance_to_upper_bound;
                        upper_node.new_distance_from_left_ancestor = distance_to_upper_bound;
                    }
                    self.update_subtree_text_sizes(upper);
                    self.root = self.build_node(
                        NIL,
                        upper,
                        new_splice_start,
                        new_splice_start,
                        old_deletion_end.traversal(new_splice_start),
                        new_insertion_extent,
                        old_text,
                        inserted_text,
                        old_text_size,
                    );
                }
            }

            (None, None) => {
                let (rightmost_old_end, rightmost_new_end) = self.get_subtree_end(self.root);
                let old_deletion_end =
                    rightmost_old_end.traverse(new_deletion_end.traversal(rightmost_new_end));
                let root = self.root;
                self.root = NIL;
                self.delete_subtree(root);
                self.root = self.build_node(
                    NIL,
                    NIL,
                    new_splice_start,
                    new_splice_start,
                    old_deletion_end.traversal(new_splice_start),
                    new_insertion_extent,
                    old_text,
                    inserted_text,
                    old_text_size,
                );
            }
        }
    }

    fn splice_old_impl(
        &mut self,
        old_splice_start: Point,
        old_deletion_extent: Point,
        old_insertion_extent: Point,
    ) {
        if self.root == NIL {
            return;
        }

        let old_deletion_end = old_splice_start.traverse(old_deletion_extent);
        let old_insertion_end = old_splice_start.traverse(old_insertion_extent);

        let lower_bound = self.splay_node_ending_before::<OldCoordinates>(old_splice_start);
        let upper_bound =
            self.splay_node_starting_after::<OldCoordinates>(old_splice_start, old_deletion_end);

        if lower_bound.is_none() && upper_bound.is_none() {
            let root = self.root;
            self.root = NIL;
            self.delete_subtree(root);
            return;
        }

        if upper_bound == lower_bound {
            // A single zero-extent change sitting exactly at the splice
            // position: both its coordinates shift by the insertion.
            debug_assert!(old_deletion_extent.is_zero());
            let root = self.root;
            let root_node = self.node_mut(root);
            root_node.old_distance_from_left_ancestor = root_node
                .old_distance_from_left_ancestor
                .traverse(old_insertion_extent);
            root_node.new_distance_from_left_ancestor = root_node
                .new_distance_from_left_ancestor
                .traverse(old_insertion_extent);
            return;
        }

        if let (Some(lower), Some(upper)) = (lower_bound, upper_bound) {
            if self.node(upper).left != lower {
                let upper_left = self.node(upper).left;
                self.rotate_node_right(lower, upper_left, upper);
            }
        }

        let mut new_deletion_end = old_deletion_end;
        let mut new_insertion_end = old_insertion_end;

        if let Some(lower) = lower_bound {
            let lower_old_start = self.node(lower).old_distance_from_left_ancestor;
            let lower_new_start = self.node(lower).new_distance_from_left_ancestor;
            let lower_old_end = lower_old_start.traverse(self.node(lower).old_extent);
            let lower_new_end = lower_new_start.traverse(self.node(lower).new_extent);
            new_deletion_end = lower_new_end.traverse(old_deletion_end.traversal(lower_old_end));
            new_insertion_end = lower_new_end.traverse(old_insertion_end.traversal(lower_old_end));

            let lower_right = self.node(lower).right;
            self.node_mut(lower).right = NIL;
            self.delete_subtree(lower_right);
            self.update_subtree_text_sizes(lower);
        }

        if let Some(upper) = upper_bound {
            let distance_between_splice_and_upper_bound = self
                .node(upper)
                .old_distance_from_left_ancestor
                .traversal(old_deletion_end);
            {
                let upper_node = self.node_mut(upper);
                upper_node.old_distance_from_left_ancestor =
                    old_insertion_end.traverse(distance_between_splice_and_upper_bound);
                upper_node.new_distance_from_left_ancestor =
                    new_insertion_end.traverse(distance_between_splice_and_upper_bound);
            }

            if let Some(lower) = lower_bound {
                let lower_old_end = self
                    .node(lower)
                    .old_distance_from_left_ancestor
                    .traverse(self.node(lower).old_extent);
                if lower_old_end == self.node(upper).old_distance_from_left_ancestor {
                    // The shift has brought the two changes into contact;
                    // merge the lower one into the upper one.
                    let lower_old_text_size = self.node(lower).own_old_text_size();
                    let upper_old_text_size = self.node(upper).own_old_text_size();

                    let lower_node = self.node_mut(lower);
                    let lower_old_dist = lower_node.old_distance_from_left_ancestor;
                    let lower_new_dist = lower_node.new_distance_from_left_ancestor;
                    let lower_old_extent = lower_node.old_extent;
                    let lower_new_extent = lower_node.new_extent;
                    let lower_old_text = lower_node.old_text.take();
                    let lower_new_text = lower_node.new_text.take();
                    let lower_left = lower_node.left;

                    let upper_old_text = self.node_mut(upper).old_text.take();
                    let upper_new_text = self.node_mut(upper).new_text.take();

                    let merged_old_text = match (lower_old_text, upper_old_text) {
                        (Some(a), Some(b)) => {
                            Some(Text::concat(&[TextSlice::from(&a), TextSlice::from(&b)]))
                        }
                        _ => None,
                    };
                    let merged_new_text = match (lower_new_text, upper_new_text) {
                        (Some(a), Some(b)) => {
                            Some(Text::concat(&[TextSlice::from(&a), TextSlice::from(&b)]))
                        }
                        _ => None,
                    };

                    {
                        let upper_node = self.node_mut(upper);
                        upper_node.old_distance_from_left_ancestor = lower_old_dist;
                        upper_node.new_distance_from_left_ancestor = lower_new_dist;
                        upper_node.old_extent = lower_old_extent.traverse(upper_node.old_extent);
                        upper_node.new_extent = lower_new_extent.traverse(upper_node.new_extent);
                        upper_node.old_text = merged_old_text;
                        upper_node.new_text = merged_new_text;
                        upper_node.old_text_size = lower_old_text_size + upper_old_text_size;
                        upper_node.left = lower_left;
                    }
                    self.free_node(lower);
                }
            } else {
                let upper_left = self.node(upper).left;
                self.node_mut(upper).left = NIL;
                self.delete_subtree(upper_left);
            }
            self.update_subtree_text_sizes(upper);
        }
    }

    fn serialize_node(&self, output: &mut Serializer, id: u32) {
        let node = self.node(id);
        node.old_extent.serialize(output);
        node.new_extent.serialize(output);
        node.old_distance_from_left_ancestor.serialize(output);
        node.new_distance_from_left_ancestor.serialize(output);
        Self::serialize_optional_text(output, node.old_text.as_ref());
        Self::serialize_optional_text(output, node.new_text.as_ref());
    }

    fn serialize_optional_text(output: &mut Serializer, text: Option<&Text>) {
        match text {
            Some(text) => {
                output.append_u32(1);
                text.serialize(output);
            }
            None => output.append_u32(0),
        }
    }

    fn deserialize_node(input: &mut Deserializer) -> Node {
        let old_extent = Point::deserialize(input);
        let new_extent = Point::deserialize(input);
        let old_distance_from_left_ancestor = Point::deserialize(input);
        let new_distance_from_left_ancestor = Point::deserialize(input);
        let old_text = Self::deserialize_optional_text(input);
        let new_text = Self::deserialize_optional_text(input);
        Node {
            left: NIL,
            right: NIL,
            old_distance_from_left_ancestor,
            new_distance_from_left_ancestor,
            old_extent,
            new_extent,
            old_text,
            new_text,
            old_text_size: 0,
            subtree_old_text_size: 0,
            subtree_new_text_size: 0,
        }
    }

    fn deserialize_optional_text(input: &mut Deserializer) -> Option<Text> {
        if input.read_u32() != 0 {
            Some(Text::deserialize(input))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(
        old_start: (u32, u32),
        old_end: (u32, u32),
        new_start: (u32, u32),
        new_end: (u32, u32),
        old_text: Option<&str>,
        new_text: Option<&str>,
    ) -> Change {
        Change {
            old_start: old_start.into(),
            old_end: old_end.into(),
            new_start: new_start.into(),
            new_end: new_end.into(),
            old_text: old_text.map(Text::from),
            new_text: new_text.map(Text::from),
            preceding_old_text_size: 0,
            preceding_new_text_size: 0,
            old_text_size: 0,
        }
    }

    fn splice(
        patch: &mut Patch,
        start: (u32, u32),
        deletion: (u32, u32),
        insertion: (u32, u32),
    ) {
        patch
            .splice(start.into(), deletion.into(), insertion.into(), None, None, 0)
            .unwrap();
    }

    fn splice_with_text(
        patch: &mut Patch,
        start: (u32, u32),
        deletion: (u32, u32),
        insertion: (u32, u32),
        deleted: &str,
        inserted: &str,
    ) {
        patch
            .splice(
                start.into(),
                deletion.into(),
                insertion.into(),
                Some(Text::from(deleted)),
                Some(Text::from(inserted)),
                0,
            )
            .unwrap();
    }

    #[test]
    fn splice_simple_non_overlapping() {
        let mut patch = Patch::new(true);

        splice(&mut patch, (0, 5), (0, 3), (0, 4));
        splice(&mut patch, (0, 10), (0, 3), (0, 4));
        assert_eq!(
            patch.get_changes(),
            vec![
                change((0, 5), (0, 8), (0, 5), (0, 9), None, None),
                change((0, 9), (0, 12), (0, 10), (0, 14), None, None),
            ]
        );

        splice(&mut patch, (0, 2), (0, 2), (0, 1));
        assert_eq!(
            patch.get_changes(),
            vec![
                change((0, 2), (0, 4), (0, 2), (0, 3), None, None),
                change((0, 5), (0, 8), (0, 4), (0, 8), None, None),
                change((0, 9), (0, 12), (0, 9), (0, 13), None, None),
            ]
        );

        splice(&mut patch, (0, 0), (0, 0), (0, 10));
        assert_eq!(
            patch.get_changes(),
            vec![
                change((0, 0), (0, 0), (0, 0), (0, 10), None, None),
                change((0, 2), (0, 4), (0, 12), (0, 13), None, None),
                change((0, 5), (0, 8), (0, 14), (0, 18), None, None),
                change((0, 9), (0, 12), (0, 19), (0, 23), None, None),
            ]
        );
    }

    #[test]
    fn splice_overlapping_with_text() {
        let mut patch = Patch::new(true);

        splice_with_text(&mut patch, (0, 5), (0, 3), (0, 4), "abc", "1234");
        assert_eq!(
            patch.get_changes(),
            vec![change((0, 5), (0, 8), (0, 5), (0, 9), Some("abc"), Some("1234"))]
        );

        // Overlaps the lower bound, has no upper bound.
        splice_with_text(&mut patch, (0, 7), (0, 3), (0, 4), "34d", "5678");
        assert_eq!(
            patch.get_changes(),
            vec![change((0, 5), (0, 9), (0, 5), (0, 11), Some("abcd"), Some("125678"))]
        );

        // Overlaps the upper bound, has no lower bound.
        splice_with_text(&mut patch, (0, 3), (0, 3), (0, 4), "efa", "1234");
        assert_eq!(
            patch.get_changes(),
            vec![change((0, 3), (0, 9), (0, 3), (0, 12), Some("efabcd"), Some("123425678"))]
        );

        // Doesn't overlap the lower bound, has no upper bound.
        splice_with_text(&mut patch, (0, 15), (0, 3), (0, 4), "ghi", "5678");
        let changes = patch.get_changes();
        assert_eq!(
            changes,
            vec![
                change((0, 3), (0, 9), (0, 3), (0, 12), Some("efabcd"), Some("123425678")),
                change((0, 12), (0, 15), (0, 15), (0, 19), Some("ghi"), Some("5678")),
            ]
        );
        assert_eq!(changes[1].preceding_old_text_size, 6);
        assert_eq!(changes[1].preceding_new_text_size, 9);

        // Surrounds two changes, has no lower or upper bound.
        splice_with_text(&mut patch, (0, 1), (0, 21), (0, 5), "xx123425678yyy5678zzz", "99999");
        assert_eq!(
            patch.get_changes(),
            vec![change(
                (0, 1),
                (0, 18),
                (0, 1),
                (0, 6),
                Some("xxefabcdyyyghizzz"),
                Some("99999")
            )]
        );
    }

    #[test]
    fn splice_tracks_deleted_text_sizes_without_text() {
        let mut patch = Patch::new(true);
        let ins = |patch: &mut Patch, start: (u32, u32), del: (u32, u32), text: &str, size: u32| {
            patch
                .splice(
                    start.into(),
                    del.into(),
                    Point::new(0, text.len() as u32),
                    None,
                    Some(Text::from(text)),
                    size,
                )
                .unwrap();
        };

        ins(&mut patch, (0, 2), (0, 3), "xxxxx", 3);
        ins(&mut patch, (1, 0), (0, 0), "x", 0);
        assert_eq!(patch.get_changes().last().unwrap().preceding_old_text_size, 3);

        ins(&mut patch, (0, 1), (0, 2), "xxxxx", 2);
        assert_eq!(patch.get_changes().last().unwrap().preceding_old_text_size, 4);

        ins(&mut patch, (0, 8), (0, 4), "xxxxx", 4);
        assert_eq!(patch.get_changes().last().unwrap().preceding_old_text_size, 6);

        ins(&mut patch, (0, 5), (0, 3), "xxxxx", 3);
        assert_eq!(patch.get_changes().last().unwrap().preceding_old_text_size, 6);

        ins(&mut patch, (0, 0), (0, 16), "xxxxx", 16);
        assert_eq!(patch.get_changes().last().unwrap().preceding_old_text_size, 8);
    }

    #[test]
    fn changes_in_new_range() {
        let mut patch = Patch::new(true);

        splice(&mut patch, (0, 5), (0, 3), (0, 4));
        splice(&mut patch, (0, 10), (0, 3), (0, 4));
        splice(&mut patch, (0, 2), (0, 2), (0, 1));
        splice(&mut patch, (0, 0), (0, 0), (0, 10));

        assert_eq!(
            patch.get_changes_in_new_range(Point::new(0, 12), Point::new(0, 20), false),
            vec![
                change((0, 2), (0, 4), (0, 12), (0, 13), None, None),
                change((0, 5), (0, 8), (0, 14), (0, 18), None, None),
                change((0, 9), (0, 12), (0, 19), (0, 23), None, None),
            ]
        );

        assert_eq!(
            patch.get_changes_in_new_range(Point::new(0, 12), Point::new(0, 15), false),
            vec![
                change((0, 2), (0, 4), (0, 12), (0, 13), None, None),
                change((0, 5), (0, 8), (0, 14), (0, 18), None, None),
            ]
        );
    }

    #[test]
    fn changes_in_old_range() {
        let mut patch = Patch::new(true);

        splice(&mut patch, (0, 5), (0, 3), (0, 4));
        splice(&mut patch, (0, 10), (0, 3), (0, 4));
        splice(&mut patch, (0, 0), (0, 0), (0, 10));

        assert_eq!(
            patch.get_changes_in_old_range(Point::new(0, 5), Point::new(0, 10)),
            vec![
                change((0, 5), (0, 8), (0, 15), (0, 19), None, None),
                change((0, 9), (0, 12), (0, 20), (0, 24), None, None),
            ]
        );
        assert_eq!(
            patch.get_changes_in_old_range(Point::new(0, 5), Point::new(0, 9)),
            vec![change((0, 5), (0, 8), (0, 15), (0, 19), None, None)]
        );
    }

    #[test]
    fn point_queries() {
        let mut patch = Patch::new(true);
        splice(&mut patch, (0, 5), (0, 3), (0, 4));
        splice(&mut patch, (0, 10), (0, 3), (0, 4));

        let change = patch.find_change_for_new_position(Point::new(0, 11)).unwrap();
        assert_eq!(change.new_start, Point::new(0, 10));
        assert_eq!(change.old_start, Point::new(0, 9));

        let change = patch.find_change_for_new_position(Point::new(0, 0));
        assert!(change.is_none());

        let change = patch.change_for_new_position(Point::new(0, 6)).unwrap();
        assert_eq!(change.new_start, Point::new(0, 5));

        let change = patch.find_change_ending_after_new_position(Point::new(0, 9)).unwrap();
        assert_eq!(change.new_start, Point::new(0, 10));
        let change = patch.find_change_ending_after_new_position(Point::new(0, 20));
        assert!(change.is_none());
    }

    #[test]
    fn insertion_at_existing_change_start_without_merging() {
        let mut patch = Patch::new(false);
        splice_with_text(&mut patch, (0, 5), (0, 0), (0, 3), "", "abc");
        splice_with_text(&mut patch, (0, 5), (0, 0), (0, 2), "", "de");
        assert_eq!(
            patch.get_changes(),
            vec![
                change((0, 5), (0, 5), (0, 5), (0, 7), Some(""), Some("de")),
                change((0, 5), (0, 5), (0, 7), (0, 10), Some(""), Some("abc")),
            ]
        );
    }

    #[test]
    fn coalesces_changes_that_cancel_out() {
        let mut patch = Patch::new(true);
        splice_with_text(&mut patch, (0, 5), (0, 0), (0, 3), "", "abc");
        splice_with_text(&mut patch, (0, 5), (0, 3), (0, 0), "abc", "");
        assert_eq!(patch.get_changes(), vec![]);
        assert_eq!(patch.get_change_count(), 0);
    }

    #[test]
    fn splice_old_shifts_the_old_side() {
        let mut patch = Patch::new(true);
        splice(&mut patch, (0, 5), (0, 3), (0, 4));
        splice(&mut patch, (0, 12), (0, 4), (0, 4));

        patch.splice_old(Point::new(0, 0), Point::new(0, 0), Point::new(0, 3)).unwrap();
        assert_eq!(
            patch.get_changes(),
            vec![
                change((0, 8), (0, 11), (0, 8), (0, 12), None, None),
                change((0, 14), (0, 18), (0, 15), (0, 19), None, None),
            ]
        );
    }

    #[test]
    fn splice_old_merges_changes_brought_into_contact() {
        let mut patch = Patch::new(true);
        splice(&mut patch, (0, 5), (0, 3), (0, 3));
        splice(&mut patch, (0, 10), (0, 3), (0, 3));

        // Delete the two old-space units separating the changes.
        patch.splice_old(Point::new(0, 8), Point::new(0, 2), Point::new(0, 0)).unwrap();
        assert_eq!(
            patch.get_changes(),
            vec![change((0, 5), (0, 11), (0, 5), (0, 11), None, None)]
        );
    }

    #[test]
    fn frozen_patches_reject_splices() {
        let mut patch = Patch::new(true);
        splice(&mut patch, (0, 5), (0, 3), (0, 4));

        let mut serializer = Serializer::new();
        patch.serialize(&mut serializer);
        let bytes = serializer.into_bytes();
        let mut frozen = Patch::deserialize(&mut Deserializer::new(&bytes));

        assert!(frozen.is_frozen());
        assert_eq!(
            frozen.splice(Point::zero(), Point::zero(), Point::new(0, 1), None, None, 0),
            Err(FrozenPatchError)
        );
        assert_eq!(
            frozen.splice_old(Point::zero(), Point::zero(), Point::new(0, 1)),
            Err(FrozenPatchError)
        );

        let mut thawed = frozen.copy();
        assert!(!thawed.is_frozen());
        assert!(thawed
            .splice(Point::zero(), Point::zero(), Point::new(0, 1), None, None, 0)
            .is_ok());
    }

    #[test]
    fn serialization_round_trips_through_a_splayed_tree() {
        let mut patch = Patch::new(true);
        splice(&mut patch, (0, 5), (0, 3), (0, 4));
        splice(&mut patch, (0, 10), (0, 3), (0, 4));
        splice(&mut patch, (0, 2), (0, 2), (0, 1));
        splice(&mut patch, (0, 0), (0, 0), (0, 10));
        // Splay an interior node so the serialized tree is not a vine.
        let splayed = patch.change_for_old_position(Point::new(0, 5));
        assert!(splayed.is_some());

        let expected = patch.get_changes();
        let mut serializer = Serializer::new();
        patch.serialize(&mut serializer);
        let bytes = serializer.into_bytes();

        let copy = Patch::deserialize(&mut Deserializer::new(&bytes));
        assert_eq!(copy.get_changes(), expected);
        assert_eq!(copy.get_change_count(), 4);
    }

    #[test]
    fn deserializing_garbage_produces_an_empty_patch() {
        let patch = Patch::deserialize(&mut Deserializer::new(&[1, 2, 3]));
        assert_eq!(patch.get_changes(), vec![]);

        let mut serializer = Serializer::new();
        serializer.append_u32(99);
        serializer.append_u32(1);
        let bytes = serializer.into_bytes();
        let patch = Patch::deserialize(&mut Deserializer::new(&bytes));
        assert_eq!(patch.get_changes(), vec![]);
    }

    #[test]
    fn invert_swaps_coordinate_spaces() {
        let mut patch = Patch::new(true);
        splice_with_text(&mut patch, (0, 5), (0, 3), (0, 4), "abc", "1234");
        splice_with_text(&mut patch, (0, 10), (0, 3), (0, 4), "def", "5678");

        let inverted = patch.invert();
        assert_eq!(
            inverted.get_changes(),
            vec![
                change((0, 5), (0, 9), (0, 5), (0, 8), Some("1234"), Some("abc")),
                change((0, 10), (0, 14), (0, 9), (0, 12), Some("5678"), Some("def")),
            ]
        );
        assert_eq!(inverted.invert().get_changes(), patch.get_changes());
    }

    #[test]
    fn compose_is_associative() {
        let mut a = Patch::new(true);
        splice_with_text(&mut a, (0, 2), (0, 2), (0, 3), "cd", "xyz");
        let mut b = Patch::new(true);
        splice_with_text(&mut b, (0, 0), (0, 1), (0, 1), "a", "A");
        let mut c = Patch::new(true);
        splice_with_text(&mut c, (0, 4), (0, 2), (0, 1), "zf", "q");

        let bc = Patch::compose(&[&b, &c]);
        let left = Patch::compose(&[&a, &bc]);
        let right = Patch::compose(&[&a, &b, &c]);
        assert_eq!(left.get_changes(), right.get_changes());
    }

    #[test]
    fn rebalance_preserves_changes() {
        let mut patch = Patch::new(true);
        for i in 0..40u32 {
            splice(&mut patch, (0, i * 10), (0, 2), (0, 3));
        }
        let before = patch.get_changes();
        patch.rebalance();
        assert_eq!(patch.get_changes(), before);
    }

    #[test]
    fn randomized_splices_agree_with_a_naive_text_model() {
        use rand::prelude::*;

        for seed in 0..40u64 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let original = Text::from("abcdefghijklmnopqrstuvwxyz");
            let mut current = original.clone();
            let mut patch = Patch::new(true);

            for _ in 0..12 {
                let size = current.size();
                let start = rng.gen_range(0..=size);
                let deleted_count = rng.gen_range(0..=(size - start).min(5));
                let inserted_count = rng.gen_range(0..=5u32);
                let inserted_units: Vec<u16> =
                    (0..inserted_count).map(|_| rng.gen_range(b'a'..=b'z') as u16).collect();
                let inserted = Text::from_units(inserted_units);

                let start_point = Point::new(0, start);
                let deletion_extent = Point::new(0, deleted_count);
                let deleted = Text::from_units(
                    current.content[start as usize..(start + deleted_count) as usize].to_vec(),
                );

                patch
                    .splice(
                        start_point,
                        deletion_extent,
                        inserted.extent(),
                        Some(deleted),
                        Some(inserted.clone()),
                        0,
                    )
                    .unwrap();
                current.splice(start_point, deletion_extent, TextSlice::from(&inserted));
            }

            for change in patch.get_changes() {
                let old_text = change.old_text.unwrap();
                let new_text = change.new_text.unwrap();
                assert_eq!(
                    TextSlice::from(&original)
                        .slice(crate::range::Range::new(change.old_start, change.old_end))
                        .to_text(),
                    old_text,
                    "seed {}",
                    seed
                );
                assert_eq!(
                    TextSlice::from(&current)
                        .slice(crate::range::Range::new(change.new_start, change.new_end))
                        .to_text(),
                    new_text,
                    "seed {}",
                    seed
                );
            }
        }
    }
}
