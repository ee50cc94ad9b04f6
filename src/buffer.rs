//! A text buffer assembled from an immutable base text plus a stack of patch
//! layers. The bottom of the stack is the base [`Text`]; every layer above it
//! owns a [`Patch`] whose old coordinates are the layer below and whose new
//! coordinates are its own. The writer mutates only the top layer.
//!
//! Snapshots freeze the top layer behind an `Arc`: the chain of frozen layers
//! is immutable and `Send + Sync`, so any number of reader threads can hold
//! snapshots while the writer keeps editing. Layers whose snapshots are all
//! gone are folded back into the writable top right before the next write.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use log::debug;
use regex::Regex;

use crate::patch::Patch;
use crate::point::Point;
use crate::range::Range;
use crate::serializer::{Deserializer, Serializer};
use crate::subsequence::{match_subsequence, SubsequenceMatch};
use crate::text::{ClipResult, Text, CR, LF};
use crate::text_slice::TextSlice;

// An immutable layer: the patch that produced it, plus its cached size and
// extent. `previous` is the next layer down; `None` means the base text.
#[derive(Debug)]
struct Layer {
    previous: Option<Arc<Layer>>,
    patch: Patch,
    size: u32,
    extent: Point,
}

struct TopLayer {
    patch: Patch,
    size: u32,
    extent: Point,
}

pub struct TextBuffer {
    base: Arc<Text>,
    frozen: Option<Arc<Layer>>,
    top: TopLayer,
}

/// A read-only view of the buffer pinned to the layer stack that existed when
/// it was created. Snapshots are cheap to clone and safe to read from other
/// threads while the buffer continues to change.
#[derive(Clone)]
pub struct Snapshot {
    base: Arc<Text>,
    layer: Option<Arc<Layer>>,
}

#[derive(Copy, Clone)]
struct Level<'a> {
    patch: &'a Patch,
    size: u32,
}

// A borrowed view of the whole stack; levels[0] is the top. Reads recurse
// down a `depth` index, with `levels.len()` standing for the base text.
struct LayerStack<'a> {
    levels: Vec<Level<'a>>,
    extent: Point,
    base: &'a Text,
}

fn previous_column(position: Point) -> Point {
    debug_assert!(position.column > 0);
    Point::new(position.row, position.column - 1)
}

impl<'a> LayerStack<'a> {
    fn size(&self) -> u32 {
        self.level_size(0)
    }

    fn level_size(&self, depth: usize) -> u32 {
        if depth == self.levels.len() {
            self.base.size()
        } else {
            self.levels[depth].size
        }
    }

    fn character_at(&self, depth: usize, position: Point) -> u16 {
        if depth == self.levels.len() {
            return self.base.char_at(position).unwrap_or(0);
        }
        match self.levels[depth].patch.find_change_for_new_position(position) {
            None => self.character_at(depth + 1, position),
            Some(change) => {
                if position < change.new_end {
                    match change.new_text {
                        Some(text) => {
                            text.char_at(position.traversal(change.new_start)).unwrap_or(0)
                        }
                        None => 0,
                    }
                } else {
                    self.character_at(
                        depth + 1,
                        change.old_end.traverse(position.traversal(change.new_end)),
                    )
                }
            }
        }
    }

    // Clamp a position to the addressable buffer and resolve its code-unit
    // offset, never letting the result fall between a '\r' and a '\n' even
    // when the pair straddles a change boundary.
    fn clip_position(&self, depth: usize, position: Point) -> ClipResult {
        if depth == self.levels.len() {
            return self.base.clip_position(position);
        }
        let level = self.levels[depth];
        let Some(change) = level.patch.find_change_for_new_position(position) else {
            return self.clip_position(depth + 1, position);
        };

        let preceding_base_offset = self.clip_position(depth + 1, change.old_start).offset;
        let preceding_current_offset = preceding_base_offset + change.preceding_new_text_size
            - change.preceding_old_text_size;
        let new_text_size = change.new_text_size();

        if position < change.new_end {
            let position_within_change = match change.new_text {
                Some(text) => text.clip_position(position.traversal(change.new_start)),
                None => ClipResult { position: Point::zero(), offset: 0 },
            };

            // An inserted text starting with '\n' may complete a '\r' that
            // lives in the layer below.
            if position_within_change.offset == 0
                && change.old_start.column > 0
                && change.new_text.and_then(|text| text.first()) == Some(LF)
                && self.character_at(depth + 1, previous_column(change.old_start)) == CR
            {
                return ClipResult {
                    position: previous_column(change.new_start),
                    offset: preceding_current_offset - 1,
                };
            }

            ClipResult {
                position: change.new_start.traverse(position_within_change.position),
                offset: preceding_current_offset + position_within_change.offset,
            }
        } else {
            let base_location = self.clip_position(
                depth + 1,
                change.old_end.traverse(position.traversal(change.new_end)),
            );
            let distance_past_change = ClipResult {
                position: base_location.position.traversal(change.old_end),
                offset: base_location.offset - (preceding_base_offset + change.old_text_size),
            };

            if distance_past_change.offset == 0 && base_location.offset < self.level_size(depth + 1)
            {
                let previous_character = if new_text_size > 0 {
                    change.new_text.and_then(|text| text.last()).unwrap_or(0)
                } else if change.old_start.column > 0 {
                    self.character_at(depth + 1, previous_column(change.old_start))
                } else {
                    0
                };

                if previous_character == CR
                    && self.character_at(depth + 1, base_location.position) == LF
                {
                    // Clip back onto the '\r'. When the change's inserted
                    // text ends with it, the '\r' sits on the text's final
                    // row, which its own extent counts as already closed.
                    let position = match change.new_text {
                        Some(text) if new_text_size > 0 => change
                            .new_start
                            .traverse(text.position_for_offset(new_text_size - 1, 0, false)),
                        _ => previous_column(change.new_end),
                    };
                    return ClipResult {
                        position,
                        offset: preceding_current_offset + new_text_size - 1,
                    };
                }
            }

            ClipResult {
                position: change.new_end.traverse(distance_past_change.position),
                offset: preceding_current_offset + new_text_size + distance_past_change.offset,
            }
        }
    }

    // Emit the text in `[start, end)` as slices, alternating between the
    // patch's inserted texts and ranges of the layers below.
    fn push_chunks(&self, depth: usize, output: &mut Vec<TextSlice<'a>>, start: Point, end: Point) {
        if depth == self.levels.len() {
            let slice = TextSlice::from(self.base).slice(Range::new(start, end));
            if !slice.is_empty() {
                output.push(slice);
            }
            return;
        }
        let level = self.levels[depth];

        let goal_position = self.clip_position(depth, end).position;
        let mut current_position = self.clip_position(depth, start).position;
        let mut base_position = current_position;
        let mut change = level.patch.find_change_for_new_position(current_position);

        while current_position < goal_position {
            if let Some(found) = change {
                if current_position < found.new_end {
                    if let Some(new_text) = found.new_text {
                        let slice = TextSlice::from(new_text)
                            .prefix(
                                goal_position
                                    .traversal(found.new_start)
                                    .min(found.new_end.traversal(found.new_start)),
                            )
                            .suffix(current_position.traversal(found.new_start));
                        if !slice.is_empty() {
                            output.push(slice);
                        }
                    }
                    base_position = found.old_end;
                    current_position = found.new_end;
                    if current_position > goal_position {
                        break;
                    }
                }
                base_position = found.old_end.traverse(current_position.traversal(found.new_end));
            }

            change = level.patch.find_change_ending_after_new_position(current_position);
            let (next_position, next_base_position) = match change {
                Some(next) => (
                    goal_position.min(next.new_start),
                    base_position
                        .traverse(goal_position.traversal(current_position))
                        .min(next.old_start),
                ),
                None => (
                    goal_position,
                    base_position.traverse(goal_position.traversal(current_position)),
                ),
            };

            self.push_chunks(depth + 1, output, base_position, next_base_position);
            base_position = next_base_position;
            current_position = next_position;
        }
    }

    fn chunks_in_range(&self, range: Range) -> Vec<TextSlice<'a>> {
        let mut chunks = Vec::new();
        self.push_chunks(0, &mut chunks, range.start, range.end);
        chunks
    }

    fn text_in_range(&self, range: Range) -> Text {
        let mut text = Text::new();
        for chunk in self.chunks_in_range(range) {
            text.append(chunk);
        }
        text
    }

    fn line_length_for_row(&self, row: u32) -> u32 {
        self.clip_position(0, Point::new(row, u32::MAX)).position.column
    }

    fn position_for_offset(&self, offset: u32) -> Point {
        let offset = offset.min(self.size());
        let mut low = 0u32;
        let mut high = self.extent.row;
        while low < high {
            let mid = (low + high + 1) / 2;
            if self.clip_position(0, Point::new(mid, 0)).offset <= offset {
                low = mid;
            } else {
                high = mid - 1;
            }
        }
        let row_start = self.clip_position(0, Point::new(low, 0)).offset;
        let column = (offset - row_start).min(self.line_length_for_row(low));
        Point::new(low, column)
    }

    fn search_in_range(&self, regex: &Regex, range: Range, limit: Option<usize>) -> Vec<Range> {
        let mut results = Vec::new();
        if limit == Some(0) {
            return results;
        }
        let start = self.clip_position(0, range.start);
        let end = self.clip_position(0, range.end);
        let text = self.text_in_range(Range::new(start.position, end.position));
        // A lone surrogate and its replacement character both occupy one
        // UTF-16 unit, so the lossy conversion preserves every offset.
        let haystack = String::from_utf16_lossy(&text.content);

        let mut previous_byte = 0;
        let mut previous_unit = 0usize;
        for found in regex.find_iter(&haystack) {
            let match_start =
                previous_unit + str_indices::utf16::count(&haystack[previous_byte..found.start()]);
            let match_end =
                match_start + str_indices::utf16::count(&haystack[found.start()..found.end()]);
            previous_byte = found.end();
            previous_unit = match_end;

            results.push(Range::new(
                self.position_for_offset(start.offset + match_start as u32),
                self.position_for_offset(start.offset + match_end as u32),
            ));
            if limit.is_some_and(|limit| results.len() >= limit) {
                break;
            }
        }
        results
    }

    fn find_words_with_subsequence_in_range(
        &self,
        query: &str,
        extra_word_characters: &str,
        range: Range,
    ) -> Vec<SubsequenceMatch> {
        let query_units: Vec<u16> = query.encode_utf16().collect();
        if query_units.is_empty() {
            return Vec::new();
        }
        let extra_units: Vec<u16> = extra_word_characters.encode_utf16().collect();

        let start = self.clip_position(0, range.start).position;
        let end = self.clip_position(0, range.end).position;
        let text = self.text_in_range(Range::new(start, end));

        let is_word_unit = |unit: u16| {
            extra_units.contains(&unit)
                || unit == b'_' as u16
                || char::from_u32(unit as u32).map_or(true, |c| c.is_alphanumeric())
        };

        let mut words: BTreeMap<Vec<u16>, Vec<Point>> = BTreeMap::new();
        let mut position = start;
        let mut word_start = position;
        let mut current_word: Vec<u16> = Vec::new();
        let units = &text.content;
        for (i, &unit) in units.iter().enumerate() {
            if unit != LF && unit != CR && is_word_unit(unit) {
                if current_word.is_empty() {
                    word_start = position;
                }
                current_word.push(unit);
            } else if !current_word.is_empty() {
                words.entry(mem::take(&mut current_word)).or_default().push(word_start);
            }

            if unit == LF {
                position = Point::new(position.row + 1, 0);
            } else if unit == CR {
                if units.get(i + 1) == Some(&LF) {
                    position = Point::new(position.row, position.column + 1);
                } else {
                    position = Point::new(position.row + 1, 0);
                }
            } else {
                position = Point::new(position.row, position.column + 1);
            }
        }
        if !current_word.is_empty() {
            words.entry(current_word).or_default().push(word_start);
        }

        let mut matches = Vec::new();
        for (word, positions) in words {
            if let Some((match_indices, score)) = match_subsequence(&query_units, &word) {
                matches.push(SubsequenceMatch {
                    word: String::from_utf16_lossy(&word).into(),
                    positions,
                    match_indices,
                    score,
                });
            }
        }
        matches.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.word.cmp(&b.word)));
        matches
    }
}

impl TextBuffer {
    pub fn new() -> TextBuffer {
        TextBuffer::from(Text::new())
    }

    fn stack(&self) -> LayerStack<'_> {
        let mut levels =
            vec![Level { patch: &self.top.patch, size: self.top.size }];
        let mut layer = self.frozen.as_deref();
        while let Some(frozen) = layer {
            levels.push(Level { patch: &frozen.patch, size: frozen.size });
            layer = frozen.previous.as_deref();
        }
        LayerStack { levels, extent: self.top.extent, base: &self.base }
    }

    pub fn size(&self) -> u32 {
        self.top.size
    }

    pub fn extent(&self) -> Point {
        self.top.extent
    }

    pub fn line_count(&self) -> u32 {
        self.top.extent.row + 1
    }

    pub fn line_length_for_row(&self, row: u32) -> u32 {
        self.stack().line_length_for_row(row)
    }

    /// The terminator of the given row: `Some("")` for the final row, `None`
    /// past the end of the buffer.
    pub fn line_ending_for_row(&self, row: u32) -> Option<&'static str> {
        if row > self.extent().row {
            return None;
        }
        let length = self.line_length_for_row(row);
        let terminator = self
            .stack()
            .text_in_range(Range::new(Point::new(row, length), Point::new(row + 1, 0)));
        Some(match terminator.content.as_slice() {
            [unit] if *unit == LF => "\n",
            [unit] if *unit == CR => "\r",
            [first, second] if *first == CR && *second == LF => "\r\n",
            _ => "",
        })
    }

    pub fn line_for_row(&self, row: u32) -> Option<Text> {
        if row > self.extent().row {
            return None;
        }
        let length = self.line_length_for_row(row);
        Some(self.text_in_range(Range::new(Point::new(row, 0), Point::new(row, length))))
    }

    pub fn text(&self) -> Text {
        self.text_in_range(Range::new(Point::zero(), self.extent()))
    }

    pub fn text_in_range(&self, range: Range) -> Text {
        self.stack().text_in_range(range)
    }

    /// Lazy, non-owning view of a range as alternating slices of inserted
    /// text and base text.
    pub fn chunks_in_range(&self, range: Range) -> impl Iterator<Item = TextSlice<'_>> {
        self.stack().chunks_in_range(range).into_iter()
    }

    pub fn clip_position(&self, position: Point) -> ClipResult {
        self.stack().clip_position(0, position)
    }

    pub fn clip_range(&self, range: Range) -> Range {
        Range::new(
            self.clip_position(range.start).position,
            self.clip_position(range.end).position,
        )
    }

    pub fn position_for_offset(&self, offset: u32) -> Point {
        self.stack().position_for_offset(offset)
    }

    /// Code-unit offset of a position, after clipping.
    pub fn character_index_for_position(&self, position: Point) -> u32 {
        self.clip_position(position).offset
    }

    pub fn set_text(&mut self, new_text: Text) {
        self.set_text_in_range(Range::new(Point::zero(), self.extent()), new_text);
    }

    pub fn set_text_in_range(&mut self, old_range: Range, new_text: Text) {
        self.consolidate_layers();
        if self.top.patch.is_frozen() {
            self.top.patch = self.top.patch.copy();
        }

        let mut new_text = new_text;
        let mut start = self.clip_position(old_range.start);
        let mut end = self.clip_position(old_range.end);
        if start.offset == end.offset && new_text.is_empty() {
            return;
        }

        // Widen the edit so a CRLF pair can never straddle a change
        // boundary. A pair split between an inserted text and the layer
        // below would give the layer one more row than the flattened text.
        let preceding_cr = self.preceding_lone_cr_position(start.position);
        let trailing_cr =
            new_text.last() == Some(CR) || (new_text.is_empty() && preceding_cr.is_some());
        if trailing_cr && self.stack().character_at(0, end.position) == LF {
            end = self.clip_position(Point::new(end.position.row + 1, 0));
            let lf_text = Text::from("\n");
            new_text.append(TextSlice::from(&lf_text));
        }
        if new_text.first() == Some(LF) {
            if let Some(cr_position) = preceding_cr {
                start = self.clip_position(cr_position);
                let mut widened = Text::from("\r");
                widened.append(TextSlice::from(&new_text));
                new_text = widened;
            }
        }

        let clipped = Range::new(start.position, end.position);
        let deleted_size = end.offset - start.offset;
        let new_range_end = clipped.start.traverse(new_text.extent());

        self.top.extent = new_range_end.traverse(self.top.extent.traversal(clipped.end));
        self.top.size = self.top.size - deleted_size + new_text.size();
        self.top.patch.splice_impl(
            clipped.start,
            clipped.extent(),
            new_text.extent(),
            None,
            Some(new_text),
            deleted_size,
        );
    }

    // The unit immediately before `position` when it is a lone '\r' ending
    // the previous row. A '\r' can only ever sit at the end of a row, so no
    // other shape of preceding-CR exists after clipping.
    fn preceding_lone_cr_position(&self, position: Point) -> Option<Point> {
        if position.column != 0 || position.row == 0 {
            return None;
        }
        let previous_row = position.row - 1;
        let length = self.line_length_for_row(previous_row);
        let terminator = self.clip_position(Point::new(previous_row, length));
        let row_start = self.clip_position(position);
        if row_start.offset - terminator.offset == 1
            && self.stack().character_at(0, terminator.position) == CR
        {
            Some(terminator.position)
        } else {
            None
        }
    }

    /// Replace the base text. Succeeds only when the buffer carries no
    /// modifications and no snapshot still pins a modified layer.
    pub fn reset(&mut self, new_base_text: Text) -> bool {
        self.consolidate_layers();
        if self.frozen.is_some() || !self.top.patch.is_empty() {
            return false;
        }
        self.top.size = new_base_text.size();
        self.top.extent = new_base_text.extent();
        self.base = Arc::new(new_base_text);
        true
    }

    pub fn is_modified(&self) -> bool {
        if !self.top.patch.is_empty() {
            return true;
        }
        let mut layer = self.frozen.as_deref();
        while let Some(frozen) = layer {
            if !frozen.patch.is_empty() {
                return true;
            }
            layer = frozen.previous.as_deref();
        }
        false
    }

    /// Freeze the current state and return a read-only handle to it.
    /// Subsequent writes accumulate in a fresh top layer.
    pub fn create_snapshot(&mut self) -> Snapshot {
        if self.top.patch.is_empty() {
            return Snapshot { base: self.base.clone(), layer: self.frozen.clone() };
        }
        let layer = Arc::new(Layer {
            previous: self.frozen.take(),
            patch: mem::replace(&mut self.top.patch, Patch::new(true)),
            size: self.top.size,
            extent: self.top.extent,
        });
        self.frozen = Some(layer.clone());
        Snapshot { base: self.base.clone(), layer: Some(layer) }
    }

    // Fold frozen layers that no snapshot references back into the writable
    // top layer, composing their patches in order.
    fn consolidate_layers(&mut self) {
        let mut removable = Vec::new();
        loop {
            match self.frozen.take() {
                Some(head) => match Arc::try_unwrap(head) {
                    Ok(mut layer) => {
                        self.frozen = layer.previous.take();
                        removable.push(layer);
                    }
                    Err(head) => {
                        self.frozen = Some(head);
                        break;
                    }
                },
                None => break,
            }
        }

        let Some(lowest) = removable.pop() else { return };
        debug!("consolidating {} abandoned snapshot layers", removable.len() + 1);

        let mut combined =
            if lowest.patch.is_frozen() { lowest.patch.copy() } else { lowest.patch };
        let mut left_to_right = true;
        for layer in removable.into_iter().rev() {
            combined.combine_impl(&layer.patch, left_to_right);
            left_to_right = !left_to_right;
        }
        combined.combine_impl(&self.top.patch, left_to_right);
        self.top.patch = combined;
    }

    /// Write the buffer's accumulated modifications as a single base-relative
    /// patch.
    pub fn serialize_changes(&self, output: &mut Serializer) {
        let mut patches: Vec<&Patch> = Vec::new();
        let mut layer = self.frozen.as_deref();
        while let Some(frozen) = layer {
            patches.push(&frozen.patch);
            layer = frozen.previous.as_deref();
        }
        patches.reverse();
        patches.push(&self.top.patch);

        if patches.len() == 1 {
            patches[0].serialize(output);
        } else {
            Patch::compose(&patches).serialize(output);
        }
    }

    /// Restore modifications serialized by
    /// [`serialize_changes`](TextBuffer::serialize_changes) onto an
    /// unmodified buffer with the same base text.
    pub fn deserialize_changes(&mut self, input: &mut Deserializer) -> bool {
        self.consolidate_layers();
        if self.frozen.is_some() || !self.top.patch.is_empty() {
            return false;
        }

        let loaded = Patch::deserialize(input);
        let changes = loaded.get_changes();
        if let Some(last) = changes.last() {
            if last.old_end > self.base.extent() {
                debug!("rejecting serialized changes that overflow the base text");
                return false;
            }
        }

        // The wire format drops the code-unit sizes of text-less regions, so
        // replay the changes against the base text instead of installing the
        // frozen patch directly.
        let mut patch = Patch::new(true);
        let mut size = self.base.size();
        let mut extent = self.base.extent();
        for change in changes {
            let old_size = self.base.offset_for_position(change.old_end)
                - self.base.offset_for_position(change.old_start);
            let new_size = change.new_text.as_ref().map_or(0, |text| text.size());
            size = size - old_size + new_size;
            extent = change.new_end.traverse(extent.traversal(change.old_end));
            patch.splice_impl(
                change.new_start,
                change.old_end.traversal(change.old_start),
                change.new_end.traversal(change.new_start),
                change.old_text,
                change.new_text,
                old_size,
            );
        }

        self.top.patch = patch;
        self.top.size = size;
        self.top.extent = extent;
        true
    }

    pub fn find(&self, regex: &Regex) -> Option<Range> {
        self.find_in_range(regex, Range::new(Point::zero(), self.extent()))
    }

    pub fn find_in_range(&self, regex: &Regex, range: Range) -> Option<Range> {
        self.stack().search_in_range(regex, range, Some(1)).into_iter().next()
    }

    pub fn find_all(&self, regex: &Regex) -> Vec<Range> {
        self.find_all_in_range(regex, Range::new(Point::zero(), self.extent()))
    }

    pub fn find_all_in_range(&self, regex: &Regex, range: Range) -> Vec<Range> {
        self.stack().search_in_range(regex, range, None)
    }

    /// Every word in `range` that contains `query` as a (case-insensitive)
    /// subsequence, best scores first.
    pub fn find_words_with_subsequence_in_range(
        &self,
        query: &str,
        extra_word_characters: &str,
        range: Range,
    ) -> Vec<SubsequenceMatch> {
        self.stack().find_words_with_subsequence_in_range(query, extra_word_characters, range)
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        TextBuffer::new()
    }
}

impl From<Text> for TextBuffer {
    fn from(base_text: Text) -> TextBuffer {
        let size = base_text.size();
        let extent = base_text.extent();
        TextBuffer {
            base: Arc::new(base_text),
            frozen: None,
            top: TopLayer { patch: Patch::new(true), size, extent },
        }
    }
}

impl From<&str> for TextBuffer {
    fn from(text: &str) -> TextBuffer {
        TextBuffer::from(Text::from(text))
    }
}

impl Snapshot {
    fn stack(&self) -> LayerStack<'_> {
        let mut levels = Vec::new();
        let mut layer = self.layer.as_deref();
        while let Some(frozen) = layer {
            levels.push(Level { patch: &frozen.patch, size: frozen.size });
            layer = frozen.previous.as_deref();
        }
        let extent = match &self.layer {
            Some(layer) => layer.extent,
            None => self.base.extent(),
        };
        LayerStack { levels, extent, base: &self.base }
    }

    pub fn size(&self) -> u32 {
        match &self.layer {
            Some(layer) => layer.size,
            None => self.base.size(),
        }
    }

    pub fn extent(&self) -> Point {
        match &self.layer {
            Some(layer) => layer.extent,
            None => self.base.extent(),
        }
    }

    pub fn line_count(&self) -> u32 {
        self.extent().row + 1
    }

    pub fn line_length_for_row(&self, row: u32) -> u32 {
        self.stack().line_length_for_row(row)
    }

    pub fn text(&self) -> Text {
        self.text_in_range(Range::new(Point::zero(), self.extent()))
    }

    pub fn text_in_range(&self, range: Range) -> Text {
        self.stack().text_in_range(range)
    }

    pub fn chunks_in_range(&self, range: Range) -> impl Iterator<Item = TextSlice<'_>> {
        self.stack().chunks_in_range(range).into_iter()
    }

    pub fn clip_position(&self, position: Point) -> ClipResult {
        self.stack().clip_position(0, position)
    }

    pub fn position_for_offset(&self, offset: u32) -> Point {
        self.stack().position_for_offset(offset)
    }

    pub fn find(&self, regex: &Regex) -> Option<Range> {
        self.find_in_range(regex, Range::new(Point::zero(), self.extent()))
    }

    pub fn find_in_range(&self, regex: &Regex, range: Range) -> Option<Range> {
        self.stack().search_in_range(regex, range, Some(1)).into_iter().next()
    }

    pub fn find_all(&self, regex: &Regex) -> Vec<Range> {
        self.stack().search_in_range(regex, Range::new(Point::zero(), self.extent()), None)
    }
}
