use std::fmt::{Debug, Display, Formatter};
use std::io::{Read, Write};

use crate::encoding::{transcoding_from, transcoding_to};
use crate::point::Point;
use crate::serializer::{Deserializer, Serializer};
use crate::text_slice::TextSlice;

pub(crate) const LF: u16 = b'\n' as u16;
pub(crate) const CR: u16 = b'\r' as u16;

/// The result of clamping a position to the addressable part of a text: the
/// clipped position plus its code-unit offset.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ClipResult {
    pub position: Point,
    pub offset: u32,
}

/// An owned UTF-16 string plus a monotone line index. `line_offsets[i]` is
/// the code-unit offset of the start of row `i`; the unit just before each
/// entry completes a line terminator (`\n`, a lone `\r`, or `\r\n`, which
/// counts as a single boundary).
#[derive(Clone, Eq, PartialEq)]
pub struct Text {
    pub content: Vec<u16>,
    pub line_offsets: Vec<u32>,
}

fn scan_line_offsets(content: &[u16], start_offset: usize, line_offsets: &mut Vec<u32>) {
    let mut i = start_offset;
    while i < content.len() {
        match content[i] {
            LF => line_offsets.push((i + 1) as u32),
            CR => {
                if content.get(i + 1) != Some(&LF) {
                    line_offsets.push((i + 1) as u32);
                }
            }
            _ => {}
        }
        i += 1;
    }
}

impl Text {
    pub fn new() -> Text {
        Text { content: Vec::new(), line_offsets: vec![0] }
    }

    pub fn from_units(content: Vec<u16>) -> Text {
        let mut line_offsets = vec![0];
        scan_line_offsets(&content, 0, &mut line_offsets);
        Text { content, line_offsets }
    }

    /// Build a text by decoding a byte stream. Returns `Ok(None)` when the
    /// encoding label is unknown. The progress callback receives the
    /// cumulative number of bytes consumed.
    pub fn build<R: Read + ?Sized>(
        reader: &mut R,
        size_hint: usize,
        encoding_label: &str,
        chunk_size: usize,
        progress: impl FnMut(usize),
    ) -> std::io::Result<Option<Text>> {
        let Some(mut conversion) = transcoding_from(encoding_label) else {
            return Ok(None);
        };
        let mut content: Vec<u16> = Vec::with_capacity(size_hint);
        let mut scratch = vec![0u8; chunk_size.max(1)];
        conversion.decode(&mut content, reader, &mut scratch, progress)?;
        Ok(Some(Text::from_units(content)))
    }

    /// Encode a slice of a text onto a byte stream. Returns `Ok(false)` when
    /// the encoding label is unknown.
    pub fn write<W: Write + ?Sized>(
        writer: &mut W,
        encoding_label: &str,
        chunk_size: usize,
        slice: TextSlice,
    ) -> std::io::Result<bool> {
        let Some(mut conversion) = transcoding_to(encoding_label) else {
            return Ok(false);
        };
        let mut scratch = vec![0u8; chunk_size.max(1)];
        conversion.encode(
            &slice.text.content,
            slice.start_offset() as usize,
            slice.end_offset() as usize,
            writer,
            &mut scratch,
        )?;
        Ok(true)
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.content.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn extent(&self) -> Point {
        let last_row = self.line_offsets.len() - 1;
        Point::new(last_row as u32, self.size() - self.line_offsets[last_row])
    }

    pub fn line_count(&self) -> u32 {
        self.line_offsets.len() as u32
    }

    #[inline]
    pub fn at(&self, offset: u32) -> u16 {
        self.content[offset as usize]
    }

    pub fn first(&self) -> Option<u16> {
        self.content.first().copied()
    }

    pub fn last(&self) -> Option<u16> {
        self.content.last().copied()
    }

    pub fn char_at(&self, position: Point) -> Option<u16> {
        let offset = self.offset_for_position(position);
        self.content.get(offset as usize).copied()
    }

    /// Length of the row's content in code units, excluding its terminator.
    pub fn line_length_for_row(&self, row: u32) -> u32 {
        let row = row as usize;
        let start = self.line_offsets[row];
        let end = if row + 1 < self.line_offsets.len() {
            let next = self.line_offsets[row + 1];
            next - self.terminator_length(next)
        } else {
            self.size()
        };
        end - start
    }

    /// The terminator of the given row: `""` for the final row, otherwise
    /// `"\n"`, `"\r"` or `"\r\n"`.
    pub fn line_ending_for_row(&self, row: u32) -> &'static str {
        let row = row as usize;
        if row + 1 >= self.line_offsets.len() {
            return "";
        }
        let next = self.line_offsets[row + 1] as usize;
        if self.content[next - 1] == CR {
            "\r"
        } else if self.terminator_length(next as u32) == 2 {
            "\r\n"
        } else {
            "\n"
        }
    }

    pub fn line_units(&self, row: u32) -> &[u16] {
        let start = self.line_offsets[row as usize];
        &self.content[start as usize..(start + self.line_length_for_row(row)) as usize]
    }

    // Code units of the terminator that ends immediately before
    // `next_line_start`. A `\r` directly before a closing `\n` always belongs
    // to the same terminator; the line scanner never splits the pair.
    fn terminator_length(&self, next_line_start: u32) -> u32 {
        let i = next_line_start as usize;
        if self.content[i - 1] == LF && i >= 2 && self.content[i - 2] == CR {
            2
        } else {
            1
        }
    }

    /// Code-unit offset of a position. The row is clamped to the text and the
    /// column is clamped to the row's content length.
    pub fn offset_for_position(&self, position: Point) -> u32 {
        let last_row = (self.line_offsets.len() - 1) as u32;
        if position.row > last_row {
            return self.size();
        }
        let column = position.column.min(self.line_length_for_row(position.row));
        self.line_offsets[position.row as usize] + column
    }

    /// The inverse of [`offset_for_position`](Text::offset_for_position) by
    /// binary search over the line index. `min_row` is a search hint for
    /// callers that know a lower bound on the answer. With `clip_crlf`, an
    /// offset falling between a `\r` and its `\n` resolves to the `\r`.
    pub fn position_for_offset(&self, offset: u32, min_row: u32, clip_crlf: bool) -> Point {
        let offset = offset.min(self.size());
        let min_row = (min_row as usize).min(self.line_offsets.len() - 1);
        let after = self.line_offsets[min_row..].partition_point(|&start| start <= offset);
        let row = min_row + after.max(1) - 1;
        let mut column = offset - self.line_offsets[row];
        if clip_crlf
            && (offset as usize) < self.content.len()
            && self.content[offset as usize] == LF
            && offset > 0
            && self.content[offset as usize - 1] == CR
        {
            column -= 1;
        }
        Point::new(row as u32, column)
    }

    pub fn clip_position(&self, position: Point) -> ClipResult {
        let last_row = (self.line_offsets.len() - 1) as u32;
        if position.row > last_row {
            return ClipResult { position: self.extent(), offset: self.size() };
        }
        let column = position.column.min(self.line_length_for_row(position.row));
        ClipResult {
            position: Point::new(position.row, column),
            offset: self.line_offsets[position.row as usize] + column,
        }
    }

    /// Replace the region starting at `start` spanning `deletion_extent` with
    /// the contents of `inserted`, repairing the line index from the edited
    /// row onward.
    pub fn splice(&mut self, start: Point, deletion_extent: Point, inserted: TextSlice) {
        let start_offset = self.offset_for_position(start) as usize;
        let end_offset = self.offset_for_position(start.traverse(deletion_extent)) as usize;
        let mut scan_row = self.position_for_offset(start_offset as u32, 0, false).row as usize;
        self.content.splice(start_offset..end_offset, inserted.units().iter().copied());

        // An edit right after a '\r' can form or break a CRLF pair, moving
        // the boundary that the previous row contributed.
        if start_offset > 0 && self.content[start_offset - 1] == CR && scan_row > 0 {
            scan_row -= 1;
        }
        self.line_offsets.truncate(scan_row + 1);
        let scan_start = self.line_offsets[scan_row] as usize;
        scan_line_offsets(&self.content, scan_start, &mut self.line_offsets);
    }

    pub fn append(&mut self, slice: TextSlice) {
        self.splice(self.extent(), Point::zero(), slice);
    }

    pub fn concat(slices: &[TextSlice]) -> Text {
        let mut result = Text::new();
        for slice in slices {
            result.append(*slice);
        }
        result
    }

    pub fn serialize(&self, output: &mut Serializer) {
        output.append_u32(self.size());
        output.append_u16_units(&self.content);
    }

    pub fn deserialize(input: &mut Deserializer) -> Text {
        let size = input.read_u32();
        Text::from_units(input.read_u16_units(size as usize))
    }
}

impl Default for Text {
    fn default() -> Self {
        Text::new()
    }
}

impl From<&str> for Text {
    fn from(string: &str) -> Text {
        let mut content = Vec::with_capacity(str_indices::utf16::count(string));
        content.extend(string.encode_utf16());
        Text::from_units(content)
    }
}

impl Display for Text {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf16_lossy(&self.content))
    }
}

impl Debug for Text {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Text({:?})", String::from_utf16_lossy(&self.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_offsets_for_mixed_terminators() {
        let text = Text::from("abc\r\nde\rf\r\ng\r");
        assert_eq!(text.line_offsets, vec![0, 5, 8, 11, 13]);
        assert_eq!(text.extent(), Point::new(4, 0));
        assert_eq!(text.line_ending_for_row(0), "\r\n");
        assert_eq!(text.line_ending_for_row(1), "\r");
        assert_eq!(text.line_ending_for_row(2), "\r\n");
        assert_eq!(text.line_ending_for_row(3), "\r");
        assert_eq!(text.line_ending_for_row(4), "");
    }

    #[test]
    fn offset_for_position_clamps_to_line_content() {
        let text = Text::from("abc\ndefg\r\nhijkl");

        assert_eq!(text.offset_for_position(Point::new(0, 2)), 2);
        assert_eq!(text.offset_for_position(Point::new(0, 3)), 3);
        assert_eq!(text.offset_for_position(Point::new(0, 4)), 3);
        assert_eq!(text.offset_for_position(Point::new(0, 8)), 3);

        assert_eq!(text.offset_for_position(Point::new(1, 1)), 5);
        assert_eq!(text.offset_for_position(Point::new(1, 4)), 8);
        assert_eq!(text.offset_for_position(Point::new(1, 5)), 8);
        assert_eq!(text.offset_for_position(Point::new(1, 8)), 8);

        assert_eq!(text.offset_for_position(Point::new(2, 0)), 10);
        assert_eq!(text.offset_for_position(Point::new(2, 1)), 11);
        assert_eq!(text.offset_for_position(Point::new(2, 5)), 15);
        assert_eq!(text.offset_for_position(Point::new(2, 6)), 15);
    }

    #[test]
    fn offsets_around_empty_lines() {
        let text = Text::from("a\n\nb\r\rc");

        assert_eq!(text.offset_for_position(Point::new(0, 1)), 1);
        assert_eq!(text.offset_for_position(Point::new(0, 2)), 1);
        assert_eq!(text.offset_for_position(Point::new(0, u32::MAX)), 1);
        assert_eq!(text.offset_for_position(Point::new(1, 0)), 2);
        assert_eq!(text.position_for_offset(1, 0, false), Point::new(0, 1));
        assert_eq!(text.offset_for_position(Point::new(1, 1)), 2);
        assert_eq!(text.offset_for_position(Point::new(1, u32::MAX)), 2);
        assert_eq!(text.position_for_offset(2, 0, false), Point::new(1, 0));
    }

    #[test]
    fn position_for_offset_clips_crlf() {
        let text = Text::from("ab\r\ncd");
        assert_eq!(text.position_for_offset(2, 0, false), Point::new(0, 2));
        assert_eq!(text.position_for_offset(3, 0, false), Point::new(0, 3));
        assert_eq!(text.position_for_offset(3, 0, true), Point::new(0, 2));
        assert_eq!(text.position_for_offset(4, 0, false), Point::new(1, 0));
    }

    #[test]
    fn splice_replaces_ranges_and_repairs_the_line_index() {
        let mut text = Text::from("abc\ndef\r\nghi\njkl");
        let insert = Text::from("mno\npq\r\nst");
        text.splice(Point::new(1, 2), Point::new(1, 1), TextSlice::from(&insert));
        assert_eq!(text, Text::from("abc\ndemno\npq\r\nsthi\njkl"));

        let insert = Text::new();
        text.splice(Point::new(2, 1), Point::new(2, 1), TextSlice::from(&insert));
        assert_eq!(text, Text::from("abc\ndemno\npkl"));

        let insert = Text::from("uvw");
        text.splice(Point::new(1, 1), Point::new(0, 0), TextSlice::from(&insert));
        assert_eq!(text, Text::from("abc\nduvwemno\npkl"));

        let insert = Text::from("\nxyz\r\nabc");
        text.splice(text.extent(), Point::new(0, 0), TextSlice::from(&insert));
        assert_eq!(text, Text::from("abc\nduvwemno\npkl\nxyz\r\nabc"));

        let insert = Text::from("def\nghi");
        text.splice(Point::new(0, 0), Point::new(0, 0), TextSlice::from(&insert));
        assert_eq!(text, Text::from("def\nghiabc\nduvwemno\npkl\nxyz\r\nabc"));
    }

    #[test]
    fn splice_can_form_a_crlf_pair_across_the_edit_point() {
        let mut text = Text::from("ab\rcd");
        assert_eq!(text.line_offsets, vec![0, 3]);
        let insert = Text::from("\nx");
        text.splice(Point::new(1, 0), Point::new(0, 0), TextSlice::from(&insert));
        assert_eq!(text, Text::from("ab\r\nxcd"));
        assert_eq!(text.line_offsets, vec![0, 4]);
    }

    #[test]
    fn build_and_write_stream_through_an_encoding() {
        let input = "abγdefg\nhijklmnop";
        let mut reader = std::io::Cursor::new(input.as_bytes().to_vec());
        let mut reports = Vec::new();
        let text = Text::build(&mut reader, input.len(), "UTF8", 4, |total| reports.push(total))
            .unwrap()
            .unwrap();
        assert_eq!(text, Text::from(input));
        assert_eq!(reports.last(), Some(&input.len()));

        let mut output = Vec::new();
        assert!(Text::write(&mut output, "UTF8", 4, TextSlice::from(&text)).unwrap());
        assert_eq!(output, input.as_bytes());

        let mut empty = std::io::Cursor::new(Vec::new());
        assert!(Text::build(&mut empty, 0, "not-an-encoding", 4, |_| {}).unwrap().is_none());
        let mut sink = Vec::new();
        assert!(!Text::write(&mut sink, "not-an-encoding", 4, TextSlice::from(&text)).unwrap());
    }

    #[test]
    fn serialization_round_trips() {
        let text = Text::from("abc\r\ndef\rγ");
        let mut serializer = Serializer::new();
        text.serialize(&mut serializer);
        let bytes = serializer.into_bytes();
        let copy = Text::deserialize(&mut Deserializer::new(&bytes));
        assert_eq!(copy, text);
    }
}
