use crate::point::Point;
use crate::range::Range;
use crate::text::Text;

/// A non-owning view of a [`Text`] between two positions. Offset lookups go
/// through the owner's line index, so slicing is O(log rows).
#[derive(Copy, Clone)]
pub struct TextSlice<'a> {
    pub text: &'a Text,
    pub start_position: Point,
    pub end_position: Point,
}

impl<'a> TextSlice<'a> {
    pub fn new(text: &'a Text, start_position: Point, end_position: Point) -> TextSlice<'a> {
        TextSlice { text, start_position, end_position }
    }

    pub fn start_offset(&self) -> u32 {
        self.text.offset_for_position(self.start_position)
    }

    pub fn end_offset(&self) -> u32 {
        self.text.offset_for_position(self.end_position)
    }

    pub fn size(&self) -> u32 {
        self.end_offset() - self.start_offset()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn extent(&self) -> Point {
        self.end_position.traversal(self.start_position)
    }

    pub fn units(&self) -> &'a [u16] {
        &self.text.content[self.start_offset() as usize..self.end_offset() as usize]
    }

    pub fn front(&self) -> Option<u16> {
        self.units().first().copied()
    }

    pub fn back(&self) -> Option<u16> {
        self.units().last().copied()
    }

    /// Split at a point relative to the slice start. Points past the end of
    /// the slice clamp to it.
    pub fn split(&self, position: Point) -> (TextSlice<'a>, TextSlice<'a>) {
        let absolute_split = self.end_position.min(self.start_position.traverse(position));
        (
            TextSlice::new(self.text, self.start_position, absolute_split),
            TextSlice::new(self.text, absolute_split, self.end_position),
        )
    }

    pub fn prefix(&self, extent: Point) -> TextSlice<'a> {
        self.split(extent).0
    }

    pub fn suffix(&self, start: Point) -> TextSlice<'a> {
        self.split(start).1
    }

    pub fn slice(&self, range: Range) -> TextSlice<'a> {
        self.suffix(range.start).prefix(range.extent())
    }

    /// Position within the slice for a slice-relative offset.
    pub fn position_for_offset(&self, offset: u32) -> Point {
        self.text
            .position_for_offset(offset + self.start_offset(), self.start_position.row, false)
            .traversal(self.start_position)
    }

    pub fn to_text(&self) -> Text {
        Text::from_units(self.units().to_vec())
    }
}

impl<'a> From<&'a Text> for TextSlice<'a> {
    fn from(text: &'a Text) -> TextSlice<'a> {
        TextSlice { text, start_position: Point::zero(), end_position: text.extent() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lands_on_line_boundaries() {
        let text = Text::from("abc\ndef\r\nghi");
        let base = TextSlice::from(&text);

        let (left, right) = base.split(Point::new(0, 2));
        assert_eq!(left.to_text(), Text::from("ab"));
        assert_eq!(right.to_text(), Text::from("c\ndef\r\nghi"));

        let (left, right) = base.split(Point::new(1, 2));
        assert_eq!(left.to_text(), Text::from("abc\nde"));
        assert_eq!(right.to_text(), Text::from("f\r\nghi"));

        let (left, right) = base.split(Point::new(1, 3));
        assert_eq!(left.to_text(), Text::from("abc\ndef"));
        assert_eq!(right.to_text(), Text::from("\r\nghi"));

        let (left, right) = base.split(Point::new(2, 0));
        assert_eq!(left.to_text(), Text::from("abc\ndef\r\n"));
        assert_eq!(right.to_text(), Text::from("ghi"));

        let (left, right) = base.split(Point::new(2, 3));
        assert_eq!(left.to_text(), Text::from("abc\ndef\r\nghi"));
        assert_eq!(right.to_text(), Text::from(""));
    }

    #[test]
    fn concat_of_slices() {
        let text = Text::from("abc\ndef\r\nghi");
        let base = TextSlice::from(&text);

        assert_eq!(Text::concat(&[base, base]), Text::from("abc\ndef\r\nghiabc\ndef\r\nghi"));

        let prefix = base.prefix(Point::new(0, 2));
        let suffix = base.suffix(Point::new(2, 2));
        assert_eq!(Text::concat(&[prefix, suffix]), Text::from("abi"));

        let prefix = base.prefix(Point::new(1, 3));
        let suffix = base.suffix(Point::new(2, 2));
        assert_eq!(Text::concat(&[prefix, suffix]), Text::from("abc\ndefi"));

        let prefix = base.prefix(Point::new(1, 3));
        let suffix = base.suffix(Point::new(2, 3));
        assert_eq!(Text::concat(&[prefix, suffix]), Text::from("abc\ndef"));
    }

    #[test]
    fn slice_of_range() {
        let text = Text::from("abc\ndef\nghi");
        let slice = TextSlice::from(&text)
            .slice(Range::new(Point::new(0, 1), Point::new(1, 2)));
        assert_eq!(slice.to_text(), Text::from("bc\nde"));
        assert_eq!(slice.extent(), Point::new(1, 2));
        assert_eq!(slice.position_for_offset(3), Point::new(1, 0));
    }
}
