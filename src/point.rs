use std::fmt::{Debug, Formatter};

use crate::serializer::{Deserializer, Serializer};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A position in a two-dimensional text coordinate space: a row index and a
/// column measured in UTF-16 code units from the start of that row.
///
/// Points are ordered lexicographically, which the derived `Ord` gives us for
/// free thanks to the field order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    #[inline]
    pub fn new(row: u32, column: u32) -> Point {
        Point { row, column }
    }

    #[inline]
    pub fn zero() -> Point {
        Point { row: 0, column: 0 }
    }

    /// Sentinel used for unbounded queries.
    #[inline]
    pub fn max() -> Point {
        Point { row: u32::MAX, column: u32::MAX }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.row == 0 && self.column == 0
    }

    /// Relative addition: advance this position by `traversal`. A traversal
    /// with a non-zero row lands at that traversal's column on a later row;
    /// a single-row traversal extends the column. Saturates at `u32::MAX` so
    /// the max sentinel stays a fixed point.
    pub fn traverse(&self, traversal: Point) -> Point {
        if traversal.row == 0 {
            Point::new(self.row, self.column.saturating_add(traversal.column))
        } else {
            Point::new(self.row.saturating_add(traversal.row), traversal.column)
        }
    }

    /// The inverse of [`traverse`](Point::traverse): the traversal that leads
    /// from `start` to `self`. Callers must pass a `start <= self`.
    pub fn traversal(&self, start: Point) -> Point {
        if self.row == start.row {
            Point::new(0, self.column - start.column)
        } else {
            Point::new(self.row - start.row, self.column)
        }
    }

    pub fn serialize(&self, output: &mut Serializer) {
        output.append_u32(self.row);
        output.append_u32(self.column);
    }

    pub fn deserialize(input: &mut Deserializer) -> Point {
        let row = input.read_u32();
        let column = input.read_u32();
        Point { row, column }
    }
}

impl From<(u32, u32)> for Point {
    fn from((row, column): (u32, u32)) -> Self {
        Point { row, column }
    }
}

impl Debug for Point {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}
