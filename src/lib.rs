//! The text-processing core of an interactive editor's document model: a
//! layered, snapshot-isolated text buffer over a two-dimensional UTF-16
//! coordinate space, together with the machinery that makes it cheap.
//!
//! - [`Patch`] is a splay tree of non-overlapping changes mapping an "old"
//!   coordinate space onto a "new" one. Patches splice, invert, compose and
//!   round-trip through a compact wire format.
//! - [`MarkerIndex`] is a treap tracking a large population of labelled
//!   ranges, with logarithmic intersection queries and bulk relocation across
//!   edits.
//! - [`TextBuffer`] stacks patch layers over an immutable base [`Text`].
//!   [`Snapshot`]s pin a frozen prefix of the stack, so readers on other
//!   threads keep a consistent view while the writer edits.
//! - [`text_diff`] recovers a patch from two texts with a linear-space Myers
//!   diff that never splits a CRLF pair, and the [`encoding`] module streams
//!   buffers in and out of arbitrary byte encodings with replacement-character
//!   recovery.
//!
//! Regex search is delegated to the `regex` crate; the buffer only feeds it
//! text and maps the results back into coordinates.

pub mod buffer;
pub mod diff;
pub mod encoding;
pub mod marker_index;
pub mod patch;
pub mod point;
pub mod range;
pub mod serializer;
pub mod subsequence;
pub mod text;
pub mod text_slice;

pub use buffer::{Snapshot, TextBuffer};
pub use diff::text_diff;
pub use encoding::{transcoding_from, transcoding_to, EncodingConversion, CHUNK_SIZE};
pub use marker_index::{
    Boundary, BoundaryQueryResult, MarkerId, MarkerIdSet, MarkerIndex, SpliceResult,
};
pub use patch::{Change, ChangeRef, FrozenPatchError, Patch};
pub use point::Point;
pub use range::Range;
pub use serializer::{Deserializer, Serializer};
pub use subsequence::SubsequenceMatch;
pub use text::{ClipResult, Text};
pub use text_slice::TextSlice;
