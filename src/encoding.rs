//! Streaming transcoding between the buffer's UTF-16 representation and byte
//! streams. The UTF-8 paths are hand-written so decoding can recover from
//! arbitrary byte garbage one replacement character at a time; every other
//! label resolves through `encoding_rs`.
//!
//! Decoding never aborts on malformed input: an invalid byte, or a sequence
//! left incomplete at end of stream, each become one U+FFFD. Encoding
//! replaces lone surrogates the same way.

use std::io::{Read, Write};

use encoding_rs::{CoderResult, Decoder, Encoder, Encoding, UTF_16BE, UTF_16LE};

/// Default scratch-buffer size for the stream conveniences in [`Text`].
///
/// [`Text`]: crate::Text
pub const CHUNK_SIZE: usize = 10 * 1024;

const REPLACEMENT: u16 = 0xFFFD;

enum Mode {
    Utf8ToUtf16,
    Utf16ToUtf8,
    GeneralDecode(Box<Decoder>),
    GeneralEncode(Box<Encoder>),
}

/// A one-direction conversion between an external byte encoding and UTF-16.
/// Build one with [`transcoding_from`] (bytes to UTF-16) or
/// [`transcoding_to`] (UTF-16 to bytes).
pub struct EncodingConversion {
    mode: Mode,
}

fn is_utf8_label(label: &str) -> bool {
    label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8")
}

/// A conversion that decodes the named encoding into UTF-16, or `None` when
/// the label is unknown.
pub fn transcoding_from(label: &str) -> Option<EncodingConversion> {
    if is_utf8_label(label) {
        return Some(EncodingConversion { mode: Mode::Utf8ToUtf16 });
    }
    let encoding = Encoding::for_label(label.as_bytes())?;
    Some(EncodingConversion { mode: Mode::GeneralDecode(Box::new(encoding.new_decoder())) })
}

/// A conversion that encodes UTF-16 into the named encoding, or `None` when
/// the label is unknown or has no encoder.
pub fn transcoding_to(label: &str) -> Option<EncodingConversion> {
    if is_utf8_label(label) {
        return Some(EncodingConversion { mode: Mode::Utf16ToUtf8 });
    }
    let encoding = Encoding::for_label(label.as_bytes())?;
    if encoding == UTF_16LE || encoding == UTF_16BE {
        return None;
    }
    Some(EncodingConversion { mode: Mode::GeneralEncode(Box::new(encoding.new_encoder())) })
}

enum Utf8Step {
    Decoded(u32, usize),
    Invalid,
    Incomplete,
}

fn decode_utf8_step(bytes: &[u8]) -> Utf8Step {
    let b0 = bytes[0];
    match b0 {
        0x00..=0x7F => Utf8Step::Decoded(b0 as u32, 1),
        0xC2..=0xDF => match bytes.get(1) {
            None => Utf8Step::Incomplete,
            Some(&b1) if (0x80..=0xBF).contains(&b1) => {
                Utf8Step::Decoded(((b0 as u32 & 0x1F) << 6) | (b1 as u32 & 0x3F), 2)
            }
            Some(_) => Utf8Step::Invalid,
        },
        0xE0..=0xEF => {
            // E0 and ED narrow the second byte to exclude overlongs and
            // surrogate code points.
            let b1_min = if b0 == 0xE0 { 0xA0 } else { 0x80 };
            let b1_max = if b0 == 0xED { 0x9F } else { 0xBF };
            match bytes.get(1) {
                None => Utf8Step::Incomplete,
                Some(&b1) if b1 >= b1_min && b1 <= b1_max => match bytes.get(2) {
                    None => Utf8Step::Incomplete,
                    Some(&b2) if (0x80..=0xBF).contains(&b2) => Utf8Step::Decoded(
                        ((b0 as u32 & 0x0F) << 12) | ((b1 as u32 & 0x3F) << 6) | (b2 as u32 & 0x3F),
                        3,
                    ),
                    Some(_) => Utf8Step::Invalid,
                },
                Some(_) => Utf8Step::Invalid,
            }
        }
        0xF0..=0xF4 => {
            let b1_min = if b0 == 0xF0 { 0x90 } else { 0x80 };
            let b1_max = if b0 == 0xF4 { 0x8F } else { 0xBF };
            match bytes.get(1) {
                None => Utf8Step::Incomplete,
                Some(&b1) if b1 >= b1_min && b1 <= b1_max => match bytes.get(2) {
                    None => Utf8Step::Incomplete,
                    Some(&b2) if (0x80..=0xBF).contains(&b2) => match bytes.get(3) {
                        None => Utf8Step::Incomplete,
                        Some(&b3) if (0x80..=0xBF).contains(&b3) => Utf8Step::Decoded(
                            ((b0 as u32 & 0x07) << 18)
                                | ((b1 as u32 & 0x3F) << 12)
                                | ((b2 as u32 & 0x3F) << 6)
                                | (b3 as u32 & 0x3F),
                            4,
                        ),
                        Some(_) => Utf8Step::Invalid,
                    },
                    Some(_) => Utf8Step::Invalid,
                },
                Some(_) => Utf8Step::Invalid,
            }
        }
        _ => Utf8Step::Invalid,
    }
}

fn push_code_point(sink: &mut Vec<u16>, code_point: u32) {
    if code_point < 0x10000 {
        sink.push(code_point as u16);
    } else {
        let reduced = code_point - 0x10000;
        sink.push(0xD800 + (reduced >> 10) as u16);
        sink.push(0xDC00 + (reduced & 0x3FF) as u16);
    }
}

// Retry reads interrupted by signals; a zero return means end of stream (or a
// scratch buffer with no room left, which callers treat the same way).
fn read_some<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
}

impl EncodingConversion {
    /// Decode `reader` into `sink`, reading through `scratch` one chunk at a
    /// time. A multibyte sequence straddling a chunk boundary is carried over
    /// to the front of the next read. The progress callback observes the
    /// cumulative number of bytes consumed, at least once per chunk.
    pub fn decode<R: Read + ?Sized>(
        &mut self,
        sink: &mut Vec<u16>,
        reader: &mut R,
        scratch: &mut Vec<u8>,
        mut progress: impl FnMut(usize),
    ) -> std::io::Result<()> {
        if scratch.is_empty() {
            scratch.resize(CHUNK_SIZE, 0);
        }

        let mut leftover = 0;
        let mut total_consumed = 0;
        loop {
            let bytes_read = read_some(reader, &mut scratch[leftover..])?;
            let available = leftover + bytes_read;
            if available == 0 {
                break;
            }
            let is_last = bytes_read == 0;

            let consumed = self.decode_chunk(sink, &scratch[..available], is_last);
            total_consumed += consumed;
            progress(total_consumed);

            if consumed < available {
                scratch.copy_within(consumed..available, 0);
            }
            leftover = available - consumed;
            if is_last && leftover == 0 {
                break;
            }
            // A multibyte sequence longer than the whole scratch buffer can
            // never complete; give it room instead of stalling.
            if consumed == 0 && leftover == scratch.len() && !is_last {
                scratch.resize(scratch.len() * 2, 0);
            }
        }
        Ok(())
    }

    /// Decode one chunk, returning how many bytes were consumed. With
    /// `is_last` the trailing bytes of an incomplete sequence are replaced
    /// instead of deferred.
    pub fn decode_chunk(&mut self, sink: &mut Vec<u16>, bytes: &[u8], is_last: bool) -> usize {
        match &mut self.mode {
            Mode::Utf8ToUtf16 => {
                let mut i = 0;
                while i < bytes.len() {
                    match decode_utf8_step(&bytes[i..]) {
                        Utf8Step::Decoded(code_point, len) => {
                            push_code_point(sink, code_point);
                            i += len;
                        }
                        Utf8Step::Invalid => {
                            sink.push(REPLACEMENT);
                            i += 1;
                        }
                        Utf8Step::Incomplete => {
                            if is_last {
                                sink.push(REPLACEMENT);
                                i += 1;
                            } else {
                                break;
                            }
                        }
                    }
                }
                i
            }
            Mode::GeneralDecode(decoder) => {
                let mut buffer = [0u16; 1024];
                let mut consumed = 0;
                loop {
                    let (result, read, written, _had_errors) =
                        decoder.decode_to_utf16(&bytes[consumed..], &mut buffer, is_last);
                    sink.extend_from_slice(&buffer[..written]);
                    consumed += read;
                    if matches!(result, CoderResult::InputEmpty) {
                        break;
                    }
                }
                consumed
            }
            _ => panic!("decode requires a conversion created with transcoding_from"),
        }
    }

    /// Encode `units[start..end]` onto `writer`, staging output through
    /// `scratch`. Lone surrogates become U+FFFD.
    pub fn encode<W: Write + ?Sized>(
        &mut self,
        units: &[u16],
        start: usize,
        end: usize,
        writer: &mut W,
        scratch: &mut Vec<u8>,
    ) -> std::io::Result<()> {
        if scratch.is_empty() {
            scratch.resize(CHUNK_SIZE, 0);
        }

        match &mut self.mode {
            Mode::Utf16ToUtf8 => {
                let mut offset = start;
                while offset < end {
                    let mut staged = 0;
                    while offset < end {
                        let unit = units[offset];
                        let (code_point, advance) = if (0xD800..0xDC00).contains(&unit) {
                            match units.get(offset + 1) {
                                Some(&low) if offset + 1 < end && (0xDC00..0xE000).contains(&low) => (
                                    0x10000
                                        + (((unit as u32 - 0xD800) << 10)
                                            | (low as u32 - 0xDC00)),
                                    2,
                                ),
                                _ => (REPLACEMENT as u32, 1),
                            }
                        } else if (0xDC00..0xE000).contains(&unit) {
                            (REPLACEMENT as u32, 1)
                        } else {
                            (unit as u32, 1)
                        };

                        let character = char::from_u32(code_point).unwrap_or('\u{FFFD}');
                        if staged + character.len_utf8() > scratch.len() {
                            if staged > 0 {
                                break;
                            }
                            // One character wider than the whole buffer.
                            scratch.resize(character.len_utf8(), 0);
                        }
                        character.encode_utf8(&mut scratch[staged..]);
                        staged += character.len_utf8();
                        offset += advance;
                    }
                    writer.write_all(&scratch[..staged])?;
                }
                Ok(())
            }
            Mode::GeneralEncode(encoder) => {
                let mut offset = start;
                loop {
                    let (result, read, written, _had_unmappable) =
                        encoder.encode_from_utf16(&units[offset..end], scratch, true);
                    writer.write_all(&scratch[..written])?;
                    offset += read;
                    if matches!(result, CoderResult::InputEmpty) {
                        break;
                    }
                }
                Ok(())
            }
            _ => panic!("encode requires a conversion created with transcoding_to"),
        }
    }
}
