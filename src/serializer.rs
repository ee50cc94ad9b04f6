//! Length-prefixed binary framing shared by [`Patch`](crate::Patch) and
//! [`Text`](crate::Text). Multi-byte integers are written in network byte
//! order. Reads past the end of the buffer yield zero rather than failing, so
//! a truncated payload degrades into an empty patch instead of an error.

#[derive(Default)]
pub struct Serializer {
    bytes: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Serializer {
        Serializer { bytes: Vec::new() }
    }

    pub fn append_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn append_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_u16_units(&mut self, units: &[u16]) {
        self.bytes.reserve(units.len() * 2);
        for &unit in units {
            self.append_u16(unit);
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub struct Deserializer<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(bytes: &'a [u8]) -> Deserializer<'a> {
        Deserializer { bytes, position: 0 }
    }

    pub fn read_u8(&mut self) -> u8 {
        let mut buf = [0; 1];
        self.read_exact(&mut buf);
        buf[0]
    }

    pub fn read_u16(&mut self) -> u16 {
        let mut buf = [0; 2];
        self.read_exact(&mut buf);
        u16::from_be_bytes(buf)
    }

    pub fn read_u32(&mut self) -> u32 {
        let mut buf = [0; 4];
        self.read_exact(&mut buf);
        u32::from_be_bytes(buf)
    }

    pub fn read_u16_units(&mut self, count: usize) -> Vec<u16> {
        let mut units = Vec::with_capacity(count);
        for _ in 0..count {
            units.push(self.read_u16());
        }
        units
    }

    pub fn is_at_end(&self) -> bool {
        self.position >= self.bytes.len()
    }

    // A value that is not fully present reads as zero; the wire format's
    // consumers rely on this for truncated input.
    fn read_exact(&mut self, buf: &mut [u8]) {
        let available = self.bytes.len() - self.position;
        if available >= buf.len() {
            buf.copy_from_slice(&self.bytes[self.position..self.position + buf.len()]);
            self.position += buf.len();
        } else {
            self.position = self.bytes.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut serializer = Serializer::new();
        serializer.append_u32(0xdead_beef);
        serializer.append_u16(0x1234);
        serializer.append_u8(7);
        serializer.append_u16_units(&[0x0061, 0x2603]);

        let bytes = serializer.into_bytes();
        assert_eq!(&bytes[..4], &[0xde, 0xad, 0xbe, 0xef]);

        let mut deserializer = Deserializer::new(&bytes);
        assert_eq!(deserializer.read_u32(), 0xdead_beef);
        assert_eq!(deserializer.read_u16(), 0x1234);
        assert_eq!(deserializer.read_u8(), 7);
        assert_eq!(deserializer.read_u16_units(2), vec![0x0061, 0x2603]);
        assert!(deserializer.is_at_end());
    }

    #[test]
    fn reads_past_the_end_yield_zero() {
        let mut deserializer = Deserializer::new(&[0x01]);
        assert_eq!(deserializer.read_u32(), 0);
        assert_eq!(deserializer.read_u32(), 0);
        assert_eq!(deserializer.read_u16(), 0);
        assert!(deserializer.is_at_end());
    }
}
