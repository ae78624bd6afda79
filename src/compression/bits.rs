//! MSB-first bit stream writer/reader shared by the packed codecs.

/// Minimum bits needed to represent `value` (at least 1).
pub fn bits_for(value: u32) -> u8 {
    (32 - value.leading_zeros()).max(1) as u8
}

/// `⌈log2(n)⌉`, 0 for `n <= 1`.
pub fn index_bits(n: usize) -> u8 {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as u8
    }
}

#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the low `bits` bits of `value`, most significant first.
    pub fn write(&mut self, value: u32, bits: u8) {
        for i in (0..bits).rev() {
            let bit = (value >> i) & 1;
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if bit != 0 {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 0x80 >> (self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `bits` bits; `None` past the end of the data.
    pub fn read(&mut self, bits: u8) -> Option<u32> {
        let mut out = 0u32;
        for _ in 0..bits {
            let byte = *self.data.get(self.pos / 8)?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            out = (out << 1) | u32::from(bit);
            self.pos += 1;
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths() {
        assert_eq!(bits_for(0), 1);
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(4200), 13);
        assert_eq!(bits_for(65535), 16);
        assert_eq!(index_bits(1), 0);
        assert_eq!(index_bits(2), 1);
        assert_eq!(index_bits(3), 2);
        assert_eq!(index_bits(256), 8);
    }

    #[test]
    fn msb_first_layout() {
        let mut w = BitWriter::new();
        w.write(0b101, 3);
        w.write(0b11111, 5);
        w.write(1, 1);
        assert_eq!(w.bit_len(), 9);
        assert_eq!(w.finish(), vec![0b1011_1111, 0b1000_0000]);
    }

    #[test]
    fn reader_stops_at_end() {
        let mut r = BitReader::new(&[0xA5]);
        assert_eq!(r.read(4), Some(0xA));
        assert_eq!(r.read(4), Some(0x5));
        assert_eq!(r.read(1), None);
    }
}
