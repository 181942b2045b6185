//! Sequential bit-level reader and writer over in-memory byte buffers.
//!
//! Thin wrappers around `bitstream_io`'s big-endian reader/writer that add
//! the position/peek/bits-left surface the codec primitives need for range
//! checking and trace output.

use std::io::Cursor;

use bitstream_io::{BigEndian, BitRead as _, BitWrite as _};

use crate::error::{CbsError, Result};

/// Reads big-endian (MSB-first) bits from an immutable byte slice.
pub struct BitReader<'a> {
    data: &'a [u8],
    inner: bitstream_io::read::BitReader<Cursor<&'a [u8]>, BigEndian>,
    bit_pos: u64,
    bits_total: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            inner: bitstream_io::read::BitReader::new(Cursor::new(data)),
            bit_pos: 0,
            bits_total: data.len() as u64 * 8,
        }
    }

    /// Bits consumed so far.
    pub fn position(&self) -> u64 {
        self.bit_pos
    }

    /// Bits remaining in the buffer.
    pub fn bits_left(&self) -> u64 {
        self.bits_total - self.bit_pos
    }

    /// Reads the next `n` bits (`1..=32`) MSB-first, advancing the position.
    pub fn read_bits(&mut self, name: &'static str, n: u32) -> Result<u32> {
        debug_assert!((1..=32).contains(&n));
        if (n as u64) > self.bits_left() {
            return Err(CbsError::Truncated {
                name,
                needed: n,
                remaining: self.bits_left(),
            });
        }
        let v: u32 = self
            .inner
            .read(n)
            .map_err(|_| CbsError::Truncated { name, needed: n, remaining: self.bits_left() })?;
        self.bit_pos += n as u64;
        Ok(v)
    }

    /// Reads the next `n` bits without advancing the position.
    pub fn peek_bits(&self, name: &'static str, n: u32) -> Result<u32> {
        if (n as u64) > self.bits_left() {
            return Err(CbsError::Truncated {
                name,
                needed: n,
                remaining: self.bits_left(),
            });
        }
        let mut lookahead = bitstream_io::read::BitReader::<_, BigEndian>::new(Cursor::new(self.data));
        lookahead
            .skip(self.bit_pos as u32)
            .map_err(|_| CbsError::Truncated { name, needed: n, remaining: self.bits_left() })?;
        let v: u32 = lookahead
            .read(n)
            .map_err(|_| CbsError::Truncated { name, needed: n, remaining: self.bits_left() })?;
        Ok(v)
    }

    /// Skips `n` bits without returning their value.
    pub fn skip_bits(&mut self, name: &'static str, n: u32) -> Result<()> {
        self.read_bits(name, n).map(|_| ())
    }

    /// True once the reader sits on a byte boundary.
    pub fn byte_aligned(&self) -> bool {
        self.bit_pos % 8 == 0
    }
}

/// Writes big-endian (MSB-first) bits into a growable byte buffer.
pub struct BitWriter {
    inner: bitstream_io::write::BitWriter<Vec<u8>, BigEndian>,
    bit_pos: u64,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter {
            inner: bitstream_io::write::BitWriter::new(Vec::new()),
            bit_pos: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.bit_pos
    }

    /// Appends the low `n` bits (`1..=32`) of `v`, MSB-first.
    pub fn write_bits(&mut self, name: &'static str, n: u32, v: u32) -> Result<()> {
        debug_assert!((1..=32).contains(&n));
        self.inner
            .write(n, v)
            .map_err(|_| CbsError::NoSpace { name, needed: n, remaining: u64::MAX })?;
        self.bit_pos += n as u64;
        Ok(())
    }

    /// Appends all 32 bits of `v`, MSB-first. A dedicated entry point for
    /// the full-width case, where passing `n = 32` through [`Self::write_bits`]
    /// would need a `debug_assert` reader to see is in fact the whole word.
    pub fn write_bits32(&mut self, name: &'static str, v: u32) -> Result<()> {
        self.inner
            .write(32, v)
            .map_err(|_| CbsError::NoSpace { name, needed: 32, remaining: u64::MAX })?;
        self.bit_pos += 32;
        Ok(())
    }

    /// Pads the final incomplete byte with zero bits and returns the
    /// completed buffer along with the padding bit count (0..=7).
    pub fn finish(mut self) -> Result<(Vec<u8>, u8)> {
        let padding = ((8 - (self.bit_pos % 8)) % 8) as u8;
        self.inner
            .byte_align()
            .map_err(|_| CbsError::NoSpace { name: "byte_alignment", needed: padding as u32, remaining: 0 })?;
        let buf = self.inner.into_writer();
        Ok((buf, padding))
    }

    pub fn byte_aligned(&self) -> bool {
        self.bit_pos % 8 == 0
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_back_simple() {
        let data = [0b1010_1100, 0xff];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_bits("a", 4).unwrap(), 0b1010);
        assert_eq!(r.peek_bits("b", 4).unwrap(), 0b1100);
        assert_eq!(r.read_bits("b", 4).unwrap(), 0b1100);
        assert_eq!(r.position(), 8);
        assert_eq!(r.bits_left(), 8);
    }

    #[test]
    fn truncated_read() {
        let data = [0xffu8];
        let mut r = BitReader::new(&data);
        r.read_bits("a", 4).unwrap();
        assert!(matches!(
            r.read_bits("b", 8),
            Err(CbsError::Truncated { .. })
        ));
    }

    #[test]
    fn write_and_finish() {
        let mut w = BitWriter::new();
        w.write_bits("a", 4, 0b1010).unwrap();
        w.write_bits("b", 4, 0b1100).unwrap();
        let (buf, padding) = w.finish().unwrap();
        assert_eq!(buf, vec![0b1010_1100]);
        assert_eq!(padding, 0);
    }

    #[test]
    fn write_bits32_full_word() {
        let mut w = BitWriter::new();
        w.write_bits32("a", 0xdead_beef).unwrap();
        let (buf, padding) = w.finish().unwrap();
        assert_eq!(buf, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(padding, 0);
    }

    #[test]
    fn write_with_padding() {
        let mut w = BitWriter::new();
        w.write_bits("a", 3, 0b101).unwrap();
        let (buf, padding) = w.finish().unwrap();
        assert_eq!(buf, vec![0b1010_0000]);
        assert_eq!(padding, 5);
    }
}
