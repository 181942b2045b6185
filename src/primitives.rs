//! Range-checked read/write of the five codec primitives — `u(n)`,
//! `ue(v)`, `se(v)`, `le(8k)`, `s(n)` — plus the `SyntaxIo` abstraction
//! that lets a syntax-table function be written once and used for both
//! directions: a field missing from one direction is a compile error.

use crate::bitio::{BitReader, BitWriter};
use crate::error::{CbsError, Result};
use crate::trace::{bits_to_string, trace_syntax_element};
use crate::Context;

/// `u(n)`: unsigned fixed-width, `1 <= n <= 32`, MSB-first.
pub fn read_u(ctx: &Context, r: &mut BitReader, name: &'static str, n: u32, range: (u32, u32)) -> Result<u32> {
    let pos = r.position();
    let value = r.read_bits(name, n)?;
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    trace_syntax_element(ctx, pos, name, &bits_to_string(value as u64, n), value as i64);
    Ok(value)
}

pub fn write_u(ctx: &Context, w: &mut BitWriter, name: &'static str, n: u32, value: u32, range: (u32, u32)) -> Result<()> {
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    let pos = w.position();
    w.write_bits(name, n, value)?;
    trace_syntax_element(ctx, pos, name, &bits_to_string(value as u64, n), value as i64);
    Ok(())
}

/// `ue(v)`: unsigned exponential-Golomb.
pub fn read_ue(ctx: &Context, r: &mut BitReader, name: &'static str, range: (u32, u32)) -> Result<u32> {
    let pos = r.position();
    let mut zeros = 0u32;
    while r.read_bits(name, 1)? == 0 {
        zeros += 1;
        if zeros > 31 {
            return Err(CbsError::InvalidData(format!("{}: more than 31 zeroes", name)));
        }
    }
    let suffix = if zeros > 0 { r.read_bits(name, zeros)? } else { 0 };
    let code_num = (1u64 << zeros) | suffix as u64;
    let value = (code_num - 1) as u32;
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    let bits = format!("{}1{}", "0".repeat(zeros as usize), bits_to_string(suffix as u64, zeros));
    trace_syntax_element(ctx, pos, name, &bits, value as i64);
    Ok(value)
}

pub fn write_ue(ctx: &Context, w: &mut BitWriter, name: &'static str, value: u32, range: (u32, u32)) -> Result<()> {
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    if value == u32::MAX {
        return Err(CbsError::InvalidData(format!("{}: value {} has no ue(v) encoding", name, value)));
    }
    let pos = w.position();
    let code_num = value as u64 + 1;
    let len = 63 - code_num.leading_zeros(); // floor(log2(code_num))
    for _ in 0..len {
        w.write_bits(name, 1, 0)?;
    }
    w.write_bits(name, 1, 1)?;
    let suffix = (code_num - (1 << len)) as u32;
    if len > 0 {
        w.write_bits(name, len, suffix)?;
    }
    let bits = format!("{}1{}", "0".repeat(len as usize), bits_to_string(suffix as u64, len));
    trace_syntax_element(ctx, pos, name, &bits, value as i64);
    Ok(())
}

/// `se(v)`: signed exponential-Golomb, mapping `ue(v)`'s code_num `u` by
/// `u odd -> (u+1)/2`, `u even -> -(u/2)`.
pub fn read_se(ctx: &Context, r: &mut BitReader, name: &'static str, range: (i32, i32)) -> Result<i32> {
    let pos = r.position();
    let u = read_ue_raw(r, name)?;
    let value = golomb_to_signed(u);
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    let bits = ue_bits_string(u);
    trace_syntax_element(ctx, pos, name, &bits, value as i64);
    Ok(value)
}

pub fn write_se(ctx: &Context, w: &mut BitWriter, name: &'static str, value: i32, range: (i32, i32)) -> Result<()> {
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    if value == i32::MIN {
        return Err(CbsError::InvalidData(format!("{}: value {} has no se(v) encoding", name, value)));
    }
    let u = signed_to_golomb(value);
    let pos = w.position();
    let bits = write_ue_raw(w, name, u)?;
    trace_syntax_element(ctx, pos, name, &bits, value as i64);
    Ok(())
}

fn golomb_to_signed(u: u32) -> i32 {
    let sign = (((u & 1) as i32) << 1) - 1;
    ((u >> 1) as i32 + (u & 1) as i32) * sign
}

fn signed_to_golomb(value: i32) -> u32 {
    if value > 0 {
        (value as u32) * 2 - 1
    } else {
        (-value as u32) * 2
    }
}

fn read_ue_raw(r: &mut BitReader, name: &'static str) -> Result<u32> {
    let mut zeros = 0u32;
    while r.read_bits(name, 1)? == 0 {
        zeros += 1;
        if zeros > 31 {
            return Err(CbsError::InvalidData(format!("{}: more than 31 zeroes", name)));
        }
    }
    let suffix = if zeros > 0 { r.read_bits(name, zeros)? } else { 0 };
    Ok((((1u64 << zeros) | suffix as u64) - 1) as u32)
}

fn write_ue_raw(w: &mut BitWriter, name: &'static str, value: u32) -> Result<String> {
    let code_num = value as u64 + 1;
    let len = 63 - code_num.leading_zeros();
    for _ in 0..len {
        w.write_bits(name, 1, 0)?;
    }
    w.write_bits(name, 1, 1)?;
    let suffix = (code_num - (1 << len)) as u32;
    if len > 0 {
        w.write_bits(name, len, suffix)?;
    }
    Ok(ue_bits_string_parts(len, suffix))
}

fn ue_bits_string(value: u32) -> String {
    let code_num = value as u64 + 1;
    let len = 63 - code_num.leading_zeros();
    let suffix = (code_num - (1 << len)) as u32;
    ue_bits_string_parts(len, suffix)
}

fn ue_bits_string_parts(len: u32, suffix: u32) -> String {
    format!("{}1{}", "0".repeat(len as usize), bits_to_string(suffix as u64, len))
}

/// `le(8k)`: little-endian byte-aligned integer of `k` bytes; `n` is
/// `8*k`, must be a multiple of 8.
pub fn read_le(ctx: &Context, r: &mut BitReader, name: &'static str, n: u32, range: (u32, u32)) -> Result<u32> {
    debug_assert_eq!(n % 8, 0);
    let pos = r.position();
    let mut value: u32 = 0;
    for byte_idx in 0..(n / 8) {
        let byte = r.read_bits(name, 8)?;
        value |= byte << (byte_idx * 8);
    }
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    trace_syntax_element(ctx, pos, name, &bits_to_string(value as u64, n), value as i64);
    Ok(value)
}

pub fn write_le(ctx: &Context, w: &mut BitWriter, name: &'static str, n: u32, value: u32, range: (u32, u32)) -> Result<()> {
    debug_assert_eq!(n % 8, 0);
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    let pos = w.position();
    for byte_idx in 0..(n / 8) {
        let byte = (value >> (byte_idx * 8)) & 0xff;
        w.write_bits(name, 8, byte)?;
    }
    trace_syntax_element(ctx, pos, name, &bits_to_string(value as u64, n), value as i64);
    Ok(())
}

/// `s(n)`: `n`-bit magnitude followed by a sign bit.
pub fn read_s(ctx: &Context, r: &mut BitReader, name: &'static str, n: u32, range: (i32, i32)) -> Result<i32> {
    let pos = r.position();
    let magnitude = r.read_bits(name, n)?;
    let sign = r.read_bits(name, 1)?;
    let value = if sign == 1 { -(magnitude as i32) } else { magnitude as i32 };
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    let bits = format!("{}{}", bits_to_string(magnitude as u64, n), sign);
    trace_syntax_element(ctx, pos, name, &bits, value as i64);
    Ok(value)
}

pub fn write_s(ctx: &Context, w: &mut BitWriter, name: &'static str, n: u32, value: i32, range: (i32, i32)) -> Result<()> {
    if value < range.0 || value > range.1 {
        return Err(CbsError::range(name, value as i64, range.0 as i64, range.1 as i64));
    }
    let pos = w.position();
    let magnitude = value.unsigned_abs();
    let sign = if value < 0 { 1 } else { 0 };
    w.write_bits(name, n, magnitude)?;
    w.write_bits(name, 1, sign)?;
    let bits = format!("{}{}", bits_to_string(magnitude as u64, n), sign);
    trace_syntax_element(ctx, pos, name, &bits, value as i64);
    Ok(())
}

/// Parameterizes a syntax-table function body over direction: one impl
/// consumes the bitstream into the referenced variables, the other
/// reads the pre-populated variables and emits them. A syntax-table
/// function is written once, generic over `Io: SyntaxIo`, so a field
/// added to one direction is a compile error if missing from the other.
pub trait SyntaxIo {
    fn u(&mut self, ctx: &Context, name: &'static str, n: u32, range: (u32, u32), v: &mut u32) -> Result<()>;
    fn ue(&mut self, ctx: &Context, name: &'static str, range: (u32, u32), v: &mut u32) -> Result<()>;
    fn se(&mut self, ctx: &Context, name: &'static str, range: (i32, i32), v: &mut i32) -> Result<()>;
    fn le(&mut self, ctx: &Context, name: &'static str, n: u32, range: (u32, u32), v: &mut u32) -> Result<()>;
    fn s(&mut self, ctx: &Context, name: &'static str, n: u32, range: (i32, i32), v: &mut i32) -> Result<()>;

    /// A one-bit field whose value must be `1`. Returns `InvalidData` if
    /// read and the bit isn't 1; always writes 1.
    fn marker_bit(&mut self, ctx: &Context, name: &'static str) -> Result<()> {
        let mut v = 1u32;
        self.u(ctx, name, 1, (1, 1), &mut v)
    }

    fn is_reader(&self) -> bool;
}

pub struct SyntaxReader<'a, 'b> {
    pub r: &'a mut BitReader<'b>,
}

impl<'a, 'b> SyntaxIo for SyntaxReader<'a, 'b> {
    fn u(&mut self, ctx: &Context, name: &'static str, n: u32, range: (u32, u32), v: &mut u32) -> Result<()> {
        *v = read_u(ctx, self.r, name, n, range)?;
        Ok(())
    }
    fn ue(&mut self, ctx: &Context, name: &'static str, range: (u32, u32), v: &mut u32) -> Result<()> {
        *v = read_ue(ctx, self.r, name, range)?;
        Ok(())
    }
    fn se(&mut self, ctx: &Context, name: &'static str, range: (i32, i32), v: &mut i32) -> Result<()> {
        *v = read_se(ctx, self.r, name, range)?;
        Ok(())
    }
    fn le(&mut self, ctx: &Context, name: &'static str, n: u32, range: (u32, u32), v: &mut u32) -> Result<()> {
        *v = read_le(ctx, self.r, name, n, range)?;
        Ok(())
    }
    fn s(&mut self, ctx: &Context, name: &'static str, n: u32, range: (i32, i32), v: &mut i32) -> Result<()> {
        *v = read_s(ctx, self.r, name, n, range)?;
        Ok(())
    }
    fn is_reader(&self) -> bool {
        true
    }
}

pub struct SyntaxWriter<'a> {
    pub w: &'a mut BitWriter,
}

impl<'a> SyntaxIo for SyntaxWriter<'a> {
    fn u(&mut self, ctx: &Context, name: &'static str, n: u32, range: (u32, u32), v: &mut u32) -> Result<()> {
        write_u(ctx, self.w, name, n, *v, range)
    }
    fn ue(&mut self, ctx: &Context, name: &'static str, range: (u32, u32), v: &mut u32) -> Result<()> {
        write_ue(ctx, self.w, name, *v, range)
    }
    fn se(&mut self, ctx: &Context, name: &'static str, range: (i32, i32), v: &mut i32) -> Result<()> {
        write_se(ctx, self.w, name, *v, range)
    }
    fn le(&mut self, ctx: &Context, name: &'static str, n: u32, range: (u32, u32), v: &mut u32) -> Result<()> {
        write_le(ctx, self.w, name, n, *v, range)
    }
    fn s(&mut self, ctx: &Context, name: &'static str, n: u32, range: (i32, i32), v: &mut i32) -> Result<()> {
        write_s(ctx, self.w, name, n, *v, range)
    }
    fn is_reader(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::CodecId;
    use test_case::test_case;

    fn ctx() -> Context {
        Context::init(CodecId::Mpeg2Video).unwrap()
    }

    #[test_case(0, &[0x80], 7)]
    #[test_case(1, &[0x40], 5)]
    #[test_case(255, &[0x00, 0x80, 0x00], 7)]
    fn ue_boundary_cases(value: u32, expected_bytes: &[u8], expected_padding: u8) {
        let c = ctx();
        let mut w = BitWriter::new();
        write_ue(&c, &mut w, "v", value, (0, u32::MAX - 1)).unwrap();
        let (buf, padding) = w.finish().unwrap();
        assert_eq!(buf, expected_bytes);
        assert_eq!(padding, expected_padding);
        let mut r = BitReader::new(&buf);
        assert_eq!(read_ue(&c, &mut r, "v", (0, u32::MAX - 1)).unwrap(), value);
    }

    #[test]
    fn ue_more_than_31_zeroes_is_invalid_data() {
        let c = ctx();
        let mut bytes = vec![0u8; 5];
        bytes[4] = 0x80; // stop bit eventually, well past 31 zeroes
        let mut r = BitReader::new(&bytes);
        let err = read_ue(&c, &mut r, "v", (0, u32::MAX - 1)).unwrap_err();
        assert!(matches!(err, CbsError::InvalidData(msg) if msg.contains("more than 31 zeroes")));
    }

    #[test]
    fn u3_range_violation_on_write_emits_no_bits() {
        let c = ctx();
        let mut w = BitWriter::new();
        let err = write_u(&c, &mut w, "v", 3, 8, (0, 7)).unwrap_err();
        assert!(matches!(err, CbsError::InvalidData(_)));
        assert_eq!(w.position(), 0);
    }

    #[test]
    fn se_round_trips_small_values() {
        let c = ctx();
        for value in [-3, -1, 0, 1, 2, 5] {
            let mut w = BitWriter::new();
            write_se(&c, &mut w, "v", value, (-100, 100)).unwrap();
            let (buf, _) = w.finish().unwrap();
            let mut r = BitReader::new(&buf);
            assert_eq!(read_se(&c, &mut r, "v", (-100, 100)).unwrap(), value);
        }
    }

    #[test]
    fn le_is_little_endian() {
        let c = ctx();
        let mut w = BitWriter::new();
        write_le(&c, &mut w, "v", 16, 0x1234, (0, u32::MAX)).unwrap();
        let (buf, _) = w.finish().unwrap();
        assert_eq!(buf, vec![0x34, 0x12]);
        let mut r = BitReader::new(&buf);
        assert_eq!(read_le(&c, &mut r, "v", 16, (0, u32::MAX)).unwrap(), 0x1234);
    }

    #[test]
    fn s_round_trips_signed_magnitude() {
        let c = ctx();
        let mut w = BitWriter::new();
        write_s(&c, &mut w, "v", 6, -17, (-63, 63)).unwrap();
        let (buf, _) = w.finish().unwrap();
        let mut r = BitReader::new(&buf);
        assert_eq!(read_s(&c, &mut r, "v", 6, (-63, 63)).unwrap(), -17);
    }
}
