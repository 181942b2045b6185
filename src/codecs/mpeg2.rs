//! Start-code-delimited codec plug-in (MPEG-2 video pattern): scans for
//! the three-byte prefix `00 00 01`, dispatches per start-code identifier
//! byte, and re-inserts the prefix on assembly.

use memchr::memmem;

use crate::bitio::{BitReader, BitWriter};
use crate::error::{CbsError, Result};
use crate::fragment::{ContentOrigin, Fragment, Unit, UnitContent};
use crate::primitives::{SyntaxIo, SyntaxReader, SyntaxWriter};
use crate::registry::{CodecId, CodecPlugin};
use crate::Context;

const START_CODE_PREFIX: [u8; 3] = [0x00, 0x00, 0x01];

pub struct Mpeg2Codec;

impl CodecPlugin for Mpeg2Codec {
    fn codec_id(&self) -> CodecId {
        CodecId::Mpeg2Video
    }

    fn split_fragment(&self, _ctx: &mut Context, frag: &mut Fragment, _header_hint: bool) -> Result<()> {
        let data = frag
            .data
            .take()
            .ok_or_else(|| CbsError::InvalidArgument("split_fragment called with no data".into()))?;

        let finder = memmem::Finder::new(&START_CODE_PREFIX);
        let starts: Vec<usize> = finder.find_iter(&data).collect();
        if starts.is_empty() {
            return Err(CbsError::InvalidData("no start code found".into()));
        }

        frag.units.clear();
        for (i, &prefix_pos) in starts.iter().enumerate() {
            let type_pos = prefix_pos + 3;
            if type_pos >= data.len() {
                return Err(CbsError::Truncated {
                    name: "start_code_identifier",
                    needed: 8,
                    remaining: 0,
                });
            }
            let unit_type = data[type_pos] as u32;
            let end = starts.get(i + 1).copied().unwrap_or(data.len());
            let unit_data = data[type_pos..end].to_vec();
            frag.units.push(Unit {
                unit_type,
                data: Some(unit_data),
                data_bit_padding: 0,
                content: None,
            });
        }
        Ok(())
    }

    fn read_unit(&self, ctx: &mut Context, unit: &mut Unit) -> Result<()> {
        let data = unit
            .data
            .as_ref()
            .ok_or_else(|| CbsError::InvalidArgument("read_unit called with no data".into()))?;
        // The first byte of `data` is the start-code identifier itself;
        // syntax tables begin reading after it.
        let body = &data[1..];
        let mut r = BitReader::new(body);
        let mut io = SyntaxReader { r: &mut r };

        let content = match unit.unit_type {
            0x01..=0xaf => {
                let header = SliceHeader::parse(ctx, &mut io)?;
                let tail_bit_offset = io.r.position() as u32;
                let tail_bit_len = body.len() as u32 * 8 - tail_bit_offset;
                let tail = copy_tail_bits(body, tail_bit_offset);
                Mpeg2Unit::Slice(Slice { header, tail, tail_bit_len })
            }
            0x00 => Mpeg2Unit::PictureHeader(PictureHeader::parse(ctx, &mut io)?),
            0xb2 => Mpeg2Unit::UserData(body.to_vec()),
            0xb3 => Mpeg2Unit::SequenceHeader(SequenceHeader::parse(ctx, &mut io)?),
            0xb5 => {
                let mut extension_start_code_identifier = 0u32;
                io.u(ctx, "extension_start_code_identifier", 4, (0, 15), &mut extension_start_code_identifier)?;
                let tail_bit_offset = io.r.position() as u32;
                let tail_bit_len = body.len() as u32 * 8 - tail_bit_offset;
                let tail = copy_tail_bits(body, tail_bit_offset);
                Mpeg2Unit::ExtensionData(ExtensionData {
                    extension_start_code_identifier,
                    tail,
                    tail_bit_len,
                })
            }
            0xb8 => Mpeg2Unit::GroupOfPictures(GroupOfPicturesHeader::parse(ctx, &mut io)?),
            other => return Err(CbsError::Unknown(format!("unknown MPEG-2 start code {:#04x}", other))),
        };
        unit.content = Some(ContentOrigin::Decoded(UnitContent::Mpeg2(content)));
        Ok(())
    }

    fn write_unit(&self, ctx: &mut Context, unit: &mut Unit) -> Result<()> {
        let content = match unit.content.as_ref().map(ContentOrigin::content) {
            Some(UnitContent::Mpeg2(c)) => c,
            Some(UnitContent::Vp9(_)) => {
                return Err(CbsError::InvalidArgument("VP9 content on an MPEG-2 unit".into()))
            }
            None => return Err(CbsError::InvalidArgument("write_unit called with no content".into())),
        };

        let mut w = BitWriter::new();
        // The start-code identifier byte is written first, unconditionally.
        w.write_bits("start_code_identifier", 8, unit.unit_type)?;
        let mut io = SyntaxWriter { w: &mut w };

        match content {
            Mpeg2Unit::Slice(slice) => {
                let mut header = slice.header.clone();
                header.write(ctx, &mut io)?;
                write_tail_bits(io.w, "slice_data", &slice.tail, slice.tail_bit_len)?;
            }
            Mpeg2Unit::PictureHeader(h) => h.clone().write(ctx, &mut io)?,
            Mpeg2Unit::UserData(bytes) => {
                for &b in bytes {
                    io.w.write_bits("user_data", 8, b as u32)?;
                }
            }
            Mpeg2Unit::SequenceHeader(h) => h.clone().write(ctx, &mut io)?,
            Mpeg2Unit::ExtensionData(e) => {
                let mut v = e.extension_start_code_identifier;
                io.u(ctx, "extension_start_code_identifier", 4, (0, 15), &mut v)?;
                write_tail_bits(io.w, "extension_data", &e.tail, e.tail_bit_len)?;
            }
            Mpeg2Unit::GroupOfPictures(h) => h.clone().write(ctx, &mut io)?,
        }

        let (bytes, padding) = w.finish()?;
        unit.data = Some(bytes);
        unit.data_bit_padding = padding;
        Ok(())
    }

    fn assemble_fragment(&self, _ctx: &mut Context, frag: &mut Fragment) -> Result<()> {
        let mut out = Vec::new();
        for unit in &frag.units {
            let data = unit
                .data
                .as_ref()
                .ok_or_else(|| CbsError::InvalidArgument("assemble_fragment: unit has no data".into()))?;
            out.extend_from_slice(&START_CODE_PREFIX);
            out.extend_from_slice(data);
        }
        frag.data = Some(out);
        frag.data_bit_padding = 0;
        Ok(())
    }
}

/// Extracts the bits from `bit_offset` to the end of `data` into a fresh,
/// MSB-aligned byte buffer (the final byte, if partial, is zero-padded).
fn copy_tail_bits(data: &[u8], bit_offset: u32) -> Vec<u8> {
    let total_bits = data.len() as u32 * 8;
    if bit_offset >= total_bits {
        return Vec::new();
    }
    let remaining_bits = total_bits - bit_offset;
    let out_len = ((remaining_bits + 7) / 8) as usize;
    let mut out = vec![0u8; out_len];
    for i in 0..remaining_bits {
        let src_bit = bit_offset + i;
        let byte = data[(src_bit / 8) as usize];
        let bit = (byte >> (7 - (src_bit % 8))) & 1;
        if bit == 1 {
            out[(i / 8) as usize] |= 1 << (7 - (i % 8));
        }
    }
    out
}

fn write_tail_bits(w: &mut BitWriter, name: &'static str, tail: &[u8], bit_len: u32) -> Result<()> {
    let mut remaining = bit_len;
    for &byte in tail {
        let n = remaining.min(8);
        if n == 0 {
            break;
        }
        let v = (byte as u32) >> (8 - n);
        w.write_bits(name, n, v)?;
        remaining -= n;
    }
    Ok(())
}

pub enum Mpeg2Unit {
    SequenceHeader(SequenceHeader),
    PictureHeader(PictureHeader),
    UserData(Vec<u8>),
    ExtensionData(ExtensionData),
    GroupOfPictures(GroupOfPicturesHeader),
    Slice(Slice),
}

#[derive(Clone)]
pub struct SequenceHeader {
    pub horizontal_size_value: u32,
    pub vertical_size_value: u32,
    pub aspect_ratio_information: u32,
    pub frame_rate_code: u32,
    pub bit_rate_value: u32,
    pub vbv_buffer_size_value: u32,
    pub constrained_parameters_flag: u32,
    pub load_intra_quantiser_matrix: u32,
    pub intra_quantiser_matrix: [u8; 64],
    pub load_non_intra_quantiser_matrix: u32,
    pub non_intra_quantiser_matrix: [u8; 64],
}

impl Default for SequenceHeader {
    fn default() -> Self {
        SequenceHeader {
            horizontal_size_value: 0,
            vertical_size_value: 0,
            aspect_ratio_information: 0,
            frame_rate_code: 0,
            bit_rate_value: 0,
            vbv_buffer_size_value: 0,
            constrained_parameters_flag: 0,
            load_intra_quantiser_matrix: 0,
            intra_quantiser_matrix: [0; 64],
            load_non_intra_quantiser_matrix: 0,
            non_intra_quantiser_matrix: [0; 64],
        }
    }
}

impl SequenceHeader {
    fn parse(ctx: &Context, io: &mut SyntaxReader) -> Result<SequenceHeader> {
        let mut h = SequenceHeader::default();
        h.run(ctx, io)?;
        Ok(h)
    }

    fn write(&mut self, ctx: &Context, io: &mut SyntaxWriter) -> Result<()> {
        self.run(ctx, io)
    }

    fn run<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        io.u(ctx, "horizontal_size_value", 12, (1, 4095), &mut self.horizontal_size_value)?;
        io.u(ctx, "vertical_size_value", 12, (1, 4095), &mut self.vertical_size_value)?;
        io.u(ctx, "aspect_ratio_information", 4, (1, 15), &mut self.aspect_ratio_information)?;
        io.u(ctx, "frame_rate_code", 4, (1, 8), &mut self.frame_rate_code)?;
        io.u(ctx, "bit_rate_value", 18, (0, 0x3ffff), &mut self.bit_rate_value)?;
        io.marker_bit(ctx, "marker_bit")?;
        io.u(ctx, "vbv_buffer_size_value", 10, (0, 0x3ff), &mut self.vbv_buffer_size_value)?;
        io.u(ctx, "constrained_parameters_flag", 1, (0, 1), &mut self.constrained_parameters_flag)?;
        io.u(ctx, "load_intra_quantiser_matrix", 1, (0, 1), &mut self.load_intra_quantiser_matrix)?;
        if self.load_intra_quantiser_matrix == 1 {
            for i in 0..64 {
                let mut v = self.intra_quantiser_matrix[i] as u32;
                io.u(ctx, "intra_quantiser_matrix", 8, (1, 255), &mut v)?;
                self.intra_quantiser_matrix[i] = v as u8;
            }
        }
        io.u(ctx, "load_non_intra_quantiser_matrix", 1, (0, 1), &mut self.load_non_intra_quantiser_matrix)?;
        if self.load_non_intra_quantiser_matrix == 1 {
            for i in 0..64 {
                let mut v = self.non_intra_quantiser_matrix[i] as u32;
                io.u(ctx, "non_intra_quantiser_matrix", 8, (1, 255), &mut v)?;
                self.non_intra_quantiser_matrix[i] = v as u8;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct PictureHeader {
    pub temporal_reference: u32,
    pub picture_coding_type: u32,
    pub vbv_delay: u32,
    pub full_pel_forward_vector: u32,
    pub forward_f_code: u32,
    pub full_pel_backward_vector: u32,
    pub backward_f_code: u32,
    pub extra_information_picture: Vec<u8>,
}

impl PictureHeader {
    fn parse(ctx: &Context, io: &mut SyntaxReader) -> Result<PictureHeader> {
        let mut h = PictureHeader::default();
        h.run(ctx, io)?;
        Ok(h)
    }

    fn write(&mut self, ctx: &Context, io: &mut SyntaxWriter) -> Result<()> {
        self.run(ctx, io)
    }

    fn run<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        io.u(ctx, "temporal_reference", 10, (0, 0x3ff), &mut self.temporal_reference)?;
        io.u(ctx, "picture_coding_type", 3, (1, 4), &mut self.picture_coding_type)?;
        io.u(ctx, "vbv_delay", 16, (0, 0xffff), &mut self.vbv_delay)?;
        if self.picture_coding_type == 2 || self.picture_coding_type == 3 {
            io.u(ctx, "full_pel_forward_vector", 1, (0, 1), &mut self.full_pel_forward_vector)?;
            io.u(ctx, "forward_f_code", 3, (0, 7), &mut self.forward_f_code)?;
        }
        if self.picture_coding_type == 3 {
            io.u(ctx, "full_pel_backward_vector", 1, (0, 1), &mut self.full_pel_backward_vector)?;
            io.u(ctx, "backward_f_code", 3, (0, 7), &mut self.backward_f_code)?;
        }
        if io.is_reader() {
            loop {
                let mut extra_bit_picture = 0u32;
                io.u(ctx, "extra_bit_picture", 1, (0, 1), &mut extra_bit_picture)?;
                if extra_bit_picture == 0 {
                    break;
                }
                let mut extra_information_picture = 0u32;
                io.u(ctx, "extra_information_picture", 8, (0, 0xff), &mut extra_information_picture)?;
                self.extra_information_picture.push(extra_information_picture as u8);
            }
        } else {
            for &byte in &self.extra_information_picture {
                let mut one = 1u32;
                io.u(ctx, "extra_bit_picture", 1, (0, 1), &mut one)?;
                let mut v = byte as u32;
                io.u(ctx, "extra_information_picture", 8, (0, 0xff), &mut v)?;
            }
            let mut zero = 0u32;
            io.u(ctx, "extra_bit_picture", 1, (0, 1), &mut zero)?;
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct GroupOfPicturesHeader {
    pub drop_frame_flag: u32,
    pub time_code_hours: u32,
    pub time_code_minutes: u32,
    pub time_code_seconds: u32,
    pub time_code_pictures: u32,
    pub closed_gop: u32,
    pub broken_link: u32,
}

impl GroupOfPicturesHeader {
    fn parse(ctx: &Context, io: &mut SyntaxReader) -> Result<GroupOfPicturesHeader> {
        let mut h = GroupOfPicturesHeader::default();
        h.run(ctx, io)?;
        Ok(h)
    }

    fn write(&mut self, ctx: &Context, io: &mut SyntaxWriter) -> Result<()> {
        self.run(ctx, io)
    }

    fn run<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        io.u(ctx, "drop_frame_flag", 1, (0, 1), &mut self.drop_frame_flag)?;
        io.u(ctx, "time_code_hours", 5, (0, 23), &mut self.time_code_hours)?;
        io.u(ctx, "time_code_minutes", 6, (0, 59), &mut self.time_code_minutes)?;
        io.marker_bit(ctx, "marker_bit")?;
        io.u(ctx, "time_code_seconds", 6, (0, 59), &mut self.time_code_seconds)?;
        io.u(ctx, "time_code_pictures", 6, (0, 63), &mut self.time_code_pictures)?;
        io.u(ctx, "closed_gop", 1, (0, 1), &mut self.closed_gop)?;
        io.u(ctx, "broken_link", 1, (0, 1), &mut self.broken_link)?;
        Ok(())
    }
}

pub struct ExtensionData {
    pub extension_start_code_identifier: u32,
    pub tail: Vec<u8>,
    pub tail_bit_len: u32,
}

#[derive(Clone, Default)]
pub struct SliceHeader {
    pub quantiser_scale_code: u32,
    pub extra_information_slice: Vec<u8>,
}

impl SliceHeader {
    fn parse(ctx: &Context, io: &mut SyntaxReader) -> Result<SliceHeader> {
        let mut h = SliceHeader::default();
        h.run(ctx, io)?;
        Ok(h)
    }

    fn write(&mut self, ctx: &Context, io: &mut SyntaxWriter) -> Result<()> {
        self.run(ctx, io)
    }

    fn run<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        io.u(ctx, "quantiser_scale_code", 5, (1, 31), &mut self.quantiser_scale_code)?;
        if io.is_reader() {
            loop {
                // `peek_bits` would let us avoid consuming past a truncated
                // tail, but this grammar reads the flag unconditionally;
                // a short read here correctly surfaces as `Truncated`.
                let mut extra_bit_slice = 0u32;
                io.u(ctx, "extra_bit_slice", 1, (0, 1), &mut extra_bit_slice)?;
                if extra_bit_slice == 0 {
                    break;
                }
                let mut extra_information_slice = 0u32;
                io.u(ctx, "extra_information_slice", 8, (0, 0xff), &mut extra_information_slice)?;
                self.extra_information_slice.push(extra_information_slice as u8);
            }
        } else {
            for &byte in &self.extra_information_slice {
                let mut one = 1u32;
                io.u(ctx, "extra_bit_slice", 1, (0, 1), &mut one)?;
                let mut v = byte as u32;
                io.u(ctx, "extra_information_slice", 8, (0, 0xff), &mut v)?;
            }
            let mut zero = 0u32;
            io.u(ctx, "extra_bit_slice", 1, (0, 1), &mut zero)?;
        }
        Ok(())
    }
}

pub struct Slice {
    pub header: SliceHeader,
    /// Opaque macroblock payload, copied through verbatim (non-goal:
    /// "bit-level modification inside a unit without re-encoding its
    /// header").
    pub tail: Vec<u8>,
    pub tail_bit_len: u32,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fragment::Position;
    use crate::{driver, Context};
    use hex_literal::hex;

    fn ctx() -> Context {
        Context::init(CodecId::Mpeg2Video).unwrap()
    }

    #[test]
    fn split_round_trip_three_units() {
        let mut ctx = ctx();
        let mut bytes = vec![0x00, 0x00, 0x01, 0xb3];
        bytes.extend_from_slice(&hex!("00000000 00000000")); // placeholder sequence_header payload
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0x00]);
        bytes.extend_from_slice(&hex!("00000000")); // placeholder picture_header payload
        bytes.extend_from_slice(&[0x00, 0x00, 0x01, 0x01]);
        bytes.extend_from_slice(&hex!("0000")); // placeholder slice payload

        let mut frag = Fragment::new();
        frag.data = Some(bytes.clone());
        Mpeg2Codec.split_fragment(&mut ctx, &mut frag, false).unwrap();

        assert_eq!(frag.units.len(), 3);
        assert_eq!(frag.units[0].unit_type, 0xb3);
        assert_eq!(frag.units[1].unit_type, 0x00);
        assert_eq!(frag.units[2].unit_type, 0x01);

        Mpeg2Codec.assemble_fragment(&mut ctx, &mut frag).unwrap();
        assert_eq!(frag.data.as_deref(), Some(bytes.as_slice()));
    }

    #[test]
    fn unknown_start_code_is_unknown() {
        let mut ctx = ctx();
        let mut unit = Unit {
            unit_type: 0xb0,
            data: Some(vec![0xb0, 0xff]),
            data_bit_padding: 0,
            content: None,
        };
        assert!(matches!(Mpeg2Codec.read_unit(&mut ctx, &mut unit), Err(CbsError::Unknown(_))));
    }

    #[test]
    fn insert_fabricated_unit_round_trips_through_assemble() {
        let mut ctx = ctx();
        let mut bytes = vec![0x00, 0x00, 0x01, 0xb2];
        bytes.extend_from_slice(b"hi");
        let mut frag = driver::read(&mut ctx, &bytes).unwrap();
        frag.insert_unit_data(Position::End, 0xb2, vec![1, 2, 3]).unwrap();
        driver::write_fragment_data(&mut ctx, &mut frag).unwrap();
        let out = frag.data.unwrap();
        assert!(out.windows(4).filter(|w| w == &[0x00, 0x00, 0x01, 0xb2]).count() == 2);
    }
}
