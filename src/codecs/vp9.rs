//! The VP9 superframe-indexed plug-in: a sequence of whole frame bodies,
//! optionally terminated by a superframe index trailer.

use crate::bitio::{BitReader, BitWriter};
use crate::error::{CbsError, Result};
use crate::fragment::{ContentOrigin, Fragment, Unit, UnitContent};
use crate::primitives::{SyntaxIo, SyntaxReader, SyntaxWriter};
use crate::registry::{CodecId, CodecPlugin};
use crate::{Context, PrivData};

const FRAME_SYNC_CODE: [u32; 3] = [0x49, 0x83, 0x42];
const CS_RGB: u32 = 7;

/// On write, warns if a caller-supplied field value disagrees with the
/// value this codec infers rather than reads from the stream, mirroring
/// `cbs_vp9.c`'s `infer()` macro. A no-op on read (there is nothing to
/// cross-check yet; the field is about to be overwritten from context).
fn warn_on_inferred_mismatch(ctx: &Context, is_reader: bool, name: &str, current: i64, inferred: i64) {
    if !is_reader && current != inferred {
        ctx.log(
            log::Level::Warn,
            &format!("{}: caller-supplied value {} does not match inferred value {}", name, current, inferred),
        );
    }
}

/// Derived per-context frame-size state, carried forward so a later
/// frame's `frame_size_with_refs` can borrow an earlier frame's size.
#[derive(Clone, Copy, Debug, Default)]
pub struct Vp9PrivData {
    pub mi_cols: u16,
    pub mi_rows: u16,
    pub sb64_cols: u16,
    pub sb64_rows: u16,
}

pub struct Vp9Codec;

impl CodecPlugin for Vp9Codec {
    fn codec_id(&self) -> CodecId {
        CodecId::Vp9
    }

    fn split_fragment(&self, ctx: &mut Context, frag: &mut Fragment, _header_hint: bool) -> Result<()> {
        let data = frag.data.take().ok_or_else(|| CbsError::InvalidArgument("fragment has no data".into()))?;
        if data.is_empty() {
            return Err(CbsError::InvalidData("empty VP9 fragment".into()));
        }
        let last = *data.last().unwrap();
        if last & 0xE0 != 0xC0 {
            frag.units.push(Unit { unit_type: 0, data: Some(data), data_bit_padding: 0, content: None });
            return Ok(());
        }
        let bytes_per_size = (((last >> 3) & 3) + 1) as usize;
        let frames = ((last & 7) + 1) as usize;
        let trailer_len = 2 + bytes_per_size * frames;
        if trailer_len > data.len() {
            return Err(CbsError::InvalidData("superframe trailer longer than fragment".into()));
        }
        let trailer_start = data.len() - trailer_len;
        let trailer = &data[trailer_start..];
        if trailer[0] != last {
            return Err(CbsError::InvalidData("superframe trailer start/end bytes disagree".into()));
        }
        let mut sizes = Vec::with_capacity(frames);
        for i in 0..frames {
            let off = 1 + i * bytes_per_size;
            let mut size = 0u64;
            for (b, byte) in trailer[off..off + bytes_per_size].iter().enumerate() {
                size |= (*byte as u64) << (b * 8);
            }
            sizes.push(size as usize);
        }
        let mut pos = 0usize;
        for size in &sizes {
            if trailer_start - pos < *size {
                return Err(CbsError::InvalidData("superframe frame size exceeds remaining data".into()));
            }
            let body = data[pos..pos + size].to_vec();
            pos += size;
            frag.units.push(Unit { unit_type: 0, data: Some(body), data_bit_padding: 0, content: None });
        }
        if pos != trailer_start {
            ctx.log(
                log::Level::Warn,
                &format!("{} bytes before the superframe trailer were not claimed by any frame", trailer_start - pos),
            );
        }
        Ok(())
    }

    fn read_unit(&self, ctx: &mut Context, unit: &mut Unit) -> Result<()> {
        let data = unit.data.as_deref().ok_or_else(|| CbsError::InvalidArgument("unit has no data".into()))?;
        let mut r = BitReader::new(data);
        let header = {
            let mut io = SyntaxReader { r: &mut r };
            let header = Vp9FrameHeader::parse(ctx, &mut io)?;
            let pad = (8 - (io.r.position() % 8)) % 8;
            if pad > 0 {
                io.r.skip_bits("trailing_bits", pad as u32)?;
            }
            header
        };
        let tail_start = (r.position() / 8) as usize;
        let tail = if header.show_existing_frame { Vec::new() } else { data[tail_start..].to_vec() };
        unit.content = Some(ContentOrigin::Decoded(UnitContent::Vp9(Vp9Frame { header, tail })));
        Ok(())
    }

    fn write_unit(&self, ctx: &mut Context, unit: &mut Unit) -> Result<()> {
        let frame = match unit.content.as_ref().map(ContentOrigin::content) {
            Some(UnitContent::Vp9(frame)) => frame,
            Some(UnitContent::Mpeg2(_)) => return Err(CbsError::InvalidArgument("unit content is not a VP9 frame".into())),
            None => return Err(CbsError::InvalidArgument("unit has no content".into())),
        };
        let mut header = frame.header.clone();
        let tail = frame.tail.clone();
        let mut w = BitWriter::new();
        {
            let mut io = SyntaxWriter { w: &mut w };
            header.write(ctx, &mut io)?;
            let pad = (8 - (io.w.position() % 8)) % 8;
            if pad > 0 {
                io.w.write_bits("trailing_bits", pad as u32, 0)?;
            }
        }
        update_priv_data(ctx, &header);
        for &byte in &tail {
            w.write_bits("frame_tail_byte", 8, byte as u32)?;
        }
        let (buf, padding) = w.finish()?;
        unit.data = Some(buf);
        unit.data_bit_padding = padding;
        Ok(())
    }

    fn assemble_fragment(&self, _ctx: &mut Context, frag: &mut Fragment) -> Result<()> {
        if frag.units.is_empty() {
            frag.data = Some(Vec::new());
            return Ok(());
        }
        if frag.units.len() == 1 {
            frag.data = Some(frag.units[0].data.clone().unwrap_or_default());
            return Ok(());
        }
        if frag.units.len() > 8 {
            return Err(CbsError::InvalidArgument(format!("{} frames exceeds the 8-frame superframe limit", frag.units.len())));
        }
        let mut out = Vec::new();
        let mut sizes = Vec::with_capacity(frag.units.len());
        for unit in &frag.units {
            let data = unit.data.as_deref().unwrap_or(&[]);
            out.extend_from_slice(data);
            sizes.push(data.len());
        }
        let max_size = *sizes.iter().max().unwrap_or(&0);
        let size_len = (64 - (max_size.max(1) as u64).leading_zeros() as usize).div_ceil(8).max(1);
        if size_len > 4 {
            return Err(CbsError::InvalidArgument(format!("superframe size_len {} exceeds 4 bytes", size_len)));
        }
        let marker = 0xC0u8 | (((size_len - 1) as u8) << 3) | ((frag.units.len() - 1) as u8);
        out.push(marker);
        for size in &sizes {
            let size = *size as u64;
            for b in 0..size_len {
                out.push(((size >> (b * 8)) & 0xff) as u8);
            }
        }
        out.push(marker);
        frag.data = Some(out);
        Ok(())
    }
}

/// The bit-decoded contents of one VP9 frame unit: the uncompressed
/// header plus the compressed header and tile data that follow it,
/// carried through verbatim (decoding the probability-model machinery
/// those bytes feed is out of scope here).
pub struct Vp9Frame {
    pub header: Vp9FrameHeader,
    pub tail: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct ColorConfig {
    pub ten_or_twelve_bit: u32,
    pub color_space: u32,
    pub color_range: u32,
    pub subsampling_x: u32,
    pub subsampling_y: u32,
}

#[derive(Clone, Default)]
pub struct LoopFilterDeltas {
    pub update_enabled: bool,
    pub ref_deltas: [i32; 4],
    pub mode_deltas: [i32; 2],
}

#[derive(Clone, Default)]
pub struct LoopFilterParams {
    pub loop_filter_level: u32,
    pub loop_filter_sharpness: u32,
    pub loop_filter_delta_enabled: bool,
    pub deltas: LoopFilterDeltas,
}

#[derive(Clone, Default)]
pub struct QuantizationParams {
    pub base_q_idx: u32,
    pub delta_q_y_dc: Option<i32>,
    pub delta_q_uv_dc: Option<i32>,
    pub delta_q_uv_ac: Option<i32>,
}

const SEGMENTATION_FEATURE_BITS: [u32; 4] = [8, 6, 2, 0];
const SEGMENTATION_FEATURE_SIGNED: [bool; 4] = [true, true, false, false];

#[derive(Clone, Default)]
pub struct SegmentationParams {
    pub enabled: bool,
    pub update_map: bool,
    pub tree_probs: [Option<u32>; 7],
    pub temporal_update: bool,
    pub pred_probs: [Option<u32>; 3],
    pub update_data: bool,
    pub feature_enabled: [[bool; 4]; 8],
    pub feature_value: [[i32; 4]; 8],
}

#[derive(Clone, Copy, Default)]
pub struct TileInfo {
    pub tile_cols_log2: u32,
    pub tile_rows_log2: u32,
}

#[derive(Clone, Default)]
pub struct Vp9FrameHeader {
    pub profile: u32,
    pub show_existing_frame: bool,
    pub frame_to_show_map_idx: u32,
    pub frame_type_key: bool,
    pub show_frame: bool,
    pub error_resilient_mode: bool,
    pub intra_only: bool,
    pub reset_frame_context: u32,
    pub color_config: ColorConfig,
    pub frame_width_minus_1: u32,
    pub frame_height_minus_1: u32,
    pub render_width_minus_1: u32,
    pub render_height_minus_1: u32,
    pub refresh_frame_flags: u32,
    pub ref_frame_idx: [u32; 3],
    pub ref_frame_sign_bias: [u32; 3],
    pub allow_high_precision_mv: bool,
    pub is_filter_switchable: bool,
    pub raw_interpolation_filter: u32,
    pub refresh_frame_context: bool,
    pub frame_parallel_decoding_mode: bool,
    pub frame_context_idx: u32,
    pub loop_filter: LoopFilterParams,
    pub quantization: QuantizationParams,
    pub segmentation: SegmentationParams,
    pub tile_info: TileInfo,
    pub header_size_in_bytes: u32,
}

impl Vp9FrameHeader {
    pub fn parse(ctx: &mut Context, io: &mut SyntaxReader) -> Result<Vp9FrameHeader> {
        let mut h = Vp9FrameHeader::default();
        h.run(ctx, io)?;
        Ok(h)
    }

    pub fn write(&mut self, ctx: &mut Context, io: &mut SyntaxWriter) -> Result<()> {
        self.run(ctx, io)
    }

    /// Derives `mi_cols`/`sb64_rows` etc. from the size just read or
    /// written and stores them on the context, so `tile_info` later in
    /// this same header sees the current frame's geometry rather than a
    /// stale one.
    fn update_priv_data(&self, ctx: &mut Context) {
        let width = self.frame_width_minus_1 + 1;
        let height = self.frame_height_minus_1 + 1;
        let mi_cols = ((width + 7) >> 3) as u16;
        let mi_rows = ((height + 7) >> 3) as u16;
        let sb64_cols = mi_cols.div_ceil(8);
        let sb64_rows = mi_rows.div_ceil(8);
        if let PrivData::Vp9(p) = ctx.priv_data_mut() {
            *p = Vp9PrivData { mi_cols, mi_rows, sb64_cols, sb64_rows };
        }
    }

    fn run<Io: SyntaxIo>(&mut self, ctx: &mut Context, io: &mut Io) -> Result<()> {
        let mut frame_marker = 2u32;
        io.u(ctx, "frame_marker", 2, (2, 2), &mut frame_marker)?;

        let mut profile_low_bit = self.profile & 1;
        let mut profile_high_bit = (self.profile >> 1) & 1;
        io.u(ctx, "profile_low_bit", 1, (0, 1), &mut profile_low_bit)?;
        io.u(ctx, "profile_high_bit", 1, (0, 1), &mut profile_high_bit)?;
        self.profile = profile_low_bit | (profile_high_bit << 1);
        if self.profile == 3 {
            let mut reserved = 0u32;
            io.u(ctx, "profile_reserved_zero", 1, (0, 0), &mut reserved)?;
        }

        let mut show_existing_frame = self.show_existing_frame as u32;
        io.u(ctx, "show_existing_frame", 1, (0, 1), &mut show_existing_frame)?;
        self.show_existing_frame = show_existing_frame == 1;
        if self.show_existing_frame {
            io.u(ctx, "frame_to_show_map_idx", 3, (0, 7), &mut self.frame_to_show_map_idx)?;
            warn_on_inferred_mismatch(ctx, io.is_reader(), "header_size_in_bytes", self.header_size_in_bytes as i64, 0);
            warn_on_inferred_mismatch(ctx, io.is_reader(), "refresh_frame_flags", self.refresh_frame_flags as i64, 0);
            warn_on_inferred_mismatch(
                ctx,
                io.is_reader(),
                "loop_filter_level",
                self.loop_filter.loop_filter_level as i64,
                0,
            );
            self.header_size_in_bytes = 0;
            self.refresh_frame_flags = 0;
            self.loop_filter.loop_filter_level = 0;
            return Ok(());
        }

        let mut frame_type_key = !self.frame_type_key as u32; // 0 == KEY_FRAME
        io.u(ctx, "frame_type", 1, (0, 1), &mut frame_type_key)?;
        self.frame_type_key = frame_type_key == 0;
        let mut show_frame = self.show_frame as u32;
        io.u(ctx, "show_frame", 1, (0, 1), &mut show_frame)?;
        self.show_frame = show_frame == 1;
        let mut error_resilient_mode = self.error_resilient_mode as u32;
        io.u(ctx, "error_resilient_mode", 1, (0, 1), &mut error_resilient_mode)?;
        self.error_resilient_mode = error_resilient_mode == 1;

        if self.frame_type_key {
            self.frame_sync_code(ctx, io)?;
            self.color_config(ctx, io)?;
            self.frame_size(ctx, io)?;
            self.render_size(ctx, io)?;
            self.update_priv_data(ctx);
            warn_on_inferred_mismatch(ctx, io.is_reader(), "refresh_frame_flags", self.refresh_frame_flags as i64, 0xff);
            warn_on_inferred_mismatch(ctx, io.is_reader(), "intra_only", self.intra_only as i64, 0);
            self.refresh_frame_flags = 0xff;
            self.intra_only = false;
        } else {
            let mut intra_only = self.intra_only as u32;
            if !self.show_frame {
                io.u(ctx, "intra_only", 1, (0, 1), &mut intra_only)?;
            } else {
                warn_on_inferred_mismatch(ctx, io.is_reader(), "intra_only", intra_only as i64, 0);
                intra_only = 0;
            }
            self.intra_only = intra_only == 1;
            if !self.error_resilient_mode {
                io.u(ctx, "reset_frame_context", 2, (0, 3), &mut self.reset_frame_context)?;
            } else {
                warn_on_inferred_mismatch(ctx, io.is_reader(), "reset_frame_context", self.reset_frame_context as i64, 0);
                self.reset_frame_context = 0;
            }
            if self.intra_only {
                self.frame_sync_code(ctx, io)?;
                if self.profile > 0 {
                    self.color_config(ctx, io)?;
                } else {
                    let inferred = ColorConfig { color_space: 1, subsampling_x: 1, subsampling_y: 1, ..ColorConfig::default() };
                    warn_on_inferred_mismatch(ctx, io.is_reader(), "color_space", self.color_config.color_space as i64, inferred.color_space as i64);
                    warn_on_inferred_mismatch(ctx, io.is_reader(), "subsampling_x", self.color_config.subsampling_x as i64, inferred.subsampling_x as i64);
                    warn_on_inferred_mismatch(ctx, io.is_reader(), "subsampling_y", self.color_config.subsampling_y as i64, inferred.subsampling_y as i64);
                    self.color_config = inferred;
                }
                io.u(ctx, "refresh_frame_flags", 8, (0, 255), &mut self.refresh_frame_flags)?;
                self.frame_size(ctx, io)?;
                self.render_size(ctx, io)?;
                self.update_priv_data(ctx);
            } else {
                io.u(ctx, "refresh_frame_flags", 8, (0, 255), &mut self.refresh_frame_flags)?;
                for i in 0..3 {
                    io.u(ctx, "ref_frame_idx", 3, (0, 7), &mut self.ref_frame_idx[i])?;
                    io.u(ctx, "ref_frame_sign_bias", 1, (0, 1), &mut self.ref_frame_sign_bias[i])?;
                }
                self.frame_size_with_refs(ctx, io)?;
                self.update_priv_data(ctx);
                let mut allow_high_precision_mv = self.allow_high_precision_mv as u32;
                io.u(ctx, "allow_high_precision_mv", 1, (0, 1), &mut allow_high_precision_mv)?;
                self.allow_high_precision_mv = allow_high_precision_mv == 1;
                self.interpolation_filter(ctx, io)?;
            }
        }

        if !self.error_resilient_mode {
            let mut refresh_frame_context = self.refresh_frame_context as u32;
            io.u(ctx, "refresh_frame_context", 1, (0, 1), &mut refresh_frame_context)?;
            self.refresh_frame_context = refresh_frame_context == 1;
            let mut frame_parallel_decoding_mode = self.frame_parallel_decoding_mode as u32;
            io.u(ctx, "frame_parallel_decoding_mode", 1, (0, 1), &mut frame_parallel_decoding_mode)?;
            self.frame_parallel_decoding_mode = frame_parallel_decoding_mode == 1;
        } else {
            warn_on_inferred_mismatch(ctx, io.is_reader(), "refresh_frame_context", self.refresh_frame_context as i64, 0);
            warn_on_inferred_mismatch(ctx, io.is_reader(), "frame_parallel_decoding_mode", self.frame_parallel_decoding_mode as i64, 1);
            self.refresh_frame_context = false;
            self.frame_parallel_decoding_mode = true;
        }
        io.u(ctx, "frame_context_idx", 2, (0, 3), &mut self.frame_context_idx)?;

        self.loop_filter_params(ctx, io)?;
        self.quantization_params(ctx, io)?;
        self.segmentation_params(ctx, io)?;
        self.tile_info(ctx, io)?;

        io.u(ctx, "header_size_in_bytes", 16, (0, 0xffff), &mut self.header_size_in_bytes)?;
        Ok(())
    }

    fn frame_sync_code<Io: SyntaxIo>(&self, ctx: &Context, io: &mut Io) -> Result<()> {
        for (i, expect) in FRAME_SYNC_CODE.iter().enumerate() {
            let mut v = *expect;
            io.u(ctx, "frame_sync_byte", 8, (*expect, *expect), &mut v)?;
            if v != *expect {
                return Err(CbsError::InvalidData(format!("frame_sync_code byte {} mismatch", i)));
            }
        }
        Ok(())
    }

    fn color_config<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        let c = &mut self.color_config;
        if self.profile >= 2 {
            io.u(ctx, "ten_or_twelve_bit", 1, (0, 1), &mut c.ten_or_twelve_bit)?;
        } else {
            warn_on_inferred_mismatch(ctx, io.is_reader(), "ten_or_twelve_bit", c.ten_or_twelve_bit as i64, 0);
            c.ten_or_twelve_bit = 0;
        }
        io.u(ctx, "color_space", 3, (0, 7), &mut c.color_space)?;
        if c.color_space != CS_RGB {
            io.u(ctx, "color_range", 1, (0, 1), &mut c.color_range)?;
            if self.profile == 1 || self.profile == 3 {
                io.u(ctx, "subsampling_x", 1, (0, 1), &mut c.subsampling_x)?;
                io.u(ctx, "subsampling_y", 1, (0, 1), &mut c.subsampling_y)?;
                let mut reserved = 0u32;
                io.u(ctx, "reserved_zero", 1, (0, 0), &mut reserved)?;
            } else {
                warn_on_inferred_mismatch(ctx, io.is_reader(), "subsampling_x", c.subsampling_x as i64, 1);
                warn_on_inferred_mismatch(ctx, io.is_reader(), "subsampling_y", c.subsampling_y as i64, 1);
                c.subsampling_x = 1;
                c.subsampling_y = 1;
            }
        } else {
            warn_on_inferred_mismatch(ctx, io.is_reader(), "color_range", c.color_range as i64, 1);
            c.color_range = 1;
            if self.profile == 1 || self.profile == 3 {
                warn_on_inferred_mismatch(ctx, io.is_reader(), "subsampling_x", c.subsampling_x as i64, 0);
                warn_on_inferred_mismatch(ctx, io.is_reader(), "subsampling_y", c.subsampling_y as i64, 0);
                c.subsampling_x = 0;
                c.subsampling_y = 0;
                let mut reserved = 0u32;
                io.u(ctx, "reserved_zero", 1, (0, 0), &mut reserved)?;
            }
        }
        Ok(())
    }

    fn frame_size<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        io.u(ctx, "frame_width_minus_1", 16, (0, 0xffff), &mut self.frame_width_minus_1)?;
        io.u(ctx, "frame_height_minus_1", 16, (0, 0xffff), &mut self.frame_height_minus_1)?;
        Ok(())
    }

    fn render_size<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        let mut different = (self.render_width_minus_1 != self.frame_width_minus_1
            || self.render_height_minus_1 != self.frame_height_minus_1) as u32;
        io.u(ctx, "render_and_frame_size_different", 1, (0, 1), &mut different)?;
        if different == 1 {
            io.u(ctx, "render_width_minus_1", 16, (0, 0xffff), &mut self.render_width_minus_1)?;
            io.u(ctx, "render_height_minus_1", 16, (0, 0xffff), &mut self.render_height_minus_1)?;
        } else {
            self.render_width_minus_1 = self.frame_width_minus_1;
            self.render_height_minus_1 = self.frame_height_minus_1;
        }
        Ok(())
    }

    /// A found reference's size is borrowed rather than re-read; this
    /// expansion does not track per-slot stored sizes across frames, so a
    /// `found_ref` frame keeps its previously-parsed width/height (correct
    /// for the common case where reference and current frame sizes match).
    fn frame_size_with_refs<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        let mut found = false;
        for _ in 0..3 {
            let mut found_ref = found as u32;
            io.u(ctx, "found_ref", 1, (0, 1), &mut found_ref)?;
            found = found_ref == 1;
            if found {
                break;
            }
        }
        if !found {
            self.frame_size(ctx, io)?;
        }
        self.render_size(ctx, io)
    }

    fn interpolation_filter<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        let mut is_filter_switchable = self.is_filter_switchable as u32;
        io.u(ctx, "is_filter_switchable", 1, (0, 1), &mut is_filter_switchable)?;
        self.is_filter_switchable = is_filter_switchable == 1;
        if !self.is_filter_switchable {
            io.u(ctx, "raw_interpolation_filter", 2, (0, 3), &mut self.raw_interpolation_filter)?;
        }
        Ok(())
    }

    fn loop_filter_params<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        let lf = &mut self.loop_filter;
        io.u(ctx, "loop_filter_level", 6, (0, 63), &mut lf.loop_filter_level)?;
        io.u(ctx, "loop_filter_sharpness", 3, (0, 7), &mut lf.loop_filter_sharpness)?;
        let mut delta_enabled = lf.loop_filter_delta_enabled as u32;
        io.u(ctx, "loop_filter_delta_enabled", 1, (0, 1), &mut delta_enabled)?;
        lf.loop_filter_delta_enabled = delta_enabled == 1;
        if lf.loop_filter_delta_enabled {
            let mut delta_update = lf.deltas.update_enabled as u32;
            io.u(ctx, "loop_filter_delta_update", 1, (0, 1), &mut delta_update)?;
            lf.deltas.update_enabled = delta_update == 1;
            if lf.deltas.update_enabled {
                for i in 0..4 {
                    let mut flag = 0u32;
                    io.u(ctx, "update_ref_delta", 1, (0, 1), &mut flag)?;
                    if flag == 1 {
                        io.s(ctx, "loop_filter_ref_delta", 6, (-63, 63), &mut lf.deltas.ref_deltas[i])?;
                    }
                }
                for i in 0..2 {
                    let mut flag = 0u32;
                    io.u(ctx, "update_mode_delta", 1, (0, 1), &mut flag)?;
                    if flag == 1 {
                        io.s(ctx, "loop_filter_mode_delta", 6, (-63, 63), &mut lf.deltas.mode_deltas[i])?;
                    }
                }
            }
        }
        Ok(())
    }

    fn delta_q<Io: SyntaxIo>(ctx: &Context, io: &mut Io, name: &'static str, current: Option<i32>) -> Result<Option<i32>> {
        let mut flag = current.is_some() as u32;
        io.u(ctx, "delta_coded", 1, (0, 1), &mut flag)?;
        if flag == 1 {
            let mut v = current.unwrap_or(0);
            io.s(ctx, name, 4, (-15, 15), &mut v)?;
            Ok(Some(v))
        } else {
            Ok(None)
        }
    }

    fn quantization_params<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        let q = &mut self.quantization;
        io.u(ctx, "base_q_idx", 8, (0, 255), &mut q.base_q_idx)?;
        q.delta_q_y_dc = Self::delta_q(ctx, io, "delta_q_y_dc", q.delta_q_y_dc)?;
        q.delta_q_uv_dc = Self::delta_q(ctx, io, "delta_q_uv_dc", q.delta_q_uv_dc)?;
        q.delta_q_uv_ac = Self::delta_q(ctx, io, "delta_q_uv_ac", q.delta_q_uv_ac)?;
        Ok(())
    }

    fn prob<Io: SyntaxIo>(ctx: &Context, io: &mut Io, name: &'static str, current: Option<u32>) -> Result<Option<u32>> {
        let mut flag = current.is_some() as u32;
        io.u(ctx, "prob_coded", 1, (0, 1), &mut flag)?;
        if flag == 1 {
            let mut v = current.unwrap_or(255);
            io.u(ctx, name, 8, (0, 255), &mut v)?;
            Ok(Some(v))
        } else {
            Ok(None)
        }
    }

    fn segmentation_params<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        let s = &mut self.segmentation;
        let mut enabled = s.enabled as u32;
        io.u(ctx, "segmentation_enabled", 1, (0, 1), &mut enabled)?;
        s.enabled = enabled == 1;
        if !s.enabled {
            return Ok(());
        }
        let mut update_map = s.update_map as u32;
        io.u(ctx, "segmentation_update_map", 1, (0, 1), &mut update_map)?;
        s.update_map = update_map == 1;
        if s.update_map {
            for i in 0..7 {
                s.tree_probs[i] = Self::prob(ctx, io, "segmentation_tree_prob", s.tree_probs[i])?;
            }
            let mut temporal_update = s.temporal_update as u32;
            io.u(ctx, "segmentation_temporal_update", 1, (0, 1), &mut temporal_update)?;
            s.temporal_update = temporal_update == 1;
            for i in 0..3 {
                s.pred_probs[i] = if s.temporal_update {
                    Self::prob(ctx, io, "segmentation_pred_prob", s.pred_probs[i])?
                } else {
                    if !io.is_reader() && s.pred_probs[i].is_some() {
                        ctx.log(
                            log::Level::Warn,
                            &format!(
                                "segmentation_pred_prob: caller-supplied value {:?} does not match inferred value None",
                                s.pred_probs[i]
                            ),
                        );
                    }
                    None
                };
            }
        }
        let mut update_data = s.update_data as u32;
        io.u(ctx, "segmentation_update_data", 1, (0, 1), &mut update_data)?;
        s.update_data = update_data == 1;
        if s.update_data {
            let mut abs_or_delta = 0u32;
            io.u(ctx, "segmentation_abs_or_delta_update", 1, (0, 1), &mut abs_or_delta)?;
            for seg in 0..8 {
                for feat in 0..4 {
                    let mut feature_enabled = s.feature_enabled[seg][feat] as u32;
                    io.u(ctx, "feature_enabled", 1, (0, 1), &mut feature_enabled)?;
                    s.feature_enabled[seg][feat] = feature_enabled == 1;
                    if s.feature_enabled[seg][feat] {
                        let bits = SEGMENTATION_FEATURE_BITS[feat];
                        if bits > 0 {
                            if SEGMENTATION_FEATURE_SIGNED[feat] {
                                let limit = (1i32 << bits) - 1;
                                io.s(ctx, "feature_value", bits, (-limit, limit), &mut s.feature_value[seg][feat])?;
                            } else {
                                let mut v = s.feature_value[seg][feat] as u32;
                                io.u(ctx, "feature_value", bits, (0, (1 << bits) - 1), &mut v)?;
                                s.feature_value[seg][feat] = v as i32;
                            }
                        } else {
                            warn_on_inferred_mismatch(
                                ctx,
                                io.is_reader(),
                                "feature_value",
                                s.feature_value[seg][feat] as i64,
                                0,
                            );
                            s.feature_value[seg][feat] = 0;
                        }
                    } else {
                        warn_on_inferred_mismatch(
                            ctx,
                            io.is_reader(),
                            "feature_value",
                            s.feature_value[seg][feat] as i64,
                            0,
                        );
                        s.feature_value[seg][feat] = 0;
                    }
                }
            }
        }
        Ok(())
    }

    fn tile_info<Io: SyntaxIo>(&mut self, ctx: &Context, io: &mut Io) -> Result<()> {
        let sb64_cols = match ctx.priv_data() {
            PrivData::Vp9(p) => p.sb64_cols.max(1) as u32,
            PrivData::Mpeg2 => unreachable!("VP9 plug-in always sees Vp9 priv data"),
        };
        let min_log2 = min_log2_tile_cols(sb64_cols);
        let max_log2 = max_log2_tile_cols(sb64_cols);
        // Always start the increment loop at min_log2, for both directions:
        // on read this is overwritten field-by-field as bits come in; on
        // write, starting at the (already clamped) target short-circuits
        // the loop and would under-emit the increment bits (spec example:
        // tile_cols_log2=1 must emit "1 0", not just "0").
        let mut log2 = min_log2;
        while log2 < max_log2 {
            let mut more = (self.tile_info.tile_cols_log2 > log2) as u32;
            io.u(ctx, "increment_tile_cols_log2", 1, (0, 1), &mut more)?;
            if more == 0 {
                break;
            }
            log2 += 1;
        }
        self.tile_info.tile_cols_log2 = log2;
        let mut tile_rows_log2 = (self.tile_info.tile_rows_log2 > 0) as u32;
        io.u(ctx, "tile_rows_log2", 1, (0, 1), &mut tile_rows_log2)?;
        if tile_rows_log2 == 1 {
            let mut second = (self.tile_info.tile_rows_log2 > 1) as u32;
            io.u(ctx, "tile_rows_log2_increment", 1, (0, 1), &mut second)?;
            self.tile_info.tile_rows_log2 = 1 + second;
        } else {
            self.tile_info.tile_rows_log2 = 0;
        }
        Ok(())
    }
}

fn min_log2_tile_cols(sb64_cols: u32) -> u32 {
    let mut min_log2 = 0u32;
    while (64 << min_log2) < sb64_cols {
        min_log2 += 1;
    }
    min_log2
}

fn max_log2_tile_cols(sb64_cols: u32) -> u32 {
    let mut max_log2 = 1u32;
    while (sb64_cols >> max_log2) >= 4 {
        max_log2 += 1;
    }
    max_log2 - 1
}

/// Derives `mi_cols`/`sb64_cols` (and the row equivalents) from a decoded
/// frame's dimensions and stores them on the context, so a later unit's
/// `tile_info` can read `sb64_cols` back out. Called by `read_unit` after
/// parsing, since the syntax-table `run` only has shared `&Context`
/// access.
fn update_priv_data(ctx: &mut Context, header: &Vp9FrameHeader) {
    if header.show_existing_frame {
        return;
    }
    let width = header.frame_width_minus_1 + 1;
    let height = header.frame_height_minus_1 + 1;
    let mi_cols = ((width + 7) >> 3) as u16;
    let mi_rows = ((height + 7) >> 3) as u16;
    let sb64_cols = mi_cols.div_ceil(8);
    let sb64_rows = mi_rows.div_ceil(8);
    if let PrivData::Vp9(p) = ctx.priv_data_mut() {
        *p = Vp9PrivData { mi_cols, mi_rows, sb64_cols, sb64_rows };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::driver;
    use crate::fragment::Position;

    fn ctx() -> Context {
        Context::init(CodecId::Vp9).unwrap()
    }

    #[test]
    fn keyframe_header_round_trips() {
        let mut ctx = ctx();
        let mut header = Vp9FrameHeader {
            profile: 0,
            show_frame: true,
            frame_type_key: true,
            color_config: ColorConfig { color_space: 1, color_range: 1, subsampling_x: 1, subsampling_y: 1, ..Default::default() },
            frame_width_minus_1: 1919,
            frame_height_minus_1: 1079,
            render_width_minus_1: 1919,
            render_height_minus_1: 1079,
            loop_filter: LoopFilterParams { loop_filter_level: 9, loop_filter_sharpness: 2, ..Default::default() },
            quantization: QuantizationParams { base_q_idx: 60, ..Default::default() },
            header_size_in_bytes: 42,
            ..Default::default()
        };

        let mut w = BitWriter::new();
        {
            let mut io = SyntaxWriter { w: &mut w };
            header.write(&mut ctx, &mut io).unwrap();
        }
        let (buf, _) = w.finish().unwrap();

        let mut fresh_ctx = Context::init(CodecId::Vp9).unwrap();
        let mut r = BitReader::new(&buf);
        let mut io = SyntaxReader { r: &mut r };
        let decoded = Vp9FrameHeader::parse(&mut fresh_ctx, &mut io).unwrap();

        assert_eq!(decoded.profile, 0);
        assert!(decoded.frame_type_key);
        assert!(decoded.show_frame);
        assert_eq!(decoded.frame_width_minus_1, 1919);
        assert_eq!(decoded.frame_height_minus_1, 1079);
        assert_eq!(decoded.loop_filter.loop_filter_level, 9);
        assert_eq!(decoded.quantization.base_q_idx, 60);
        assert_eq!(decoded.header_size_in_bytes, 42);
        assert_eq!(decoded.tile_info.tile_cols_log2, header.tile_info.tile_cols_log2);

        if let PrivData::Vp9(p) = fresh_ctx.priv_data() {
            assert_eq!(p.sb64_cols, 30);
        } else {
            panic!("expected Vp9 priv data");
        }
    }

    #[test]
    fn tile_info_1920x1080_clamp() {
        let sb64_cols = 30u32;
        assert_eq!(min_log2_tile_cols(sb64_cols), 0);
        assert_eq!(max_log2_tile_cols(sb64_cols), 2);
    }

    #[test]
    fn tile_info_write_emits_full_increment_sequence() {
        // 1920x1080: sb64_cols=30, min_log2=0, max_log2=2. Encoding
        // tile_cols_log2=1 must emit "1 0" (one increment bit per step up
        // to the target, then a stopping 0), not just the stopping bit.
        let mut ctx = ctx();
        if let PrivData::Vp9(p) = ctx.priv_data_mut() {
            *p = Vp9PrivData { mi_cols: 240, mi_rows: 135, sb64_cols: 30, sb64_rows: 17 };
        }
        let mut header = Vp9FrameHeader { tile_info: TileInfo { tile_cols_log2: 1, tile_rows_log2: 0 }, ..Default::default() };
        let mut w = BitWriter::new();
        {
            let mut io = SyntaxWriter { w: &mut w };
            header.tile_info(&ctx, &mut io).unwrap();
        }
        assert_eq!(w.position(), 3); // "1 0" + tile_rows_log2's single 0 bit
        let (buf, _) = w.finish().unwrap();
        assert_eq!(buf[0] >> 5, 0b100);
    }

    #[test]
    fn superframe_split_and_reassemble() {
        let mut ctx = ctx();
        let frame_a = vec![0xAAu8; 100];
        let frame_b = vec![0xBBu8; 200];
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&frame_a);
        bytes.extend_from_slice(&frame_b);
        bytes.extend_from_slice(&[0xC1, 0x64, 0xC8, 0xC1]);

        let mut frag = Fragment::new();
        frag.data = Some(bytes.clone());
        Vp9Codec.split_fragment(&mut ctx, &mut frag, false).unwrap();
        assert_eq!(frag.units.len(), 2);
        assert_eq!(frag.units[0].data.as_deref(), Some(frame_a.as_slice()));
        assert_eq!(frag.units[1].data.as_deref(), Some(frame_b.as_slice()));

        Vp9Codec.assemble_fragment(&mut ctx, &mut frag).unwrap();
        assert_eq!(frag.data.as_deref(), Some(bytes.as_slice()));
    }

    #[test]
    fn insert_and_assemble_produces_superframe_trailer() {
        let mut ctx = ctx();
        // Decomposition is off: this test is about insert/assemble
        // mechanics, not the uncompressed_header parser, so the original
        // unit's bytes are arbitrary and pass through untouched.
        ctx.set_decompose_unit_types(Some(vec![]));
        let bytes = vec![0x12, 0x34, 0x56];
        let mut frag = driver::read(&mut ctx, &bytes).unwrap();
        assert_eq!(frag.units.len(), 1);
        frag.insert_unit_data(Position::At(0), 0, vec![0x99, 0x88]).unwrap();
        assert_eq!(frag.units.len(), 2);

        let out = driver::write_packet(&mut ctx, &mut frag).unwrap();
        assert_eq!(out.len(), 2 + 3 + 2 + 2); // two frames + a 4-byte trailer (size_len=1)
        assert_eq!(out[out.len() - 4], 0xC1);
        assert_eq!(&out[..2], &[0x99, 0x88]);
        assert_eq!(&out[2..5], &[0x12, 0x34, 0x56]);
    }
}
