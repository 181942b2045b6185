//! Mapping from a codec identifier to its plug-in: the generic
//! framework's only point of per-codec dispatch.

use crate::error::{CbsError, Result};
use crate::fragment::{Fragment, Unit};
use crate::Context;

/// An enum-like codec identifier matching upstream conventions. Only
/// `Mpeg2Video` and `Vp9` have registered plug-ins; `H264`/`H265` are
/// accepted by the type (so callers enumerating all four compile and
/// link) but `init` reports them as `Unimplemented`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecId {
    Mpeg2Video,
    Vp9,
    H264,
    H265,
}

/// A codec's vtable: split a fragment into units, decode/encode a unit's
/// content, and re-assemble a fragment's raw bytes from its units.
///
/// There is no `free_unit` hook: with content modeled as an owned Rust
/// value, `Drop` does that job for every codec uniformly.
pub trait CodecPlugin {
    fn codec_id(&self) -> CodecId;

    /// Slice `frag.data` into unit records by the codec's own framing
    /// rules. `header_hint` is true for the `read_extradata` entry point.
    /// Each resulting unit has `data` and `unit_type` set and `content`
    /// unset; units own their bytes by copy, independent of `frag.data`'s
    /// lifetime.
    fn split_fragment(&self, ctx: &mut Context, frag: &mut Fragment, header_hint: bool) -> Result<()>;

    /// Bit-decode `unit.data` into a freshly built `unit.content`.
    fn read_unit(&self, ctx: &mut Context, unit: &mut Unit) -> Result<()>;

    /// Bit-encode `unit.content` into a freshly built `unit.data`,
    /// updating `data_bit_padding` if the result isn't byte-aligned.
    fn write_unit(&self, ctx: &mut Context, unit: &mut Unit) -> Result<()>;

    /// Concatenate unit `data` arrays with whatever codec-level framing
    /// is required into `frag.data`.
    fn assemble_fragment(&self, ctx: &mut Context, frag: &mut Fragment) -> Result<()>;

    /// Frees codec-internal state held by a context. Default no-op; VP9
    /// and MPEG-2 currently need nothing beyond ordinary `Drop`.
    fn close(&self, _ctx: &mut Context) {}
}

pub fn lookup(codec_id: CodecId) -> Result<Box<dyn CodecPlugin>> {
    match codec_id {
        CodecId::Mpeg2Video => Ok(Box::new(crate::codecs::mpeg2::Mpeg2Codec)),
        CodecId::Vp9 => Ok(Box::new(crate::codecs::vp9::Vp9Codec)),
        CodecId::H264 => Err(CbsError::Unimplemented("codec H.264 has no registered plug-in".into())),
        CodecId::H265 => Err(CbsError::Unimplemented("codec H.265 has no registered plug-in".into())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unsupported_codec_is_unimplemented() {
        assert!(matches!(lookup(CodecId::H264), Err(CbsError::Unimplemented(_))));
        assert!(matches!(lookup(CodecId::H265), Err(CbsError::Unimplemented(_))));
    }

    #[test]
    fn supported_codecs_resolve() {
        assert_eq!(lookup(CodecId::Mpeg2Video).unwrap().codec_id(), CodecId::Mpeg2Video);
        assert_eq!(lookup(CodecId::Vp9).unwrap().codec_id(), CodecId::Vp9);
    }
}
