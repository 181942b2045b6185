//! The two representative codec plug-ins: a start-code-delimited codec
//! (MPEG-2 pattern) and a superframe-indexed codec (VP9 pattern).

pub mod mpeg2;
pub mod vp9;
