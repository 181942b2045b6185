//! A coded bitstream library: split, parse, edit and re-serialize
//! compressed video bitstreams at the granularity of syntactic units
//! (parameter sets, headers, slices).
//!
//! Two codec plug-ins are provided: [`codecs::mpeg2`] for start-code
//! delimited bitstreams, and [`codecs::vp9`] for superframe-indexed ones.
//! Both are driven through the same [`Context`] and [`driver`] entry
//! points.

pub mod bitio;
pub mod codecs;
pub mod driver;
pub mod error;
pub mod fragment;
pub mod primitives;
pub mod registry;
pub mod trace;

pub use error::{CbsError, Result};
pub use fragment::{ContentOrigin, Fragment, Position, Unit, UnitContent};
pub use registry::CodecId;

/// Per-codec decoding/encoding context. Reusable across many fragments,
/// not thread-safe, and not meant to be shared across threads (the
/// concurrency model is single-writer per context).
pub struct Context {
    codec_id: CodecId,
    priv_data: PrivData,
    decompose_unit_types: Option<Vec<u32>>,
    trace_enabled: bool,
    trace_level: log::Level,
    log_sink: Box<dyn LogSink>,
}

/// Per-codec state that spans units within a single context (e.g. VP9's
/// derived `mi_cols`/`sb64_rows`, carried forward from one frame header
/// to the next so `frame_size_with_refs` can borrow a previous size).
pub(crate) enum PrivData {
    Mpeg2,
    Vp9(codecs::vp9::Vp9PrivData),
}

impl Context {
    /// Looks up the codec's plug-in in the registry and creates a fresh
    /// context for it. Fails with [`CbsError::Unimplemented`] for a
    /// recognised but unsupported codec id (H.264, H.265).
    pub fn init(codec_id: CodecId) -> Result<Context> {
        Self::init_with_sink(codec_id, Box::new(DefaultLogSink))
    }

    pub fn init_with_sink(codec_id: CodecId, log_sink: Box<dyn LogSink>) -> Result<Context> {
        // Validated eagerly so construction fails for an unsupported
        // codec id rather than deferring the error to first use.
        registry::lookup(codec_id)?;
        let priv_data = match codec_id {
            CodecId::Mpeg2Video => PrivData::Mpeg2,
            CodecId::Vp9 => PrivData::Vp9(codecs::vp9::Vp9PrivData::default()),
            CodecId::H264 | CodecId::H265 => unreachable!("registry::lookup rejects these"),
        };
        Ok(Context {
            codec_id,
            priv_data,
            decompose_unit_types: None,
            trace_enabled: false,
            trace_level: log::Level::Trace,
            log_sink,
        })
    }

    /// Frees codec internal state. A context may still be dropped
    /// directly; this just gives the plug-in a chance to run its `close`
    /// hook first (e.g. to flush anything buffered).
    pub fn close(&mut self) {
        let codec = self.plugin();
        codec.close(self);
    }

    pub fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    pub fn set_trace_enabled(&mut self, enabled: bool) {
        self.trace_enabled = enabled;
    }

    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    pub fn set_trace_level(&mut self, level: log::Level) {
        self.trace_level = level;
    }

    /// Restricts `read_fragment_content` to decomposing only the listed
    /// unit types; other types are split but left as raw bytes. `None`
    /// (the default) decomposes everything.
    pub fn set_decompose_unit_types(&mut self, types: Option<Vec<u32>>) {
        self.decompose_unit_types = types;
    }

    pub(crate) fn should_decompose(&self, unit_type: u32) -> bool {
        match &self.decompose_unit_types {
            None => true,
            Some(types) => types.contains(&unit_type),
        }
    }

    pub(crate) fn priv_data(&self) -> &PrivData {
        &self.priv_data
    }

    pub(crate) fn priv_data_mut(&mut self) -> &mut PrivData {
        &mut self.priv_data
    }

    /// Looks the codec plug-in back up from `codec_id`. Plug-ins are
    /// stateless and immutable, so re-resolving one is cheap and
    /// sidesteps holding a borrow of `Context` while also needing to
    /// pass it `&mut`.
    pub(crate) fn plugin(&self) -> Box<dyn registry::CodecPlugin> {
        registry::lookup(self.codec_id).expect("codec_id was validated at init")
    }

    /// Operational diagnostics (a unit skipped, a trailer padded with
    /// unclaimed bytes): always goes through the ambient `log` facade,
    /// never through the installed [`LogSink`] — the sink is reserved for
    /// per-syntax-element trace text, see [`Context::trace`].
    pub(crate) fn log(&self, level: log::Level, message: &str) {
        log::log!(level, "{}", message);
    }

    /// Per-syntax-element trace text: goes only to the installed
    /// [`LogSink`], never to the `log` facade, so a caller capturing a
    /// golden trace file doesn't also see unrelated warning lines mixed
    /// into the same stream.
    pub(crate) fn trace(&self, level: log::Level, message: &str) {
        if level <= self.trace_level {
            self.log_sink.log(level, message);
        }
    }
}

/// Receives trace/diagnostic text from a [`Context`]. The default
/// implementation is a no-op; ordinary operational logging always goes
/// through the ambient `log` facade instead of the sink, so a caller
/// only needs to install one to capture trace output verbatim (a
/// golden-file test, say).
pub trait LogSink {
    fn log(&self, level: log::Level, message: &str);
}

#[derive(Debug, Default)]
pub struct DefaultLogSink;

impl LogSink for DefaultLogSink {
    fn log(&self, _level: log::Level, _message: &str) {}
}
