//! Error taxonomy shared by every codec plug-in.

use std::fmt;

/// Everything that can go wrong while splitting, decoding, mutating or
/// re-assembling a fragment.
#[derive(Debug)]
pub enum CbsError {
    /// A caller-supplied argument was out of range or the call is not
    /// valid in the current state (bad `pos`, too many superframe units,
    /// an unsupported codec id passed to `init`).
    InvalidArgument(String),
    /// The bitstream itself violates a syntax-table constraint: a range
    /// check failed, a marker bit was wrong, a Golomb prefix ran too
    /// long, a sync code mismatched, or a unit was truncated mid-field.
    InvalidData(String),
    /// The bit reader ran off the end of its buffer.
    Truncated { name: &'static str, needed: u32, remaining: u64 },
    /// The bit writer has no room left for the requested bits.
    NoSpace { name: &'static str, needed: u32, remaining: u64 },
    /// Allocation failed (reachable only if a caller-supplied capacity
    /// hint is exceeded; ordinary allocation in this crate is infallible).
    OutOfMemory,
    /// The unit type is recognised but this plug-in has no code for it.
    /// A warning on read (the unit is skipped); fatal on write.
    Unimplemented(String),
    /// The start code or unit type is not one this plug-in understands
    /// at all. Fatal on both paths.
    Unknown(String),
}

impl fmt::Display for CbsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CbsError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            CbsError::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            CbsError::Truncated { name, needed, remaining } => write!(
                f,
                "truncated reading {}: needed {} bits, {} remaining",
                name, needed, remaining
            ),
            CbsError::NoSpace { name, needed, remaining } => write!(
                f,
                "no space writing {}: needed {} bits, {} remaining",
                name, needed, remaining
            ),
            CbsError::OutOfMemory => write!(f, "out of memory"),
            CbsError::Unimplemented(msg) => write!(f, "unimplemented: {}", msg),
            CbsError::Unknown(msg) => write!(f, "unknown: {}", msg),
        }
    }
}

impl std::error::Error for CbsError {}

impl CbsError {
    /// True for the one kind that `read_fragment_content` swallows into a
    /// warning rather than propagating, per the driver's error policy.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, CbsError::Unimplemented(_))
    }

    pub(crate) fn range(name: &'static str, value: i64, min: i64, max: i64) -> CbsError {
        CbsError::InvalidData(format!(
            "{} out of range: value {} not in [{}, {}]",
            name, value, min, max
        ))
    }
}

impl From<std::io::Error> for CbsError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CbsError::Truncated {
                name: "<io>",
                needed: 0,
                remaining: 0,
            },
            _ => CbsError::NoSpace {
                name: "<io>",
                needed: 0,
                remaining: 0,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, CbsError>;
