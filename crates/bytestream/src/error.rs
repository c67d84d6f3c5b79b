//! Codec error taxonomy.
//!
//! Errors are scoped to the fragment (or sub-block) being converted; the
//! caller decides whether to skip the fragment and carry on. Only
//! [`CodecError::TooManyErrors`] escalates channel-level anomalies to a
//! fragment-level failure.

use thiserror::Error;

use crate::codecs::SubsystemKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer cursor violation. Fatal to the current fragment.
    #[error(transparent)]
    OutOfRange(#[from] l1calo_words::OutOfRange),

    /// Length or structure mismatch. Fatal to the current fragment, other
    /// fragments are unaffected.
    #[error("malformed fragment (source id {source_id:#010x}): {reason}")]
    MalformedFragment { source_id: u32, reason: String },

    /// Unknown (version, format) combination for a sub-fragment.
    #[error("unsupported data version/format {version}/{format} for {kind}")]
    UnsupportedFormat {
        kind: SubsystemKind,
        version: u8,
        format: u8,
    },

    /// Unknown PPM compression scheme version.
    #[error("unsupported compression version {version}")]
    UnsupportedCompression { version: u8 },

    /// More channel anomalies than ErrorMax allows; the fragment is
    /// considered systemically corrupt.
    #[error(
        "{count} channel anomalies exceed ErrorMax {max} (source id {source_id:#010x})"
    )]
    TooManyErrors {
        source_id: u32,
        count: u32,
        max: u32,
    },

    /// Slice counts or peak offsets differ between primitives that must
    /// share one sub-fragment.
    #[error("inconsistent slice counts for crate {crate_no} slink {slink}")]
    SliceMismatch { crate_no: u8, slink: u8 },

    /// The same channel key appeared twice in one conversion.
    #[error("duplicate {what} for crate {crate_no} module {module} index {index}")]
    Duplicate {
        what: &'static str,
        crate_no: u8,
        module: u8,
        index: u16,
    },

    /// Bad value in the configuration property map.
    #[error("configuration: {0}")]
    Config(String),
}

impl CodecError {
    pub(crate) fn malformed(source_id: u32, reason: impl Into<String>) -> Self {
        CodecError::MalformedFragment {
            source_id,
            reason: reason.into(),
        }
    }
}
