//! Error types for the DCCL codec.

use thiserror::Error;

use crate::schema::WireClass;

/// One reason a schema failed validation, anchored to a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationCause {
    /// Dotted path from the message root, e.g. `"status.depth"`.
    pub path: String,
    /// Human-readable reason.
    pub reason: String,
}

impl std::fmt::Display for ValidationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Errors surfaced by the codec engine and field codecs.
#[derive(Debug, Error)]
pub enum DcclError {
    /// Schema rejected at load time. Carries every cause found, not just the first.
    #[error("schema validation failed: {}", format_causes(.0))]
    Validation(Vec<ValidationCause>),

    /// Decode of a DCCL id that has not been loaded.
    #[error("unknown DCCL id {0}")]
    UnknownId(u16),

    /// A required numeric value fell outside its declared `[min, max]`.
    #[error("field `{field}` value {value} outside [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Decode ran past the end of the input.
    #[error("short frame: needed {requested} bits, {available} available")]
    ShortFrame { requested: u32, available: u32 },

    /// A field codec saw bits it cannot map to a value (e.g. a reserved enum point).
    #[error("field `{field}` decode failed: {reason}")]
    FieldDecode { field: String, reason: String },

    /// Codec name not present in the registry for that wire class.
    #[error("no codec named `{name}` for {class:?} fields")]
    UnknownCodec { class: WireClass, name: String },

    /// Re-registration of an existing (wire class, name) pair with a different implementation.
    #[error("codec `{name}` already registered for {class:?} fields with a different implementation")]
    CodecConflict { class: WireClass, name: String },

    /// Body failed to decode with a passphrase configured; the keystream did not match.
    #[error("decryption failed: body does not decode under the configured passphrase")]
    DecryptFailed,

    /// A codec plugin entry point reported failure.
    #[error("codec plugin failed: {0}")]
    Plugin(String),
}

fn format_causes(causes: &[ValidationCause]) -> String {
    causes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
