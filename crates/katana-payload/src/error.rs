/// Errors raised by path operations on a [`crate::PathDocument`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathError {
    /// Nothing is stored at the path and no default is registered.
    #[error("path not found: {0:?}")]
    NotFound(String),

    /// A segment that must be traversed holds something other than a mapping.
    #[error("cannot use {segment:?} in {path:?} as a mapping: found {found}")]
    NotAMapping {
        path: String,
        segment: String,
        found: &'static str,
    },

    /// The push target holds something other than a sequence.
    #[error("cannot push to {path:?}: found {found}")]
    NotASequence { path: String, found: &'static str },

    /// The value given to merge is not a mapping.
    #[error("merge value must be a mapping, got {0}")]
    MergeSourceNotMapping(&'static str),

    /// The value used as a document root is not a mapping.
    #[error("document root must be a mapping, got {0}")]
    RootNotMapping(&'static str),

    /// The path has no segments.
    #[error("empty path")]
    EmptyPath,
}

/// Errors raised while packing or unpacking wire payloads.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// The encoder failed to write a value.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A container has more entries than the format can describe.
    #[error("{kind} too large to encode ({len} entries)")]
    TooLarge { kind: &'static str, len: usize },

    /// The input ended inside a value.
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    /// A reserved marker byte was found.
    #[error("invalid marker 0x{marker:02x} at byte {offset}")]
    InvalidMarker { marker: u8, offset: usize },

    /// A map key is not a string.
    #[error("map key at byte {0} is not a string")]
    NonStringKey(usize),

    /// A string is not valid UTF-8.
    #[error("invalid UTF-8 string at byte {0}")]
    InvalidUtf8(usize),

    /// An unsigned integer does not fit in an `i64`.
    #[error("integer at byte {0} does not fit in i64")]
    IntegerOverflow(usize),

    /// Containers are nested deeper than the decoder allows.
    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),

    /// Bytes remain after the top-level value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// The top-level value is not a mapping.
    #[error("expected a mapping at the document root, got {0}")]
    NotADocument(&'static str),
}

/// A string that is not a valid decimal literal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal literal: {0:?}")]
pub struct InvalidDecimal(pub String);
