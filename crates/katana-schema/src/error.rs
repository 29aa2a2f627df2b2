use katana_payload::CodecError;

/// Errors raised while reading service schemas.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// A version pattern contains characters outside `[A-Za-z0-9*.,-_]`.
    #[error("invalid version pattern: {0:?}")]
    InvalidVersionPattern(String),

    /// No known version matches the pattern.
    #[error("Service version not found for pattern: \"{0}\"")]
    VersionNotFound(String),

    /// The registry has no schema for the service and version.
    #[error("Cannot resolve schema for Service: \"{service}\" ({version})")]
    ServiceNotFound { service: String, version: String },

    /// Encoded mappings exceed the configured size limit.
    #[error("schema mappings too large ({size} bytes, max {max})")]
    MappingsTooLarge { size: usize, max: usize },

    /// Encoded mappings could not be decoded.
    #[error("invalid schema mappings: {0}")]
    InvalidMappings(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
