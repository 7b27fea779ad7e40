//! Domain error types for the snapshot consumer.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use std::fmt;

use thiserror::Error;

/// One step of a field lookup while parsing a configuration document.
///
/// Records the field name and whether the lookup resolved, so that a parse
/// error can report the exact downward path that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStep {
    /// The field name that was looked up.
    pub name: String,
    /// Whether the field was present at this step.
    pub found: bool,
}

impl FieldStep {
    /// A step that resolved to a value.
    #[must_use]
    pub fn found(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            found: true,
        }
    }

    /// A step that failed to resolve.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            found: false,
        }
    }
}

/// The ordered sequence of field lookups that led to a parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(pub Vec<FieldStep>);

impl FieldPath {
    /// The name of the innermost field on the path.
    #[must_use]
    pub fn field(&self) -> &str {
        self.0.last().map_or("", |step| step.name.as_str())
    }

    /// The lookup steps, outermost first.
    #[must_use]
    pub fn steps(&self) -> &[FieldStep] {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("document root");
        }
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&step.name)?;
        }
        if let Some(step) = self.0.last() {
            if !step.found {
                f.write_str(" (not found)")?;
            }
        }
        Ok(())
    }
}

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required field was absent from the document.
    #[error("missing required field: {0}")]
    MissingField(FieldPath),

    /// A field resolved but to the wrong shape.
    #[error("invalid value at {path}: expected {expected}")]
    InvalidField {
        path: FieldPath,
        expected: &'static str,
    },

    /// A required list field was present but empty.
    #[error("{field} value cannot be an empty array")]
    EmptyArray { field: String },

    /// The decoder name is not one of the supported decoders.
    #[error("unsupported decoder: {0}")]
    UnknownDecoder(String),

    /// The format type is not one of the supported formats.
    #[error("unsupported format type: {0}")]
    UnknownFormatType(String),

    /// The format variant is not valid for the format type.
    #[error("unsupported format variant: {0}")]
    UnknownFormatVariant(String),

    /// The compression scheme is not supported.
    #[error("unsupported compression scheme: {0}")]
    UnknownCompressionScheme(String),

    /// The security protocol name is not supported.
    #[error("unsupported security protocol: {0}")]
    UnknownSecurityProtocol(String),

    /// The SASL mechanism name is not supported.
    #[error("unsupported sasl mechanism: {0}")]
    UnknownSaslMechanism(String),

    /// A reconfiguration patch still carried redacted credentials.
    #[error("patch contains redacted credentials and cannot replace the configuration")]
    RedactedPatch,

    /// Failed to read a configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The document is not syntactically valid JSON.
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the broker client collaborator.
///
/// All of these are fatal to the fetch that observed them. Retry policy, if
/// any, belongs to the caller.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Failed to create or connect the underlying client.
    #[error("failed to connect to brokers: {message}")]
    Connect { message: String },

    /// Failed to subscribe to the topic.
    #[error("failed to subscribe to topic '{topic}': {message}")]
    Subscribe { topic: String, message: String },

    /// Failed to read the partition assignment.
    #[error("failed to read partition assignment: {message}")]
    Assignment { message: String },

    /// Failed to query the end offset of a partition.
    #[error("failed to query offsets for {topic}/{partition}: {message}")]
    OffsetQuery {
        topic: String,
        partition: i32,
        message: String,
    },

    /// The per-partition record stream reported an error.
    #[error("record stream error on {topic}/{partition}: {message}")]
    Stream {
        topic: String,
        partition: i32,
        message: String,
    },

    /// No record stream exists for the requested partition.
    #[error("partition {topic}/{partition} is not assigned to this client")]
    UnassignedPartition { topic: String, partition: i32 },
}

/// A single record could not be decoded.
///
/// Decode errors are not retried and terminate the whole fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The record has no key but the decoder emits keys.
    #[error("record {topic}/{partition}@{offset} has no key")]
    MissingKey {
        topic: String,
        partition: i32,
        offset: i64,
    },

    /// The record has no value (tombstone) but the decoder emits values.
    #[error("record {topic}/{partition}@{offset} has no value")]
    MissingValue {
        topic: String,
        partition: i32,
        offset: i64,
    },
}

/// Errors surfaced by [`fetch`](crate::consumer::BoundedConsumer::fetch).
#[derive(Error, Debug)]
pub enum FetchError {
    /// The broker client failed during subscribe, snapshot, or streaming.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A record could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for broker client operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_display() {
        let path = FieldPath(vec![
            FieldStep::found("format"),
            FieldStep::missing("variant"),
        ]);
        assert_eq!(path.to_string(), "format.variant (not found)");
        assert_eq!(path.field(), "variant");
    }

    #[test]
    fn test_field_path_display_found() {
        let path = FieldPath(vec![FieldStep::found("topics")]);
        assert_eq!(path.to_string(), "topics");
    }

    #[test]
    fn test_empty_array_message() {
        let err = ConfigError::EmptyArray {
            field: "topics".to_string(),
        };
        assert_eq!(err.to_string(), "topics value cannot be an empty array");
    }

    #[test]
    fn test_missing_field_names_the_field() {
        let err = ConfigError::MissingField(FieldPath(vec![FieldStep::missing("groupId")]));
        assert!(err.to_string().contains("groupId"));
    }

    #[test]
    fn test_fetch_error_from_broker() {
        let broker = BrokerError::Assignment {
            message: "lost connection".to_string(),
        };
        let err: FetchError = broker.into();
        assert!(matches!(err, FetchError::Broker(_)));
    }

    #[test]
    fn test_fetch_error_from_decode() {
        let decode = DecodeError::MissingKey {
            topic: "t".to_string(),
            partition: 0,
            offset: 7,
        };
        let err: FetchError = decode.into();
        assert!(matches!(err, FetchError::Decode(_)));
        assert!(err.to_string().contains("t/0@7"));
    }
}
