//! Configuration types for the snapshot consumer.
//!
//! Configuration is a JSON document. Parsing walks the document field by
//! field so that errors report the exact lookup path that failed, instead of
//! a generic deserialization message.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult, FieldPath, FieldStep};

/// Placeholder substituted for credentials by [`Config::sanitize`].
pub const REDACTED: &str = "<REDACTED>";

/// Root configuration for the snapshot consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Bootstrap server addresses. Must be non-empty.
    pub bootstrap_servers: Vec<String>,

    /// Consumer group id passed to the broker.
    pub group_id: String,

    /// Topics this configuration covers. Must be non-empty.
    pub topics: Vec<String>,

    /// How raw records are turned into output bytes.
    pub decoder: DecoderKind,

    /// The data format of the emitted byte stream.
    pub format: FormatDescriptor,

    /// Compression scheme wrapping the emitted byte stream, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_scheme: Option<CompressionScheme>,

    /// Security protocol for broker connections.
    #[serde(skip_serializing_if = "SecurityProtocol::is_plaintext")]
    pub security_protocol: SecurityProtocol,

    /// SASL authentication configuration, when the protocol requires it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sasl: Option<SaslConfig>,
}

/// Record decoder selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecoderKind {
    /// Emit each record's key bytes.
    RawKey,
    /// Emit each record's value bytes.
    RawValue,
}

impl DecoderKind {
    /// Parse a decoder name as it appears in the configuration document.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RawKey" => Some(Self::RawKey),
            "RawValue" => Some(Self::RawValue),
            _ => None,
        }
    }

    /// The decoder name as it appears in the configuration document.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RawKey => "RawKey",
            Self::RawValue => "RawValue",
        }
    }
}

/// Data format of the emitted byte stream, as declared in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum FormatDescriptor {
    /// JSON text, either one document per line or a single wrapping array.
    #[serde(rename = "json")]
    Json {
        variant: JsonVariant,
        precise: bool,
    },
}

/// How multiple JSON documents are laid out in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JsonVariant {
    /// One JSON document per line (ldjson).
    LineDelimited,
    /// A single top-level array of documents.
    ArrayWrapped,
}

impl JsonVariant {
    /// Parse a variant name as it appears in the configuration document.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "line-delimited" => Some(Self::LineDelimited),
            "array-wrapped" => Some(Self::ArrayWrapped),
            _ => None,
        }
    }
}

/// Compression scheme wrapping the emitted byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionScheme {
    Gzip,
}

impl CompressionScheme {
    /// Parse a scheme name as it appears in the configuration document.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gzip" => Some(Self::Gzip),
            _ => None,
        }
    }
}

/// The effective format of the emitted stream: the declared format, wrapped
/// in the compression scheme when one is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFormat {
    Json {
        variant: JsonVariant,
        precise: bool,
    },
    Compressed {
        scheme: CompressionScheme,
        inner: Box<DataFormat>,
    },
}

impl From<FormatDescriptor> for DataFormat {
    fn from(descriptor: FormatDescriptor) -> Self {
        match descriptor {
            FormatDescriptor::Json { variant, precise } => Self::Json { variant, precise },
        }
    }
}

/// Security protocol for broker connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    /// Plain TCP without encryption or authentication.
    #[default]
    Plaintext,
    /// TLS encryption without SASL authentication.
    Ssl,
    /// SASL authentication without TLS encryption.
    SaslPlaintext,
    /// TLS encryption with SASL authentication.
    SaslSsl,
}

impl SecurityProtocol {
    /// Parse a protocol name as it appears in the configuration document.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PLAINTEXT" => Some(Self::Plaintext),
            "SSL" => Some(Self::Ssl),
            "SASL_PLAINTEXT" => Some(Self::SaslPlaintext),
            "SASL_SSL" => Some(Self::SaslSsl),
            _ => None,
        }
    }

    /// The protocol name as passed to the broker client.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Plaintext => "PLAINTEXT",
            Self::Ssl => "SSL",
            Self::SaslPlaintext => "SASL_PLAINTEXT",
            Self::SaslSsl => "SASL_SSL",
        }
    }

    /// Check if TLS is required for this protocol.
    #[must_use]
    pub fn requires_tls(&self) -> bool {
        matches!(self, Self::Ssl | Self::SaslSsl)
    }

    /// Check if SASL is required for this protocol.
    #[must_use]
    pub fn requires_sasl(&self) -> bool {
        matches!(self, Self::SaslPlaintext | Self::SaslSsl)
    }

    fn is_plaintext(&self) -> bool {
        matches!(self, Self::Plaintext)
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SaslMechanism {
    /// SASL/PLAIN - simple username/password authentication.
    #[default]
    #[serde(rename = "PLAIN")]
    Plain,
    /// SASL/SCRAM-SHA-256 - salted challenge-response authentication.
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    /// SASL/SCRAM-SHA-512 - salted challenge-response authentication.
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
}

impl SaslMechanism {
    /// Parse a mechanism name as it appears in the configuration document.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PLAIN" => Some(Self::Plain),
            "SCRAM-SHA-256" => Some(Self::ScramSha256),
            "SCRAM-SHA-512" => Some(Self::ScramSha512),
            _ => None,
        }
    }

    /// The mechanism name as used in the SASL handshake.
    #[must_use]
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// SASL authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaslConfig {
    /// SASL mechanism to use.
    pub mechanism: SaslMechanism,

    /// Username for authentication.
    /// Supports environment variable expansion: "${KAFKA_USERNAME}"
    pub username: String,

    /// Password for authentication.
    /// Supports environment variable expansion: "${KAFKA_PASSWORD}"
    pub password: String,
}

impl SaslConfig {
    /// Get the username with environment variables expanded.
    #[must_use]
    pub fn username(&self) -> String {
        expand_env_vars(&self.username)
    }

    /// Get the password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable
/// `VAR_NAME`. If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// A position inside the configuration document, carrying the lookup path
/// that led to it.
struct Cursor<'a> {
    value: &'a Value,
    path: Vec<FieldStep>,
}

impl<'a> Cursor<'a> {
    fn root(value: &'a Value) -> Self {
        Self {
            value,
            path: Vec::new(),
        }
    }

    fn invalid(&self, expected: &'static str) -> ConfigError {
        ConfigError::InvalidField {
            path: FieldPath(self.path.clone()),
            expected,
        }
    }

    /// Descend into a required field, recording the step.
    fn descend(&self, name: &str) -> ConfigResult<Cursor<'a>> {
        let object = self.value.as_object().ok_or_else(|| self.invalid("object"))?;
        let mut path = self.path.clone();
        match object.get(name) {
            Some(value) => {
                path.push(FieldStep::found(name));
                Ok(Cursor { value, path })
            }
            None => {
                path.push(FieldStep::missing(name));
                Err(ConfigError::MissingField(FieldPath(path)))
            }
        }
    }

    /// Descend into an optional field; absence is not an error.
    fn descend_opt(&self, name: &str) -> ConfigResult<Option<Cursor<'a>>> {
        let object = self.value.as_object().ok_or_else(|| self.invalid("object"))?;
        Ok(object.get(name).map(|value| {
            let mut path = self.path.clone();
            path.push(FieldStep::found(name));
            Cursor { value, path }
        }))
    }

    fn as_str(&self) -> ConfigResult<&'a str> {
        self.value.as_str().ok_or_else(|| self.invalid("string"))
    }

    fn as_bool(&self) -> ConfigResult<bool> {
        self.value.as_bool().ok_or_else(|| self.invalid("boolean"))
    }

    fn as_string_array(&self) -> ConfigResult<Vec<String>> {
        let items = self
            .value
            .as_array()
            .ok_or_else(|| self.invalid("array of strings"))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid("array of strings"))
            })
            .collect()
    }
}

// Configuration loading and validation

impl Config {
    /// Parse a configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error naming the failing field: [`ConfigError::MissingField`]
    /// with the full lookup path when a required field is absent, a
    /// field-specific error when a field is present but invalid.
    pub fn parse(document: &Value) -> ConfigResult<Self> {
        let root = Cursor::root(document);

        let bootstrap_servers = root.descend("bootstrapServers")?.as_string_array()?;
        let group_id = root.descend("groupId")?.as_str()?.to_string();
        let topics = root.descend("topics")?.as_string_array()?;

        let decoder_cursor = root.descend("decoder")?;
        let decoder_name = decoder_cursor.as_str()?;
        let decoder = DecoderKind::from_name(decoder_name)
            .ok_or_else(|| ConfigError::UnknownDecoder(decoder_name.to_string()))?;

        let format = Self::parse_format(&root.descend("format")?)?;

        let compression_scheme = match root.descend_opt("compressionScheme")? {
            Some(cursor) => {
                let name = cursor.as_str()?;
                Some(
                    CompressionScheme::from_name(name)
                        .ok_or_else(|| ConfigError::UnknownCompressionScheme(name.to_string()))?,
                )
            }
            None => None,
        };

        let security_protocol = match root.descend_opt("securityProtocol")? {
            Some(cursor) => {
                let name = cursor.as_str()?;
                SecurityProtocol::from_name(name)
                    .ok_or_else(|| ConfigError::UnknownSecurityProtocol(name.to_string()))?
            }
            None => SecurityProtocol::default(),
        };

        let sasl = match root.descend_opt("sasl")? {
            Some(cursor) => Some(Self::parse_sasl(&cursor)?),
            None => None,
        };

        let config = Self {
            bootstrap_servers,
            group_id,
            topics,
            decoder,
            format,
            compression_scheme,
            security_protocol,
            sasl,
        };
        config.validate()?;
        Ok(config)
    }

    fn parse_format(cursor: &Cursor<'_>) -> ConfigResult<FormatDescriptor> {
        let type_cursor = cursor.descend("type")?;
        let type_name = type_cursor.as_str()?;
        match type_name {
            "json" => {
                let variant_cursor = cursor.descend("variant")?;
                let variant_name = variant_cursor.as_str()?;
                let variant = JsonVariant::from_name(variant_name)
                    .ok_or_else(|| ConfigError::UnknownFormatVariant(variant_name.to_string()))?;
                let precise = cursor.descend("precise")?.as_bool()?;
                Ok(FormatDescriptor::Json { variant, precise })
            }
            other => Err(ConfigError::UnknownFormatType(other.to_string())),
        }
    }

    fn parse_sasl(cursor: &Cursor<'_>) -> ConfigResult<SaslConfig> {
        let mechanism = match cursor.descend_opt("mechanism")? {
            Some(mechanism_cursor) => {
                let name = mechanism_cursor.as_str()?;
                SaslMechanism::from_name(name)
                    .ok_or_else(|| ConfigError::UnknownSaslMechanism(name.to_string()))?
            }
            None => SaslMechanism::default(),
        };
        let username = cursor.descend("username")?.as_str()?.to_string();
        let password = cursor.descend("password")?.as_str()?.to_string();
        Ok(SaslConfig {
            mechanism,
            username,
            password,
        })
    }

    /// Parse a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let document: Value = serde_json::from_str(content)?;
        Self::parse(&document)
    }

    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&content)
    }

    /// Serialize this configuration back to a JSON document that
    /// [`Config::parse`] accepts.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_value(&self) -> ConfigResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `bootstrapServers` or `topics` is empty.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bootstrap_servers.is_empty() {
            return Err(ConfigError::EmptyArray {
                field: "bootstrapServers".to_string(),
            });
        }
        if self.topics.is_empty() {
            return Err(ConfigError::EmptyArray {
                field: "topics".to_string(),
            });
        }
        Ok(())
    }

    /// The effective format of the emitted stream: the declared format
    /// wrapped in the compression scheme when one is configured.
    #[must_use]
    pub fn data_format(&self) -> DataFormat {
        let base = DataFormat::from(self.format.clone());
        match self.compression_scheme {
            Some(scheme) => DataFormat::Compressed {
                scheme,
                inner: Box::new(base),
            },
            None => base,
        }
    }

    /// A copy of this configuration with credentials redacted, safe for
    /// display and logging.
    ///
    /// Idempotent; the identity transformation when the configuration
    /// carries no credentials.
    #[must_use]
    pub fn sanitize(&self) -> Self {
        let mut sanitized = self.clone();
        if let Some(sasl) = &mut sanitized.sasl {
            sasl.password = REDACTED.to_string();
        }
        sanitized
    }

    /// Whether this configuration carries redacted placeholder credentials.
    #[must_use]
    pub fn is_sanitized(&self) -> bool {
        self.sasl
            .as_ref()
            .is_some_and(|sasl| sasl.password == REDACTED)
    }

    /// Replace this configuration wholesale with `patch`.
    ///
    /// The patch is accepted verbatim; no field-level merging happens. A
    /// patch still carrying redacted placeholder credentials is rejected,
    /// since accepting it would store the placeholder as a real password.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RedactedPatch`] if the patch is sanitized.
    pub fn reconfigure(&self, patch: Self) -> ConfigResult<Self> {
        if patch.is_sanitized() {
            return Err(ConfigError::RedactedPatch);
        }
        Ok(patch)
    }
}
