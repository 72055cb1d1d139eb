//! The content negotiator.
//!
//! [`ContentSerdes`] maps media types to [`Codec`]s and to the numeric
//! content format codes used by constrained protocols. Media types are
//! always compared without their parameters and in lower case.

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::DefaultHashBuilder;

use indexmap::{IndexMap, IndexSet};

use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::schema::{DataSchema, SchemaType};

/// The default content type.
pub const DEFAULT: &str = "application/json";
/// The Thing document content type.
pub const TD: &str = "application/td+json";
/// The `JSON-LD` content type.
pub const JSON_LD: &str = "application/ld+json";
/// The plain text content type.
pub const TEXT: &str = "text/plain";
/// The `CoRE` link format content type.
pub const LINK_FORMAT: &str = "application/link-format";

const CONTENT_FORMATS: &[(&str, u16)] = &[
    (TEXT, 0),
    (LINK_FORMAT, 40),
    ("application/octet-stream", 42),
    (DEFAULT, 50),
    ("application/cbor", 60),
    (TD, 432),
];

/// Returns a content type without parameters and in lower case.
///
/// `application/json; charset=utf-8` becomes `application/json`.
#[must_use]
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// A content codec.
pub trait Codec: Send + Sync {
    /// Returns the media type handled by the codec.
    fn media_type(&self) -> &str;

    /// Decodes a payload into a `JSON` value.
    ///
    /// # Errors
    ///
    /// Fails when the payload is malformed.
    fn bytes_to_value(&self, bytes: &[u8], schema: Option<&DataSchema>) -> Result<Value>;

    /// Encodes a `JSON` value into a payload.
    ///
    /// # Errors
    ///
    /// Fails when the value cannot be represented.
    fn value_to_bytes(&self, value: &Value, schema: Option<&DataSchema>) -> Result<Vec<u8>>;
}

/// A `JSON` codec.
///
/// The same codec serves every `JSON`-based media type.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    // Served media type.
    media_type: String,
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(DEFAULT)
    }
}

impl JsonCodec {
    /// Creates a [`JsonCodec`] for a `JSON`-based media type.
    #[must_use]
    pub fn new(media_type: &str) -> Self {
        Self {
            media_type: self::media_type(media_type),
        }
    }
}

impl Codec for JsonCodec {
    fn media_type(&self) -> &str {
        &self.media_type
    }

    fn bytes_to_value(&self, bytes: &[u8], schema: Option<&DataSchema>) -> Result<Value> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }

        match serde_json::from_slice(bytes) {
            Ok(value) => Ok(value),
            Err(e) => {
                // Bare strings are accepted for string schemas.
                if schema.and_then(|schema| schema.kind) == Some(SchemaType::String)
                    && let Ok(text) = core::str::from_utf8(bytes)
                {
                    return Ok(Value::String(text.into()));
                }
                Err(e.into())
            }
        }
    }

    fn value_to_bytes(&self, value: &Value, _schema: Option<&DataSchema>) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(Into::into)
    }
}

/// A plain text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn media_type(&self) -> &str {
        TEXT
    }

    fn bytes_to_value(&self, bytes: &[u8], schema: Option<&DataSchema>) -> Result<Value> {
        let text = core::str::from_utf8(bytes)
            .map_err(|e| Error::new(ErrorKind::Serialization, e.to_string()))?;

        let invalid = |expected: SchemaType| {
            Error::new(
                ErrorKind::Serialization,
                format!("`{text}` is not a valid {expected}"),
            )
        };

        Ok(match schema.and_then(|schema| schema.kind) {
            Some(SchemaType::Boolean) => Value::Bool(
                text.trim()
                    .parse()
                    .map_err(|_| invalid(SchemaType::Boolean))?,
            ),
            Some(SchemaType::Integer) => Value::from(
                text.trim()
                    .parse::<i64>()
                    .map_err(|_| invalid(SchemaType::Integer))?,
            ),
            Some(SchemaType::Number) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid(SchemaType::Number))?,
            Some(SchemaType::Null) if text.is_empty() => Value::Null,
            _ => Value::String(text.into()),
        })
    }

    fn value_to_bytes(&self, value: &Value, _schema: Option<&DataSchema>) -> Result<Vec<u8>> {
        match value {
            Value::String(text) => Ok(text.as_bytes().to_vec()),
            Value::Null => Ok(Vec::new()),
            other => serde_json::to_vec(other).map_err(Into::into),
        }
    }
}

/// The content negotiator.
///
/// Holds the registered [`Codec`]s, the media types offered when
/// generating forms and the numeric content format codes.
#[derive(Clone)]
pub struct ContentSerdes {
    // Codecs by media type.
    codecs: IndexMap<String, Arc<dyn Codec>, DefaultHashBuilder>,
    // Media types offered at exposure time.
    offered: IndexSet<String, DefaultHashBuilder>,
    // Numeric content format codes by media type.
    content_formats: IndexMap<String, u16, DefaultHashBuilder>,
}

impl core::fmt::Debug for ContentSerdes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContentSerdes")
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .field("offered", &self.offered)
            .field("content_formats", &self.content_formats)
            .finish()
    }
}

impl Default for ContentSerdes {
    fn default() -> Self {
        Self::empty()
            .codec(JsonCodec::default(), true)
            .codec(JsonCodec::new(TD), false)
            .codec(JsonCodec::new(JSON_LD), false)
            .codec(TextCodec, false)
    }
}

impl ContentSerdes {
    /// Creates a [`ContentSerdes`] without codecs but with the default
    /// content format codes.
    #[must_use]
    pub fn empty() -> Self {
        let mut content_formats = IndexMap::with_hasher(DefaultHashBuilder::default());
        for (media_type, code) in CONTENT_FORMATS {
            content_formats.insert((*media_type).into(), *code);
        }

        Self {
            codecs: IndexMap::with_hasher(DefaultHashBuilder::default()),
            offered: IndexSet::with_hasher(DefaultHashBuilder::default()),
            content_formats,
        }
    }

    /// Adds a [`Codec`].
    ///
    /// When `offered` is `true`, its media type is used to generate forms.
    #[must_use]
    pub fn codec(mut self, codec: impl Codec + 'static, offered: bool) -> Self {
        self.add_codec(codec, offered);
        self
    }

    /// Adds a [`Codec`], replacing any codec for the same media type.
    pub fn add_codec(&mut self, codec: impl Codec + 'static, offered: bool) {
        let media_type = media_type(codec.media_type());
        log::debug!("Adding codec for `{media_type}`");
        if offered {
            self.offered.insert(media_type.clone());
        }
        self.codecs.insert(media_type, Arc::new(codec));
    }

    /// Checks whether a content type has a [`Codec`].
    #[must_use]
    pub fn is_supported(&self, content_type: &str) -> bool {
        self.codecs.contains_key(&media_type(content_type))
    }

    /// Returns the media types having a [`Codec`].
    pub fn supported_media_types(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }

    /// Returns the media types offered at exposure time, in insertion
    /// order.
    pub fn offered_media_types(&self) -> impl Iterator<Item = &str> {
        self.offered.iter().map(String::as_str)
    }

    /// Registers a numeric content format code for a content type.
    ///
    /// Existing content types and existing codes are never overridden.
    /// Returns whether the code has been registered.
    pub fn register_content_format(&mut self, content_type: &str, code: u16) -> bool {
        let media_type = media_type(content_type);
        if self.content_formats.contains_key(&media_type)
            || self.content_formats.values().any(|c| *c == code)
        {
            return false;
        }
        self.content_formats.insert(media_type, code);
        true
    }

    /// Returns the numeric content format code of a content type.
    #[must_use]
    pub fn content_format(&self, content_type: &str) -> Option<u16> {
        self.content_formats.get(&media_type(content_type)).copied()
    }

    /// Returns the media type of a numeric content format code.
    #[must_use]
    pub fn media_type_for(&self, code: u16) -> Option<&str> {
        self.content_formats
            .iter()
            .find_map(|(media_type, c)| (*c == code).then_some(media_type.as_str()))
    }

    fn codec_for(&self, content_type: &str) -> Result<&Arc<dyn Codec>> {
        let media_type = media_type(content_type);
        self.codecs.get(&media_type).ok_or_else(|| {
            Error::new(
                ErrorKind::UnsupportedContentType,
                format!("No codec for `{media_type}`"),
            )
        })
    }

    /// Encodes a `JSON` value with the codec of a content type.
    ///
    /// # Errors
    ///
    /// Fails when no codec handles the content type or when encoding fails.
    pub fn value_to_bytes(
        &self,
        value: &Value,
        schema: Option<&DataSchema>,
        content_type: &str,
    ) -> Result<Vec<u8>> {
        self.codec_for(content_type)?.value_to_bytes(value, schema)
    }

    /// Decodes a payload with the codec of a content type.
    ///
    /// # Errors
    ///
    /// Fails when no codec handles the content type or when the payload is
    /// malformed.
    pub fn bytes_to_value(
        &self,
        bytes: &[u8],
        schema: Option<&DataSchema>,
        content_type: &str,
    ) -> Result<Value> {
        self.codec_for(content_type)?.bytes_to_value(bytes, schema)
    }
}
