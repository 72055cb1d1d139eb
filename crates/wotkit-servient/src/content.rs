use std::pin::Pin;

use bytes::{Bytes, BytesMut};

use futures_util::TryStreamExt;

use serde_json::Value;

use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use wotkit::codec::ContentSerdes;
use wotkit::schema::DataSchema;

use crate::error::Result;

enum Body {
    Bytes(Bytes),
    Reader(Pin<Box<dyn AsyncRead + Send>>),
}

/// An encoded value paired with its content type.
///
/// The body can be consumed only once.
pub struct Content {
    // Content type.
    content_type: String,
    // Encoded body.
    body: Body,
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &self.body {
            Body::Bytes(bytes) => format!("{} bytes", bytes.len()),
            Body::Reader(_) => "reader".into(),
        };
        f.debug_struct("Content")
            .field("content_type", &self.content_type)
            .field("body", &body)
            .finish()
    }
}

impl Content {
    /// Creates a [`Content`] from buffered bytes.
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: Body::Bytes(body.into()),
        }
    }

    /// Creates a [`Content`] without a body.
    pub fn empty(content_type: impl Into<String>) -> Self {
        Self::new(content_type, Bytes::new())
    }

    /// Creates a [`Content`] whose body is read from an asynchronous byte
    /// reader.
    pub fn from_reader<R>(content_type: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            content_type: content_type.into(),
            body: Body::Reader(Box::pin(reader)),
        }
    }

    /// Returns the content type.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Consumes the [`Content`] returning its whole body.
    ///
    /// # Errors
    ///
    /// Fails when reading the body fails.
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self.body {
            Body::Bytes(bytes) => Ok(bytes),
            Body::Reader(reader) => {
                let bytes = ReaderStream::new(reader)
                    .try_fold(BytesMut::new(), |mut body, chunk| async move {
                        body.extend_from_slice(&chunk);
                        Ok(body)
                    })
                    .await?;
                Ok(bytes.freeze())
            }
        }
    }

    /// Consumes the [`Content`] decoding its body.
    ///
    /// # Errors
    ///
    /// Fails when the body cannot be read or decoded.
    pub async fn into_value(
        self,
        serdes: &ContentSerdes,
        schema: Option<&DataSchema>,
    ) -> Result<Value> {
        let content_type = self.content_type.clone();
        let bytes = self.into_bytes().await?;
        serdes
            .bytes_to_value(&bytes, schema, &content_type)
            .map_err(Into::into)
    }
}

/// Encodes a value into a [`Content`] of the given content type.
///
/// # Errors
///
/// Fails when no codec handles the content type or when encoding fails.
pub fn value_to_content(
    serdes: &ContentSerdes,
    value: &Value,
    schema: Option<&DataSchema>,
    content_type: &str,
) -> Result<Content> {
    let bytes = serdes.value_to_bytes(value, schema, content_type)?;
    Ok(Content::new(content_type, bytes))
}
