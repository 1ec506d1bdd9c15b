//! Typed input and output bindings at flow boundaries.
//!
//! An [`InputSource`] resolves a typed value into the byte stream that
//! enters the first handler; an [`OutputTarget`] consumes the terminal
//! byte stream into a typed destination. Strings, byte buffers, and raw
//! streams bind directly; [`Json`], [`Yaml`], and [`SchemaJson`] bind
//! serde values.

use std::io::Cursor;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FlowError;
use crate::stream::BoxReader;

/// A typed value that can enter a flow as a byte stream.
pub trait InputSource: Send {
    /// Resolve into a readable stream.
    fn into_reader(self) -> Result<BoxReader, FlowError>;
}

impl InputSource for String {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        Ok(Box::new(Cursor::new(self.into_bytes())))
    }
}

impl InputSource for &str {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        Ok(Box::new(Cursor::new(self.as_bytes().to_vec())))
    }
}

impl InputSource for Vec<u8> {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        Ok(Box::new(Cursor::new(self)))
    }
}

impl InputSource for &[u8] {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        Ok(Box::new(Cursor::new(self.to_vec())))
    }
}

impl InputSource for BoxReader {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        Ok(self)
    }
}

/// Bind an arbitrary readable stream as a flow input.
pub struct Reader<R>(
    /// The stream to read from.
    pub R,
);

impl<R: AsyncRead + Send + Unpin + 'static> InputSource for Reader<R> {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        Ok(Box::new(self.0))
    }
}

/// JSON binding: serializes the wrapped value on input, deserializes the
/// terminal bytes on output (wrap a `&mut T` for output).
pub struct Json<T>(
    /// The bound value.
    pub T,
);

impl<T: Serialize + Send> InputSource for Json<T> {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        let bytes =
            serde_json::to_vec(&self.0).map_err(|e| FlowError::Serialization(e.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

/// YAML binding: serializes the wrapped value on input, deserializes the
/// terminal bytes on output (wrap a `&mut T` for output).
pub struct Yaml<T>(
    /// The bound value.
    pub T,
);

impl<T: Serialize + Send> InputSource for Yaml<T> {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        let text =
            serde_yaml::to_string(&self.0).map_err(|e| FlowError::Serialization(e.to_string()))?;
        Ok(Box::new(Cursor::new(text.into_bytes())))
    }
}

/// JSON binding that validates the serialized value against a JSON Schema
/// before it enters the flow.
pub struct SchemaJson<T> {
    /// The value to serialize.
    pub value: T,
    /// JSON Schema the serialized value must satisfy.
    pub schema: serde_json::Value,
}

impl<T: Serialize + Send> InputSource for SchemaJson<T> {
    fn into_reader(self) -> Result<BoxReader, FlowError> {
        let instance =
            serde_json::to_value(&self.value).map_err(|e| FlowError::Serialization(e.to_string()))?;
        let validator = jsonschema::validator_for(&self.schema)
            .map_err(|e| FlowError::Config(format!("invalid schema: {e}")))?;
        validator
            .validate(&instance)
            .map_err(|e| FlowError::Serialization(format!("schema validation failed: {e}")))?;
        let bytes =
            serde_json::to_vec(&instance).map_err(|e| FlowError::Serialization(e.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

/// A typed destination for a flow's terminal byte stream.
#[async_trait]
pub trait OutputTarget: Send {
    /// Consume the terminal stream into this destination.
    async fn consume(&mut self, reader: BoxReader) -> Result<(), FlowError>;
}

#[async_trait]
impl OutputTarget for Vec<u8> {
    async fn consume(&mut self, mut reader: BoxReader) -> Result<(), FlowError> {
        reader.read_to_end(self).await?;
        Ok(())
    }
}

#[async_trait]
impl OutputTarget for String {
    async fn consume(&mut self, mut reader: BoxReader) -> Result<(), FlowError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        let text =
            String::from_utf8(buf).map_err(|e| FlowError::Serialization(e.to_string()))?;
        self.push_str(&text);
        Ok(())
    }
}

/// Stream the terminal bytes into an arbitrary writer, shutting it down at
/// end-of-stream.
pub struct Writer<W>(
    /// The destination writer.
    pub W,
);

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> OutputTarget for Writer<W> {
    async fn consume(&mut self, mut reader: BoxReader) -> Result<(), FlowError> {
        tokio::io::copy(&mut reader, &mut self.0).await?;
        self.0.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<'a, T: DeserializeOwned + Send> OutputTarget for Json<&'a mut T> {
    async fn consume(&mut self, mut reader: BoxReader) -> Result<(), FlowError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        *self.0 =
            serde_json::from_slice(&buf).map_err(|e| FlowError::Serialization(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl<'a, T: DeserializeOwned + Send> OutputTarget for Yaml<&'a mut T> {
    async fn consume(&mut self, mut reader: BoxReader) -> Result<(), FlowError> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        *self.0 =
            serde_yaml::from_slice(&buf).map_err(|e| FlowError::Serialization(e.to_string()))?;
        Ok(())
    }
}
