//! Document codecs
//!
//! The store only needs an `encode`/`decode` pair with stable semantics:
//! encoding the same document twice must produce the same bytes, otherwise
//! the store's unchanged-write detection stops working.

use crate::error::{Error, Result};

/// Payload of a record: nested maps, sequences and scalars
pub type Document = serde_json::Value;

/// Converts documents to and from their on-disk bytes
pub trait Codec: Send + Sync {
    /// Short name used in configuration (`"json"`, `"msgpack"`)
    fn name(&self) -> &'static str;

    /// Encode a document
    fn encode(&self, document: &Document) -> Result<Vec<u8>>;

    /// Decode stored bytes
    ///
    /// The error carries no id; the store attaches it.
    fn decode(&self, bytes: &[u8]) -> std::result::Result<Document, String>;
}

/// Reference encoding: compact JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, document: &Document) -> Result<Vec<u8>> {
        serde_json::to_vec(document).map_err(|e| Error::SerializationError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<Document, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// MessagePack encoding (smaller files, not human readable)
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, document: &Document) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(document).map_err(|e| Error::SerializationError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<Document, String> {
        rmp_serde::from_slice(bytes).map_err(|e| e.to_string())
    }
}

/// Look up a codec by its configured name
pub fn codec_by_name(name: &str) -> Option<Box<dyn Codec>> {
    match name {
        "json" => Some(Box::new(JsonCodec)),
        "msgpack" => Some(Box::new(MsgPackCodec)),
        _ => None,
    }
}
