//! Core types for Folio
//!
//! This crate defines the foundational types used throughout the system:
//! - RecordId: Opaque record identifier, plus the hidden/valid id rules
//! - Document: Structurally typed payload of a record
//! - Codec: Pluggable document encoding (JSON, MessagePack)
//! - Error: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod id;

pub use codec::{codec_by_name, Codec, Document, JsonCodec, MsgPackCodec};
pub use error::{Error, Result};
pub use id::{is_hidden, is_valid_id, RecordId, HIDDEN_MARKER};
