//! Entity envelope codecs.
//!
//! The store depends only on [`EntityCodec`]; which wire format sits behind
//! it is the caller's choice. [`MsgPackCodec`] is the default.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::entity::Envelope;
use crate::error::{TableError, TableResult};

/// Encode/decode capability used by the table store.
pub trait EntityCodec: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    fn encode<T: Serialize>(&self, value: &T) -> TableResult<Envelope>;

    /// Decode an envelope as `T`. Any mismatch between `T` and the stored
    /// payload surfaces as [`TableError::DeserializationFailed`].
    fn decode<T: DeserializeOwned>(&self, envelope: &Envelope) -> TableResult<T>;
}

/// Self-describing binary codec (MessagePack with named fields).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl EntityCodec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode<T: Serialize>(&self, value: &T) -> TableResult<Envelope> {
        let payload =
            rmp_serde::to_vec_named(value).map_err(|e| TableError::Serialization(e.to_string()))?;
        Ok(Envelope::of::<T>(payload))
    }

    fn decode<T: DeserializeOwned>(&self, envelope: &Envelope) -> TableResult<T> {
        rmp_serde::from_slice(&envelope.payload).map_err(|e| decode_error(envelope, e))
    }
}

/// JSON codec, handy when stored rows need to be human-readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EntityCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> TableResult<Envelope> {
        let payload =
            serde_json::to_vec(value).map_err(|e| TableError::Serialization(e.to_string()))?;
        Ok(Envelope::of::<T>(payload))
    }

    fn decode<T: DeserializeOwned>(&self, envelope: &Envelope) -> TableResult<T> {
        serde_json::from_slice(&envelope.payload).map_err(|e| decode_error(envelope, e))
    }
}

fn decode_error(envelope: &Envelope, e: impl std::fmt::Display) -> TableError {
    TableError::DeserializationFailed {
        type_tag: envelope.type_tag.clone(),
        reason: e.to_string(),
    }
}
