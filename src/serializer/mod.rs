//! Payload serialization at the messaging boundary.
//!
//! Channels move opaque bytes. A [`Serializer`] turns the JSON documents the
//! protocol layer works with into those bytes and back. Three codecs ship
//! with the crate:
//!
//! - [`JsonSerializer`] - plain UTF-8 JSON (the wire format services expect)
//! - [`TaggedSerializer`] - JSON wrapped in a `{codec, version, payload}`
//!   header, rejecting documents produced by something else
//! - [`Base64Serializer`] - base64 text of the JSON, for links that mangle
//!   raw JSON
//!
//! Every codec must round-trip any `Value`, including the wire names of
//! [`Notification`](crate::Notification).

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::Result;

mod base64;
mod json;
mod tagged;

pub use self::base64::Base64Serializer;
pub use self::json::JsonSerializer;
pub use self::tagged::TaggedSerializer;

/// Codec trait for message payloads.
pub trait Serializer: Send + Sync {
    /// Short codec name, used in logs and tagged headers.
    fn name(&self) -> &'static str;

    /// Encode a document into bytes.
    fn serialize(&self, value: &Value) -> Result<Bytes>;

    /// Decode bytes into a document.
    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;

    /// Encode any serializable value.
    fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Bytes>
    where
        Self: Sized,
    {
        self.serialize(&serde_json::to_value(value)?)
    }

    /// Decode into any deserializable value.
    fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>
    where
        Self: Sized,
    {
        Ok(serde_json::from_value(self.deserialize(bytes)?)?)
    }
}
