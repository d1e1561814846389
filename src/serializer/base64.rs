use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;

use super::Serializer;
use crate::{Error, Result};

/// JSON encoded as standard base64 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Serializer;

impl Serializer for Base64Serializer {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        let json = serde_json::to_vec(value)?;
        Ok(STANDARD.encode(json).into_bytes().into())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        // ---
        let json = STANDARD
            .decode(bytes.trim_ascii())
            .map_err(|e| Error::Codec(format!("base64: {e}")))?;
        Ok(serde_json::from_slice(&json)?)
    }
}
