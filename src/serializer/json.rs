use bytes::Bytes;
use serde_json::Value;

use super::Serializer;
use crate::Result;

/// Plain JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        Ok(serde_json::to_vec(value)?.into())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_compact_output() {
        // ---
        let bytes = JsonSerializer
            .serialize(&serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(&bytes[..], br#"{"a":1}"#);
    }
}
