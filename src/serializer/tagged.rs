use bytes::Bytes;
use serde_json::{json, Value};

use super::Serializer;
use crate::{Error, Result};

const VERSION: u64 = 1;

/// Wraps another codec's document in a self-describing header.
///
/// ```text
/// {"codec": "<inner name>", "version": 1, "payload": <document>}
/// ```
///
/// Decoding checks the codec name and version, so a peer using a different
/// format fails loudly instead of producing a wrong document.
#[derive(Debug, Clone, Default)]
pub struct TaggedSerializer<S> {
    inner: S,
}

impl<S: Serializer> TaggedSerializer<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Serializer> Serializer for TaggedSerializer<S> {
    fn name(&self) -> &'static str {
        "tagged"
    }

    fn serialize(&self, value: &Value) -> Result<Bytes> {
        // ---
        let framed = json!({
            "codec": self.inner.name(),
            "version": VERSION,
            "payload": value,
        });
        self.inner.serialize(&framed)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        // ---
        let mut framed = self.inner.deserialize(bytes)?;

        let codec = framed.get("codec").and_then(Value::as_str);
        if codec != Some(self.inner.name()) {
            return Err(Error::Codec(format!(
                "expected codec {}, found {codec:?}",
                self.inner.name()
            )));
        }

        match framed.get("version").and_then(Value::as_u64) {
            Some(VERSION) => {}
            other => return Err(Error::Codec(format!("unsupported version {other:?}"))),
        }

        framed
            .get_mut("payload")
            .map(Value::take)
            .ok_or_else(|| Error::Codec("tagged document has no payload".into()))
    }
}
