//! Reply envelope returned by services.
//!
//! ```json
//! {"calls": [{"count": 1, "data": {"task": "demo"}}]}
//! {"error": "task not found"}
//! ```

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{Error, Result};

/// One call result inside a reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallResult {
    /// Number of results the call produced; 0 means "no result".
    pub count: u64,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A decoded service reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyEnvelope {
    /// Present whenever the reply carries an `error` key, even `null`.
    #[serde(default, deserialize_with = "present")]
    pub error: Option<Value>,
    #[serde(default)]
    pub calls: Option<Vec<CallResult>>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ReplyEnvelope {
    /// Parse a reply document.
    pub fn parse(document: Value) -> Result<Self> {
        // ---
        if !document.is_object() {
            return Err(Error::MalformedResponse(format!("Malformed object: {document}")));
        }
        serde_json::from_value(document.clone())
            .map_err(|e| Error::MalformedResponse(format!("Malformed object: {document} ({e})")))
    }

    /// The result of the first call.
    ///
    /// - an `error` field becomes [`Error::Remote`];
    /// - a missing or empty `calls` array is [`Error::MalformedResponse`];
    /// - a first call with count 0 yields `None`, otherwise its `data`.
    pub fn into_result(self) -> Result<Option<Value>> {
        // ---
        if let Some(error) = self.error {
            let message = match error {
                Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(Error::Remote(message));
        }

        let first = self
            .calls
            .and_then(|calls| calls.into_iter().next())
            .ok_or_else(|| Error::MalformedResponse("reply has no calls".into()))?;

        if first.count == 0 {
            return Ok(None);
        }
        Ok(first.data)
    }
}
