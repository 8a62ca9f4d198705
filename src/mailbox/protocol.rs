//! Mailbox message types
//!
//! Defines the JSON format of request and response files.
//!
//! ```json
//! // command_<id>.json
//! {"id": "7f3c...", "command": "create_sketch", "params": {"plane": "XY"}}
//!
//! // response_<id>.json
//! {"id": "7f3c...", "success": true, "result": {"sketch": "Sketch1"}}
//! {"id": "7f3c...", "success": false, "error": "Unknown command: nope"}
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::BridgeError;

/// Ordered parameter bag passed to handlers
pub type Params = serde_json::Map<String, Value>;

/// Identifier correlating a request file with its response file.
///
/// Ids end up inside file names, so only ASCII alphanumerics, `-` and `_`
/// are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    /// Fresh collision-resistant id (UUID v4, simple form)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Validate an id taken from a file name or request body
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && !raw.starts_with('.')
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Older clients write numeric (timestamp) ids
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Unsigned(u64),
    Signed(i64),
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = match RawId::deserialize(deserializer)? {
            RawId::Text(s) => s,
            RawId::Unsigned(n) => n.to_string(),
            RawId::Signed(n) => n.to_string(),
        };
        RequestId::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid request id {:?}", raw)))
    }
}

/// Contents of a request file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Optional in the body; the file name carries the authoritative id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub command: String,
    #[serde(default)]
    pub params: Params,
}

impl Request {
    pub fn new(id: RequestId, command: impl Into<String>, params: Params) -> Self {
        Self {
            id: Some(id),
            command: command.into(),
            params,
        }
    }
}

/// Contents of a response file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
            traceback: None,
        }
    }

    pub fn failure(id: RequestId, error: impl Into<String>, traceback: Option<String>) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error.into()),
            traceback,
        }
    }

    /// Error response for a failure raised at the dispatch boundary
    pub fn from_error(id: RequestId, err: &BridgeError) -> Self {
        Self::failure(id, err.to_string(), err.traceback())
    }

    /// Turn the response into the caller-facing result
    pub fn into_result(self) -> Result<Value, BridgeError> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::Remote {
                id: self.id.0,
                message: self
                    .error
                    .unwrap_or_else(|| "request failed without an error message".to_string()),
                traceback: self.traceback,
            })
        }
    }
}
