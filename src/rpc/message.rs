//! RPC wire messages.

use serde::{Deserialize, Serialize};

/// A call request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, unique per connection.
    pub id: u64,
    /// Method name to dispatch.
    pub method: String,
    /// Opaque, method-defined argument bytes.
    #[serde(default)]
    pub params: Vec<u8>,
}

/// A call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id copied from the request.
    pub id: u64,
    /// Whether the handler succeeded.
    pub ok: bool,
    /// Method-defined result bytes (empty on failure).
    #[serde(default)]
    pub result: Vec<u8>,
    /// Error description when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Request {
    /// Builds a request.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Vec<u8>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Encodes to the wire payload.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes from a wire payload.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

impl Response {
    /// Builds a success response.
    #[must_use]
    pub fn success(id: u64, result: Vec<u8>) -> Self {
        Self {
            id,
            ok: true,
            result,
            error: None,
        }
    }

    /// Builds a failure response.
    #[must_use]
    pub fn failure(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            result: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Encodes to the wire payload.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decodes from a wire payload.
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_round_trip() {
        let request = Request::new(7, "raft.AppendEntries", b"payload".to_vec());
        let decoded = Request::from_bytes(&request.to_bytes().expect("encode")).expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_failure_carries_error() {
        let response = Response::failure(7, "unknown method");
        let decoded = Response::from_bytes(&response.to_bytes().expect("encode")).expect("decode");
        assert!(!decoded.ok);
        assert_eq!(decoded.error.as_deref(), Some("unknown method"));
        assert!(decoded.result.is_empty());
    }

    #[test]
    fn success_response_omits_error_field() {
        let encoded = Response::success(1, b"ok".to_vec()).to_bytes().expect("encode");
        let text = String::from_utf8(encoded).expect("utf8");
        assert!(!text.contains("error"));
    }
}
