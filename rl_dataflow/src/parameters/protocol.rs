//! Pull protocol between parameter clients and the relay.
//!
//! | request             | reply                               |
//! |---------------------|-------------------------------------|
//! | `info`              | metadata or none                    |
//! | `parameter:<hash>`  | blob if hash changed, current hash  |
//! | `both:<hash>`       | blob if hash changed, metadata      |
//!
//! Requests travel as their text form. An empty `<hash>` means the client
//! has nothing yet.

use crate::codec;
use crate::error::{DataflowError, Result};
use crate::parameters::snapshot::ParameterMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PARAMETER_PREFIX: &str = "parameter:";
const BOTH_PREFIX: &str = "both:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterRequest {
    /// Metadata only.
    Info,
    /// Blob if changed, plus the current hash.
    Parameter { last_hash: String },
    /// Blob if changed, plus full metadata.
    Both { last_hash: String },
}

impl ParameterRequest {
    pub fn parameter(last_hash: impl Into<String>) -> Self {
        ParameterRequest::Parameter {
            last_hash: last_hash.into(),
        }
    }

    pub fn both(last_hash: impl Into<String>) -> Self {
        ParameterRequest::Both {
            last_hash: last_hash.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::serialize(&self.to_string())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text: String = codec::deserialize(bytes)
            .map_err(|e| DataflowError::Protocol(format!("undecodable request: {e}")))?;
        text.parse()
    }
}

impl fmt::Display for ParameterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterRequest::Info => write!(f, "info"),
            ParameterRequest::Parameter { last_hash } => write!(f, "{PARAMETER_PREFIX}{last_hash}"),
            ParameterRequest::Both { last_hash } => write!(f, "{BOTH_PREFIX}{last_hash}"),
        }
    }
}

impl FromStr for ParameterRequest {
    type Err = DataflowError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "info" {
            Ok(ParameterRequest::Info)
        } else if let Some(hash) = s.strip_prefix(PARAMETER_PREFIX) {
            Ok(ParameterRequest::parameter(hash))
        } else if let Some(hash) = s.strip_prefix(BOTH_PREFIX) {
            Ok(ParameterRequest::both(hash))
        } else {
            Err(DataflowError::Protocol(format!("invalid request: {s:?}")))
        }
    }
}

/// Reply to a [`ParameterRequest`]; one variant per request shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterResponse {
    Info(Option<ParameterMetadata>),
    /// `current_hash` is empty when the relay has no snapshot.
    Parameter {
        blob: Option<Vec<u8>>,
        current_hash: String,
    },
    Both {
        blob: Option<Vec<u8>>,
        metadata: Option<ParameterMetadata>,
    },
}

impl ParameterResponse {
    pub fn encode(&self) -> Result<Vec<u8>> {
        codec::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        codec::deserialize(bytes)
    }

    pub fn has_blob(&self) -> bool {
        match self {
            ParameterResponse::Info(_) => false,
            ParameterResponse::Parameter { blob, .. } | ParameterResponse::Both { blob, .. } => {
                blob.is_some()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_text_form() {
        assert_eq!(ParameterRequest::Info.to_string(), "info");
        assert_eq!(ParameterRequest::parameter("abc").to_string(), "parameter:abc");
        assert_eq!(ParameterRequest::both("").to_string(), "both:");
    }

    #[test]
    fn test_request_parse() {
        assert_eq!("info".parse::<ParameterRequest>().unwrap(), ParameterRequest::Info);
        assert_eq!(
            "parameter:".parse::<ParameterRequest>().unwrap(),
            ParameterRequest::parameter("")
        );
        // Only the first ':' separates the hash.
        assert_eq!(
            "both:a:b".parse::<ParameterRequest>().unwrap(),
            ParameterRequest::both("a:b")
        );
    }

    #[test]
    fn test_request_parse_rejects_unknown_shapes() {
        for bad in ["", "INFO", "infos", "parameter", "both", "params:x", "fetch:abc"] {
            assert!(
                matches!(bad.parse::<ParameterRequest>(), Err(DataflowError::Protocol(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_request_wire_form() {
        let request = ParameterRequest::both("h1");
        let decoded = ParameterRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert!(matches!(
            ParameterRequest::decode(&[1, 2, 3]),
            Err(DataflowError::Protocol(_))
        ));
    }

    #[test]
    fn test_response_has_blob() {
        assert!(!ParameterResponse::Info(None).has_blob());
        assert!(ParameterResponse::Parameter {
            blob: Some(vec![1]),
            current_hash: "h".into()
        }
        .has_blob());
        assert!(!ParameterResponse::Both {
            blob: None,
            metadata: None
        }
        .has_blob());
    }
}
