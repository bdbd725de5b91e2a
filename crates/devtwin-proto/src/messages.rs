//! JSON payload encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a document as a UTF-8 JSON payload.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, MessageError> {
    serde_json::to_vec(message).map_err(|e| MessageError::Serialize(e.to_string()))
}

/// Decode a document from a JSON payload.
///
/// # Errors
///
/// Returns error if deserialization fails.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MessageError> {
    serde_json::from_slice(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}
