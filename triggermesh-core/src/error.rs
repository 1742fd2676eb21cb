//! Core error abstractions.

use thiserror::Error;

/// Errors produced by the core data model.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The broker configuration document could not be serialized.
    #[error("error serializing broker configuration: {0}")]
    ConfigSerialize(#[source] serde_yaml::Error),
    /// The broker configuration document could not be parsed.
    #[error("error parsing broker configuration: {0}")]
    ConfigParse(#[source] serde_yaml::Error),
    /// A filter could not be encoded.
    #[error("error encoding filter: {0}")]
    FilterEncode(#[from] serde_json::Error),
}
