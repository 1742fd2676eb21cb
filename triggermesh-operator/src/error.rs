//! Operator error abstractions.

use thiserror::Error;

/// Errors returned by typed clients and listers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The requested object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: String, namespace: String, name: String },
    /// The local cache has not yet received its initial listing.
    #[error("cache of {0} objects has not synced yet")]
    NotSynced(String),
    /// The API call did not complete in time.
    #[error("timeout while calling the K8s API to {0}")]
    Timeout(String),
    /// An error returned by the K8s API.
    #[error("{0}")]
    Kube(#[from] kube::Error),
}

impl ClientError {
    /// Check if this error means that the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube(kube::Error::Api(api_err)) => api_err.code == http::StatusCode::NOT_FOUND,
            _ => false,
        }
    }
}

/// A result type where the error is a `ClientError`.
pub type ClientResult<T> = ::std::result::Result<T, ClientError>;

/// An error aborting a reconciliation.
///
/// Permanent errors are not retried: the object is only reconciled again on its next change.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{reason}: {message}")]
pub struct ReconcileError {
    /// A machine readable reason code, also used for conditions & events.
    pub reason: String,
    /// A human readable description of the error.
    pub message: String,
    /// Do not retry reconciling the object.
    pub permanent: bool,
}

impl ReconcileError {
    /// Create an error which will be retried with backoff.
    pub fn transient(reason: &str, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
            permanent: false,
        }
    }

    /// Create an error which will not be retried.
    pub fn permanent(reason: &str, message: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            message: message.into(),
            permanent: true,
        }
    }
}

/// A result type where the error is a `ReconcileError`.
pub type ReconcileResult<T> = ::std::result::Result<T, ReconcileError>;

/// Errors returned when resolving a destination to a URI.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Neither a reference nor a URI is given.
    #[error("destination has neither a ref nor a URI")]
    EmptyDestination,
    /// The URI of the destination is not absolute, or could not be joined with the reference.
    #[error("invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },
    /// The referenced kind can not be resolved to an address.
    #[error("kind {kind} of group {group:?} is not a supported addressable")]
    UnsupportedKind { kind: String, group: String },
    /// The referenced object does not have an address yet.
    #[error("{kind} {namespace}/{name} does not have an address")]
    NotAddressable { kind: String, namespace: String, name: String },
    /// The referenced object could not be read.
    #[error("{0}")]
    Client(#[from] ClientError),
}
