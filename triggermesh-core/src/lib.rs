pub mod config;
pub mod crd;
pub mod error;
pub mod status;

pub use error::CoreError;

/// The API group of all TriggerMesh eventing kinds.
pub const GROUP: &str = "eventing.triggermesh.io";
/// The API version of all TriggerMesh eventing kinds.
pub const VERSION: &str = "v1alpha1";
/// The combined `group/version` string.
pub const API_VERSION: &str = "eventing.triggermesh.io/v1alpha1";
