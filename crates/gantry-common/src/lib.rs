//! Common types for gantry: errors, object identity, kind registry, telemetry

#![deny(missing_docs)]

pub mod error;
pub mod object;
pub mod scheme;
pub mod telemetry;

pub use error::Error;
pub use object::{NamespacedName, ObjectType, Scope};
pub use scheme::{GatewayKind, Scheme};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label EndpointSlices carry to name the Service they belong to
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
