//! Kind registry shared by the manager and every controller
//!
//! Resolves the API version of each kind the controller watches through API
//! discovery once at startup, falling back to hardcoded versions when
//! discovery is unavailable (no cluster access, tests).

use dashmap::DashMap;
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use tracing::{info, warn};

use crate::object::{ObjectType, Scope};
use crate::{Error, Result};

/// Gateway API group
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Kinds watched by the gateway controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayKind {
    /// GatewayClass (gateway.networking.k8s.io)
    GatewayClass,
    /// Gateway (gateway.networking.k8s.io)
    Gateway,
    /// HTTPRoute (gateway.networking.k8s.io)
    HttpRoute,
    /// ReferenceGrant (gateway.networking.k8s.io)
    ReferenceGrant,
    /// Service (core)
    Service,
    /// EndpointSlice (discovery.k8s.io)
    EndpointSlice,
    /// Secret (core)
    Secret,
    /// Namespace (core)
    Namespace,
}

/// All GatewayKind variants for iteration.
pub const ALL_GATEWAY_KINDS: &[GatewayKind] = &[
    GatewayKind::GatewayClass,
    GatewayKind::Gateway,
    GatewayKind::HttpRoute,
    GatewayKind::ReferenceGrant,
    GatewayKind::Service,
    GatewayKind::EndpointSlice,
    GatewayKind::Secret,
    GatewayKind::Namespace,
];

impl GatewayKind {
    /// API group for discovery lookup ("" for core).
    pub fn group(&self) -> &'static str {
        match self {
            Self::GatewayClass | Self::Gateway | Self::HttpRoute | Self::ReferenceGrant => {
                GATEWAY_API_GROUP
            }
            Self::EndpointSlice => "discovery.k8s.io",
            Self::Service | Self::Secret | Self::Namespace => "",
        }
    }

    /// Kubernetes Kind string for discovery lookup.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::GatewayClass => "GatewayClass",
            Self::Gateway => "Gateway",
            Self::HttpRoute => "HTTPRoute",
            Self::ReferenceGrant => "ReferenceGrant",
            Self::Service => "Service",
            Self::EndpointSlice => "EndpointSlice",
            Self::Secret => "Secret",
            Self::Namespace => "Namespace",
        }
    }

    /// Whether objects of this kind are namespaced.
    pub fn scope(&self) -> Scope {
        match self {
            Self::GatewayClass | Self::Namespace => Scope::Cluster,
            _ => Scope::Namespaced,
        }
    }

    /// Hardcoded API version used when discovery fails entirely.
    fn hardcoded_api_version(&self) -> &'static str {
        match self {
            Self::GatewayClass | Self::Gateway | Self::HttpRoute => "gateway.networking.k8s.io/v1",
            Self::ReferenceGrant => "gateway.networking.k8s.io/v1beta1",
            Self::EndpointSlice => "discovery.k8s.io/v1",
            Self::Service | Self::Secret | Self::Namespace => "v1",
        }
    }

    fn hardcoded_object_type(&self) -> ObjectType {
        ObjectType::from_api_version(self.hardcoded_api_version(), self.kind_str(), self.scope())
    }
}

/// Registry mapping each watched kind to the `ObjectType` controllers use.
///
/// Created once at startup and shared across all controllers via `Arc<Scheme>`.
pub struct Scheme {
    entries: DashMap<GatewayKind, ObjectType>,
}

impl Scheme {
    /// Run API discovery once and populate all known kinds.
    ///
    /// Kinds missing from discovery (e.g. Gateway API CRDs not yet installed)
    /// fall back to their hardcoded version so the watch can start and
    /// retry with backoff once the CRD appears.
    pub async fn discover(client: Client) -> Self {
        let scheme = Self::with_defaults();

        match Discovery::new(client).run().await {
            Ok(discovery) => {
                let mut discovered = 0usize;
                for kind in ALL_GATEWAY_KINDS {
                    if let Some(ar) = find_discovered_resource(&discovery, kind.group(), kind.kind_str()) {
                        scheme.register(*kind, ObjectType::new(ar, kind.scope()));
                        discovered += 1;
                    }
                }
                info!(
                    discovered,
                    total = ALL_GATEWAY_KINDS.len(),
                    "Scheme populated via API discovery"
                );
            }
            Err(e) => {
                warn!(error = %e, "API discovery failed, falling back to hardcoded kind versions");
            }
        }

        scheme
    }

    /// Populate the scheme with hardcoded API versions for all kinds.
    ///
    /// Used as a fallback when API discovery fails entirely, and in tests.
    pub fn with_defaults() -> Self {
        let entries = DashMap::new();
        for kind in ALL_GATEWAY_KINDS {
            entries.insert(*kind, kind.hardcoded_object_type());
        }
        Self { entries }
    }

    /// Register (or override) the object type for a kind.
    pub fn register(&self, kind: GatewayKind, object_type: ObjectType) {
        self.entries.insert(kind, object_type);
    }

    /// Object type registered for a kind.
    pub fn object_type(&self, kind: GatewayKind) -> Result<ObjectType> {
        self.entries
            .get(&kind)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::UnknownKind {
                kind: kind.kind_str().to_string(),
            })
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no kind is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Look up a resource in pre-computed API discovery results.
///
/// Returns `None` if the kind is not served (not an error).
fn find_discovered_resource(discovery: &Discovery, group: &str, kind: &str) -> Option<ApiResource> {
    for api_group in discovery.groups() {
        if api_group.name() != group {
            continue;
        }
        for (ar, _caps) in api_group.resources_by_stability() {
            if ar.kind == kind {
                info!(
                    group = %group,
                    kind = %kind,
                    api_version = %ar.api_version,
                    "discovered kind version"
                );
                return Some(ar);
            }
        }
    }
    warn!(group = %group, kind = %kind, "kind not found in API discovery");
    None
}
