//! Object identity: the kind a controller watches and the key of a single object

use std::fmt;
use std::hash::{Hash, Hasher};

use kube::api::{Api, DynamicObject};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};

/// Whether objects of a kind live in a namespace or at cluster scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Cluster-scoped (GatewayClass, Namespace)
    Cluster,
    /// Namespace-scoped (Gateway, HTTPRoute, Service, ...)
    Namespaced,
}

/// A watched resource kind.
///
/// Immutable value type: two object types are equal iff their group,
/// version, kind, plural and scope agree.
#[derive(Debug, Clone)]
pub struct ObjectType {
    resource: ApiResource,
    scope: Scope,
}

impl ObjectType {
    fn identity(&self) -> (&str, &str, &str, &str, Scope) {
        (
            &self.resource.group,
            &self.resource.version,
            &self.resource.kind,
            &self.resource.plural,
            self.scope,
        )
    }
}

impl PartialEq for ObjectType {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ObjectType {}

impl Hash for ObjectType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl ObjectType {
    /// A kind with an explicit scope
    pub fn new(resource: ApiResource, scope: Scope) -> Self {
        Self { resource, scope }
    }

    /// A namespace-scoped kind
    pub fn namespaced(resource: ApiResource) -> Self {
        Self {
            resource,
            scope: Scope::Namespaced,
        }
    }

    /// A cluster-scoped kind
    pub fn cluster(resource: ApiResource) -> Self {
        Self {
            resource,
            scope: Scope::Cluster,
        }
    }

    /// Build from an `apiVersion` string and kind
    pub fn from_api_version(api_version: &str, kind: &str, scope: Scope) -> Self {
        Self {
            resource: build_api_resource(api_version, kind),
            scope,
        }
    }

    /// The kube `ApiResource` used for dynamic API access
    pub fn api_resource(&self) -> &ApiResource {
        &self.resource
    }

    /// Kind name (e.g. "HTTPRoute")
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    /// API group ("" for the core group)
    pub fn group(&self) -> &str {
        &self.resource.group
    }

    /// Scope of the kind
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// True if objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        self.scope == Scope::Namespaced
    }

    /// Dynamic API over every object of this kind
    pub fn api_all(&self, client: Client) -> Api<DynamicObject> {
        Api::all_with(client, &self.resource)
    }

    /// Dynamic API for reading a single object identified by `key`
    ///
    /// Cluster-scoped kinds ignore the namespace of the key.
    pub fn api_for(&self, client: Client, key: &NamespacedName) -> Api<DynamicObject> {
        match self.scope {
            Scope::Namespaced => Api::namespaced_with(client, &key.namespace, &self.resource),
            Scope::Cluster => Api::all_with(client, &self.resource),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.resource.group.is_empty() {
            write!(f, "{}", self.resource.kind)
        } else {
            write!(f, "{}.{}", self.resource.kind, self.resource.group)
        }
    }
}

/// Namespace and name of a single object.
///
/// Cluster-scoped objects carry an empty namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    /// Namespace, empty for cluster-scoped objects
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl NamespacedName {
    /// Key for a namespaced object
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Key of a dynamic object
    pub fn from_object(obj: &DynamicObject) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Build an `ApiResource` from an `apiVersion` string and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split `group/version` into its parts; a bare version is the core group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Kinds whose plural doesn't follow the simple suffix rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("gatewayclass", "gatewayclasses"),
    ("ingressclass", "ingressclasses"),
];

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}
