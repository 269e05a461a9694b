//! Field index functions controllers ask the manager's cache to maintain

use std::collections::HashMap;
use std::sync::Arc;

use kube::api::DynamicObject;

use gantry_common::SERVICE_NAME_LABEL;

/// Extracts the index keys of one object. Pure and deterministic; returning
/// no keys makes the object unreachable through that index.
pub type IndexerFunc = Arc<dyn Fn(&DynamicObject) -> Vec<String> + Send + Sync>;

/// Index functions keyed by field name
pub type FieldIndices = HashMap<String, IndexerFunc>;

/// Index field mapping an EndpointSlice to the Service it belongs to
pub const KUBERNETES_SERVICE_NAME_INDEX_FIELD: &str = "spec.serviceName";

/// Indices for looking up EndpointSlices by their Service
pub fn create_endpoint_slice_field_indices() -> FieldIndices {
    let mut indices = FieldIndices::new();
    indices.insert(
        KUBERNETES_SERVICE_NAME_INDEX_FIELD.to_string(),
        Arc::new(service_name_index_func) as IndexerFunc,
    );
    indices
}

/// Name of the Service an EndpointSlice belongs to, from its service-name label
pub fn service_name_index_func(obj: &DynamicObject) -> Vec<String> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SERVICE_NAME_LABEL))
        .filter(|name| !name.is_empty())
        .map(|name| vec![name.clone()])
        .unwrap_or_default()
}
