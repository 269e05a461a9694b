//! Bootstrap: register one controller per watched Gateway API kind

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use gantry_common::{Error, GatewayKind, Result};

use crate::config::Settings;
use crate::events::EventSender;
use crate::manager::filter::create_filter_for_gateway_class;
use crate::manager::index::create_endpoint_slice_field_indices;
use crate::manager::predicate::{GenerationChangedPredicate, ServicePortsChangedPredicate};
use crate::manager::{
    register_controller, with_field_indices, with_k8s_predicate, with_namespaced_name_filter,
    ControllerOption, Manager,
};

/// Kinds registered by [`register_gateway_controllers`], in order
pub const REGISTERED_KINDS: [GatewayKind; 7] = [
    GatewayKind::GatewayClass,
    GatewayKind::Gateway,
    GatewayKind::HttpRoute,
    GatewayKind::ReferenceGrant,
    GatewayKind::Service,
    GatewayKind::Secret,
    GatewayKind::EndpointSlice,
];

fn options_for(kind: GatewayKind, settings: &Settings) -> Vec<ControllerOption> {
    match kind {
        GatewayKind::GatewayClass => vec![with_namespaced_name_filter(
            create_filter_for_gateway_class(settings.gateway_class_name.clone()),
        )],
        GatewayKind::Service => vec![with_k8s_predicate(Arc::new(ServicePortsChangedPredicate))],
        GatewayKind::EndpointSlice => vec![
            with_k8s_predicate(Arc::new(GenerationChangedPredicate)),
            with_field_indices(create_endpoint_slice_field_indices()),
        ],
        _ => Vec::new(),
    }
}

/// Register every Gateway API controller with `mgr`.
///
/// Stops at the first failure, which is wrapped with the kind it was for.
/// Controllers registered before the failure stay registered.
pub async fn register_gateway_controllers(
    cancel: &CancellationToken,
    mgr: &dyn Manager,
    event_tx: EventSender,
    settings: &Settings,
) -> Result<()> {
    let scheme = mgr.scheme();

    for kind in REGISTERED_KINDS {
        let wrap = |e| Error::registration(kind.kind_str(), e);
        let object_type = scheme.object_type(kind).map_err(wrap)?;

        register_controller(
            cancel,
            object_type,
            mgr,
            event_tx.clone(),
            options_for(kind, settings),
        )
        .await
        .map_err(wrap)?;

        info!(kind = kind.kind_str(), "Registered controller");
    }

    Ok(())
}
