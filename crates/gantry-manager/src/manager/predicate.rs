//! Change predicates gating which watch events reach a reconciler
//!
//! A controller dispatches an event only when every configured predicate
//! accepts it; with no predicates every event is dispatched.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use tracing::debug;

/// A change to a watched object, as seen by predicates
#[derive(Debug, Clone)]
pub enum ObjectEvent {
    /// First observation of the object
    Create(DynamicObject),
    /// The object changed from `old` to `new`
    Update {
        /// Previously observed state
        old: DynamicObject,
        /// Newly observed state
        new: DynamicObject,
    },
    /// The object is gone; carries its last known state
    Delete(DynamicObject),
    /// Reconcile trigger that isn't tied to a state change
    Generic(DynamicObject),
}

impl ObjectEvent {
    /// The object the event concerns (the new state for updates)
    pub fn object(&self) -> &DynamicObject {
        match self {
            ObjectEvent::Create(obj) | ObjectEvent::Delete(obj) | ObjectEvent::Generic(obj) => obj,
            ObjectEvent::Update { new, .. } => new,
        }
    }
}

/// Pure predicate over watch events. Each hook defaults to accepting.
pub trait ChangePredicate: Send + Sync + fmt::Debug {
    /// Accept a create event
    fn create(&self, _obj: &DynamicObject) -> bool {
        true
    }

    /// Accept an update event
    fn update(&self, _old: &DynamicObject, _new: &DynamicObject) -> bool {
        true
    }

    /// Accept a delete event
    fn delete(&self, _obj: &DynamicObject) -> bool {
        true
    }

    /// Accept a generic event
    fn generic(&self, _obj: &DynamicObject) -> bool {
        true
    }

    /// Dispatch an event to the matching hook
    fn evaluate(&self, event: &ObjectEvent) -> bool {
        match event {
            ObjectEvent::Create(obj) => self.create(obj),
            ObjectEvent::Update { old, new } => self.update(old, new),
            ObjectEvent::Delete(obj) => self.delete(obj),
            ObjectEvent::Generic(obj) => self.generic(obj),
        }
    }
}

/// AND-combination of predicates; an empty list accepts everything
pub fn all_accept(predicates: &[Arc<dyn ChangePredicate>], event: &ObjectEvent) -> bool {
    predicates.iter().all(|p| p.evaluate(event))
}

/// Accepts Service updates only when the set of (port, targetPort) pairs changed.
///
/// Port names and other Service fields are ignored: only the ports decide
/// which upstreams the data plane needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServicePortsChangedPredicate;

/// `targetPort` is kept as [`IntOrString`] so `8080` and `"8080"` stay distinct
type PortKey = (i32, Option<IntOrString>);

fn service_ports(obj: &DynamicObject) -> Option<Vec<PortKey>> {
    let svc: Service = match obj.clone().try_parse() {
        Ok(svc) => svc,
        Err(e) => {
            debug!(error = %e, "Object is not a Service, ignoring update");
            return None;
        }
    };

    let ports = svc
        .spec
        .and_then(|spec| spec.ports)
        .unwrap_or_default()
        .into_iter()
        .map(|port| (port.port, port.target_port))
        .collect();

    Some(ports)
}

impl ChangePredicate for ServicePortsChangedPredicate {
    fn update(&self, old: &DynamicObject, new: &DynamicObject) -> bool {
        let (Some(old_ports), Some(new_ports)) = (service_ports(old), service_ports(new)) else {
            return false;
        };

        if old_ports.len() != new_ports.len() {
            return true;
        }

        new_ports.iter().any(|port| !old_ports.contains(port))
    }
}

/// Accepts updates only when `metadata.generation` changed
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationChangedPredicate;

impl ChangePredicate for GenerationChangedPredicate {
    fn update(&self, old: &DynamicObject, new: &DynamicObject) -> bool {
        old.metadata.generation != new.metadata.generation
    }
}
