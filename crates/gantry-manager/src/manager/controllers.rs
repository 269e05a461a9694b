//! Registration of one controller with the manager
//!
//! [`register_controller`] applies the caller's options to a
//! [`ControllerConfig`], prepares every configured field index, builds the
//! reconciler through the configured factory, and hands the resulting
//! controller to the manager. Index preparation is fail-fast; indices that
//! were prepared before a failure stay registered.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use gantry_common::{Error, ObjectType, Result};

use crate::client::Getter;
use crate::events::EventSender;
use crate::manager::controller::ControllerBuilder;
use crate::manager::filter::{accept_all, NamespacedNameFilter};
use crate::manager::index::{FieldIndices, IndexerFunc};
use crate::manager::predicate::ChangePredicate;
use crate::manager::{FieldIndexer, Manager};
use crate::reconciler::{default_reconciler_factory, NewReconcilerFunc, ReconcilerConfig};

/// Everything one registration is built from. Lives only for the duration
/// of a [`register_controller`] call.
pub struct ControllerConfig {
    /// Read access to cluster state, taken from the manager
    pub getter: Arc<dyn Getter>,
    /// Kind the controller watches
    pub object_type: ObjectType,
    /// Shared channel reconcilers publish on
    pub event_tx: EventSender,
    /// Identity filter handed to the reconciler; accept-all when unset
    pub namespaced_name_filter: Option<Arc<dyn NamespacedNameFilter>>,
    /// Change predicates, AND-combined
    pub k8s_predicates: Vec<Arc<dyn ChangePredicate>>,
    /// Field indices to prepare on the manager's cache
    pub field_indices: FieldIndices,
    /// Reconciler factory
    pub new_reconciler: NewReconcilerFunc,
}

impl ControllerConfig {
    fn new(object_type: ObjectType, getter: Arc<dyn Getter>, event_tx: EventSender) -> Self {
        Self {
            getter,
            object_type,
            event_tx,
            namespaced_name_filter: None,
            k8s_predicates: Vec::new(),
            field_indices: FieldIndices::new(),
            new_reconciler: default_reconciler_factory(),
        }
    }
}

/// Mutator applied to a [`ControllerConfig`]; options apply left to right
pub type ControllerOption = Box<dyn FnOnce(&mut ControllerConfig) + Send>;

/// Scope reconciliation to objects the filter accepts
pub fn with_namespaced_name_filter(filter: Arc<dyn NamespacedNameFilter>) -> ControllerOption {
    Box::new(move |cfg| cfg.namespaced_name_filter = Some(filter))
}

/// Add a change predicate; all predicates must accept an event
pub fn with_k8s_predicate(predicate: Arc<dyn ChangePredicate>) -> ControllerOption {
    Box::new(move |cfg| cfg.k8s_predicates.push(predicate))
}

/// Prepare these field indices before the controller starts
pub fn with_field_indices(indices: FieldIndices) -> ControllerOption {
    Box::new(move |cfg| cfg.field_indices.extend(indices))
}

/// Build the reconciler with this factory instead of the default
pub fn with_new_reconciler(factory: NewReconcilerFunc) -> ControllerOption {
    Box::new(move |cfg| cfg.new_reconciler = factory)
}

/// Register a controller for `object_type` with `mgr`.
///
/// Errors from index preparation and from [`Manager::add`] are returned as
/// they are. Nothing is rolled back on failure. Calling this twice for the
/// same kind registers twice.
pub async fn register_controller(
    cancel: &CancellationToken,
    object_type: ObjectType,
    mgr: &dyn Manager,
    event_tx: EventSender,
    options: impl IntoIterator<Item = ControllerOption>,
) -> Result<()> {
    let mut cfg = ControllerConfig::new(object_type, mgr.client(), event_tx);
    for option in options {
        option(&mut cfg);
    }

    if !cfg.field_indices.is_empty() {
        let indexer = mgr.field_indexer();
        for (field, extract) in &cfg.field_indices {
            prepare_index(cancel, indexer.as_ref(), &cfg.object_type, field, extract.clone())
                .await?;
        }
    }

    let reconciler = (cfg.new_reconciler)(ReconcilerConfig {
        getter: cfg.getter.clone(),
        object_type: cfg.object_type.clone(),
        event_tx: cfg.event_tx,
        namespaced_name_filter: cfg.namespaced_name_filter.unwrap_or_else(accept_all),
    });

    let controller = ControllerBuilder::new(mgr, cfg.object_type.clone())
        .with_event_filters(cfg.k8s_predicates)
        .build(reconciler);

    mgr.add(Box::new(controller))?;

    debug!(kind = %cfg.object_type, "Controller registered");
    Ok(())
}

async fn prepare_index(
    cancel: &CancellationToken,
    indexer: &dyn FieldIndexer,
    object_type: &ObjectType,
    field: &str,
    extract: IndexerFunc,
) -> Result<()> {
    let cancelled = || Error::cancelled(format!("preparing index {field} for {object_type}"));

    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        result = indexer.index_field(cancel, object_type, field, extract) => result,
    }
}
