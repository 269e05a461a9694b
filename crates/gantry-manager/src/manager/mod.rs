//! Controller registration against a long-running manager
//!
//! The manager owns the watch/dispatch loops. This module defines the seams
//! the registrar talks to ([`Manager`], [`FieldIndexer`], [`Runnable`]), the
//! building blocks a registration is configured with (filters, predicates,
//! field indices), and the registrar itself.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gantry_common::{Error, ObjectType, Scheme};

use crate::client::Getter;

#[cfg(test)]
use mockall::automock;

mod cache;
pub mod controller;
pub mod controllers;
pub mod filter;
pub mod index;
pub mod index_store;
pub mod predicate;
pub mod runtime;

pub use controller::{Controller, ControllerBuilder};
pub use controllers::{
    register_controller, with_field_indices, with_k8s_predicate, with_namespaced_name_filter,
    with_new_reconciler, ControllerConfig, ControllerOption,
};
pub use filter::{FilterDecision, NamespacedNameFilter};
pub use index::{FieldIndices, IndexerFunc};
pub use index_store::FieldIndexStore;
pub use predicate::{ChangePredicate, ObjectEvent};
pub use runtime::ControllerManager;

/// A long-running task owned by the manager
#[async_trait]
pub trait Runnable: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Run until `shutdown` fires or a fatal error occurs
    async fn start(self: Box<Self>, shutdown: CancellationToken) -> Result<(), Error>;
}

/// Registers field indices on the manager's object cache
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FieldIndexer: Send + Sync {
    /// Index objects of `object_type` under `field` using `extract`.
    ///
    /// May block until the cache accepts the index; aborts with
    /// [`Error::Cancelled`] when `cancel` fires first.
    async fn index_field(
        &self,
        cancel: &CancellationToken,
        object_type: &ObjectType,
        field: &str,
        extract: IndexerFunc,
    ) -> Result<(), Error>;
}

/// The process that owns controllers and runs them
#[cfg_attr(test, automock)]
pub trait Manager: Send + Sync {
    /// Read access to cluster state, shared by every controller
    fn client(&self) -> Arc<dyn Getter>;

    /// Kind registry
    fn scheme(&self) -> Arc<Scheme>;

    /// Root span controllers log under
    fn logger(&self) -> tracing::Span;

    /// Index registration on the manager's cache
    fn field_indexer(&self) -> Arc<dyn FieldIndexer>;

    /// Hand a runnable to the manager; it starts with the manager
    fn add(&self, runnable: Box<dyn Runnable>) -> Result<(), Error>;
}
