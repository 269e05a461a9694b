//! Generic reconciler turning object changes into domain events
//!
//! The reconciler owns no state beyond what it was built with: it reads the
//! current object through the getter and publishes an upsert or delete event
//! onto the shared channel.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use gantry_common::{Error, NamespacedName, ObjectType, Result};

use crate::client::Getter;
use crate::events::{DeleteEvent, Event, EventSender, UpsertEvent};
use crate::manager::filter::{FilterDecision, NamespacedNameFilter};

/// A request to reconcile one object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    /// Key of the object to reconcile
    pub namespaced_name: NamespacedName,
}

impl Request {
    /// Request for the object with the given key
    pub fn new(namespaced_name: NamespacedName) -> Self {
        Self { namespaced_name }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.namespaced_name.fmt(f)
    }
}

/// Invoked by a controller for every dispatched request
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Bring downstream state in line with the object. Errors are requeued.
    async fn reconcile(&self, request: Request) -> Result<()>;
}

/// Everything a reconciler is built from
#[derive(Clone)]
pub struct ReconcilerConfig {
    /// Read access to cluster state
    pub getter: Arc<dyn Getter>,
    /// Kind this reconciler handles
    pub object_type: ObjectType,
    /// Shared channel domain events are published on
    pub event_tx: EventSender,
    /// Identity filter; accept-all when none was configured
    pub namespaced_name_filter: Arc<dyn NamespacedNameFilter>,
}

/// Builds a reconciler from its configuration. Must wire exactly the
/// getter, filter and channel it is given.
pub type NewReconcilerFunc = Arc<dyn Fn(ReconcilerConfig) -> Arc<dyn Reconciler> + Send + Sync>;

/// Factory producing the default [`Implementation`]
pub fn default_reconciler_factory() -> NewReconcilerFunc {
    Arc::new(|config| Arc::new(Implementation::new(config)) as Arc<dyn Reconciler>)
}

/// Default reconciler: read the object, publish its state
pub struct Implementation {
    config: ReconcilerConfig,
}

impl Implementation {
    /// Build a reconciler from its configuration
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    async fn publish(&self, event: Event) -> Result<()> {
        self.config
            .event_tx
            .send(event)
            .await
            .map_err(|_| Error::channel_closed(format!("reconciler {}", self.config.object_type)))
    }
}

#[async_trait]
impl Reconciler for Implementation {
    #[instrument(skip_all, fields(object = %request))]
    async fn reconcile(&self, request: Request) -> Result<()> {
        debug!(kind = %self.config.object_type, "Reconciling the resource");

        if let FilterDecision::Reject(reason) =
            self.config.namespaced_name_filter.filter(&request.namespaced_name)
        {
            debug!(%reason, "Skipping the resource");
            return Ok(());
        }

        let found = self
            .config
            .getter
            .get(&self.config.object_type, &request.namespaced_name)
            .await?;

        let event = match found {
            Some(resource) => Event::Upsert(UpsertEvent {
                object_type: self.config.object_type.clone(),
                resource,
            }),
            None => {
                debug!("Resource is gone, publishing delete");
                Event::Delete(DeleteEvent {
                    object_type: self.config.object_type.clone(),
                    namespaced_name: request.namespaced_name,
                })
            }
        };

        self.publish(event).await?;
        debug!("Reconciled the resource");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockGetter;
    use crate::events::event_channel;
    use crate::manager::filter::{accept_all, create_filter_for_gateway_class};
    use gantry_common::{GatewayKind, Scheme};
    use kube::api::DynamicObject;

    fn object_type(kind: GatewayKind) -> ObjectType {
        Scheme::with_defaults().object_type(kind).unwrap()
    }

    fn config(
        getter: MockGetter,
        kind: GatewayKind,
        event_tx: EventSender,
        filter: Arc<dyn NamespacedNameFilter>,
    ) -> ReconcilerConfig {
        ReconcilerConfig {
            getter: Arc::new(getter),
            object_type: object_type(kind),
            event_tx,
            namespaced_name_filter: filter,
        }
    }

    #[tokio::test]
    async fn existing_object_publishes_upsert() {
        let route_type = object_type(GatewayKind::HttpRoute);
        let route = DynamicObject::new("web", route_type.api_resource()).within("default");

        let mut getter = MockGetter::new();
        let expected_type = route_type.clone();
        getter
            .expect_get()
            .withf(move |ot, key| ot == &expected_type && key == &NamespacedName::new("default", "web"))
            .times(1)
            .returning(move |_, _| Ok(Some(route.clone())));

        let (tx, mut rx) = event_channel(1);
        let reconciler =
            Implementation::new(config(getter, GatewayKind::HttpRoute, tx, accept_all()));

        reconciler
            .reconcile(Request::new(NamespacedName::new("default", "web")))
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            Event::Upsert(e) => {
                assert_eq!(e.object_type, route_type);
                assert_eq!(NamespacedName::from_object(&e.resource), NamespacedName::new("default", "web"));
            }
            other => panic!("expected upsert, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_object_publishes_delete() {
        let mut getter = MockGetter::new();
        getter.expect_get().times(1).returning(|_, _| Ok(None));

        let (tx, mut rx) = event_channel(1);
        let reconciler =
            Implementation::new(config(getter, GatewayKind::Service, tx, accept_all()));

        reconciler
            .reconcile(Request::new(NamespacedName::new("default", "gone")))
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            Event::Delete(e) => {
                assert_eq!(e.object_type, object_type(GatewayKind::Service));
                assert_eq!(e.namespaced_name, NamespacedName::new("default", "gone"));
            }
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn filtered_object_is_not_read() {
        let mut getter = MockGetter::new();
        getter.expect_get().never();

        let (tx, mut rx) = event_channel(1);
        let reconciler = Implementation::new(config(
            getter,
            GatewayKind::GatewayClass,
            tx,
            create_filter_for_gateway_class("nginx"),
        ));

        reconciler
            .reconcile(Request::new(NamespacedName::cluster("istio")))
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_errors_are_returned() {
        let mut getter = MockGetter::new();
        getter
            .expect_get()
            .returning(|_, _| Err(Error::internal("api unavailable")));

        let (tx, mut rx) = event_channel(1);
        let reconciler =
            Implementation::new(config(getter, GatewayKind::Gateway, tx, accept_all()));

        let err = reconciler
            .reconcile(Request::new(NamespacedName::new("default", "gw")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("api unavailable"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_is_reported() {
        let mut getter = MockGetter::new();
        getter.expect_get().returning(|_, _| Ok(None));

        let (tx, rx) = event_channel(1);
        drop(rx);
        let reconciler = Implementation::new(config(getter, GatewayKind::Secret, tx, accept_all()));

        let err = reconciler
            .reconcile(Request::new(NamespacedName::new("default", "tls")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelClosed { .. }));
    }
}
