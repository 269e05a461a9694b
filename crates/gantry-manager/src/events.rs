//! Domain events published by reconcilers and the loop that consumes them
//!
//! Every registered reconciler writes onto one shared bounded channel. The
//! [`EventLoop`] drains it in batches: it waits for one event, takes whatever
//! else is already queued, and hands the batch to an [`EventHandler`]. Events
//! that arrive while a batch is being handled form the next batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::DynamicObject;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gantry_common::{NamespacedName, ObjectType, Result};

use crate::manager::Runnable;

/// Sending half of the shared event channel
pub type EventSender = mpsc::Sender<Event>;

/// Receiving half of the shared event channel
pub type EventReceiver = mpsc::Receiver<Event>;

/// Events handed to the handler in one call
pub type EventBatch = Vec<Event>;

/// An object exists with the given state
#[derive(Debug, Clone)]
pub struct UpsertEvent {
    /// Kind of the object
    pub object_type: ObjectType,
    /// Current state of the object
    pub resource: DynamicObject,
}

/// An object no longer exists
#[derive(Debug, Clone)]
pub struct DeleteEvent {
    /// Kind of the deleted object
    pub object_type: ObjectType,
    /// Key of the deleted object
    pub namespaced_name: NamespacedName,
}

/// Domain event emitted by a reconciler
#[derive(Debug, Clone)]
pub enum Event {
    /// Object created or changed
    Upsert(UpsertEvent),
    /// Object removed
    Delete(DeleteEvent),
}

impl Event {
    /// Kind the event is about
    pub fn object_type(&self) -> &ObjectType {
        match self {
            Event::Upsert(e) => &e.object_type,
            Event::Delete(e) => &e.object_type,
        }
    }

    /// Key of the object the event is about
    pub fn namespaced_name(&self) -> NamespacedName {
        match self {
            Event::Upsert(e) => NamespacedName::from_object(&e.resource),
            Event::Delete(e) => e.namespaced_name.clone(),
        }
    }
}

/// Create the shared event channel
///
/// Capacity must be at least 1; senders wait when the consumer falls behind.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Consumer of event batches
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one batch. Failures are the handler's to report.
    async fn handle_batch(&self, batch: EventBatch);
}

/// Drains the shared channel into batches for an [`EventHandler`]
pub struct EventLoop {
    rx: EventReceiver,
    handler: Arc<dyn EventHandler>,
}

impl EventLoop {
    /// Create an event loop over the receiving half of the channel
    pub fn new(rx: EventReceiver, handler: Arc<dyn EventHandler>) -> Self {
        Self { rx, handler }
    }
}

#[async_trait]
impl Runnable for EventLoop {
    fn name(&self) -> &str {
        "event-loop"
    }

    async fn start(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let EventLoop { mut rx, handler } = *self;
        info!("Starting event loop");

        loop {
            let first = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Event loop stopped");
                    return Ok(());
                }
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("All event senders dropped, stopping event loop");
                        return Ok(());
                    }
                },
            };

            let mut batch = vec![first];
            while let Ok(event) = rx.try_recv() {
                batch.push(event);
            }

            debug!(batch_size = batch.len(), "Handling event batch");
            handler.handle_batch(batch).await;
        }
    }
}

/// Handler that keeps the latest state of every object it has seen
#[derive(Default)]
pub struct ClusterStateHandler {
    objects: DashMap<(ObjectType, NamespacedName), DynamicObject>,
    batches: AtomicU64,
}

impl ClusterStateHandler {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest state of an object, if it exists
    pub fn get(&self, object_type: &ObjectType, key: &NamespacedName) -> Option<DynamicObject> {
        self.objects
            .get(&(object_type.clone(), key.clone()))
            .map(|entry| entry.value().clone())
    }

    /// Number of objects currently known
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if no object is known
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    #[cfg(test)]
    fn batches_handled(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventHandler for ClusterStateHandler {
    async fn handle_batch(&self, batch: EventBatch) {
        let mut upserts = 0usize;
        let mut deletes = 0usize;

        for event in batch {
            match event {
                Event::Upsert(e) => {
                    let key = NamespacedName::from_object(&e.resource);
                    self.objects.insert((e.object_type, key), e.resource);
                    upserts += 1;
                }
                Event::Delete(e) => {
                    self.objects.remove(&(e.object_type, e.namespaced_name));
                    deletes += 1;
                }
            }
        }

        let batch_number = self.batches.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            batch = batch_number,
            upserts,
            deletes,
            objects = self.objects.len(),
            "Processed event batch"
        );
    }
}
