//! Watch-driven controller for one kind
//!
//! A [`Controller`] follows the watch stream of its kind, derives
//! create/update/delete transitions from a snapshot of last-seen objects,
//! gates them through the change predicates and hands the object key to
//! the reconciler. Requests are processed one at a time; a request that
//! failed with a retryable error is retried after [`RECONCILE_RETRY_DELAY`].

use std::collections::HashMap;
use std::future::poll_fn;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info, info_span, trace, warn, Instrument, Span};

use gantry_common::{Error, NamespacedName, ObjectType, Result};

use crate::client::Getter;
use crate::manager::cache::SnapshotCache;
use crate::manager::predicate::{all_accept, ChangePredicate};
use crate::manager::{Manager, Runnable};
use crate::reconciler::{Reconciler, Request};

/// Delay before a reconcile that failed with a retryable error is retried
pub const RECONCILE_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Builds a [`Controller`] bound to a manager's client and logger
pub struct ControllerBuilder {
    object_type: ObjectType,
    getter: Arc<dyn Getter>,
    span: Span,
    predicates: Vec<Arc<dyn ChangePredicate>>,
    retry_delay: Duration,
}

impl ControllerBuilder {
    /// Controller for `object_type`, reading through `mgr`'s client
    pub fn new(mgr: &dyn Manager, object_type: ObjectType) -> Self {
        let span = mgr.logger().in_scope(|| info_span!("controller", controller = %object_type));
        Self {
            getter: mgr.client(),
            object_type,
            span,
            predicates: Vec::new(),
            retry_delay: RECONCILE_RETRY_DELAY,
        }
    }

    /// Only dispatch events this predicate accepts
    pub fn with_event_filter(mut self, predicate: Arc<dyn ChangePredicate>) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// [`ControllerBuilder::with_event_filter`] for each predicate
    pub fn with_event_filters(
        mut self,
        predicates: impl IntoIterator<Item = Arc<dyn ChangePredicate>>,
    ) -> Self {
        self.predicates.extend(predicates);
        self
    }

    /// Override the retry delay for failed reconciles
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Finish the controller with the reconciler it dispatches to
    pub fn build(self, reconciler: Arc<dyn Reconciler>) -> Controller {
        Controller {
            name: self.object_type.to_string(),
            object_type: self.object_type,
            getter: self.getter,
            span: self.span,
            predicates: self.predicates,
            reconciler,
            retry_delay: self.retry_delay,
        }
    }
}

/// Runnable watch/dispatch loop for one kind
pub struct Controller {
    name: String,
    object_type: ObjectType,
    getter: Arc<dyn Getter>,
    span: Span,
    predicates: Vec<Arc<dyn ChangePredicate>>,
    reconciler: Arc<dyn Reconciler>,
    retry_delay: Duration,
}

impl Controller {
    async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting controller");

        let mut stream = self.getter.watch(&self.object_type);
        let mut cache = SnapshotCache::default();
        let mut retries = RetryQueue::default();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(key) = retries.next_due(), if !retries.is_empty() => {
                    debug!(object = %key, "Retrying reconcile");
                    self.dispatch(key, &mut retries, &shutdown).await;
                }
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        for change in cache.observe(event) {
                            let key = NamespacedName::from_object(change.object());
                            if !all_accept(&self.predicates, &change) {
                                trace!(object = %key, "Event filtered by predicates");
                                continue;
                            }
                            self.dispatch(key, &mut retries, &shutdown).await;
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Watch error, retrying with backoff"),
                    None => {
                        return Err(Error::watch(
                            self.object_type.to_string(),
                            "watch stream ended unexpectedly",
                        ));
                    }
                },
            }
        }

        info!("Controller stopped");
        Ok(())
    }

    async fn dispatch(
        &self,
        key: NamespacedName,
        retries: &mut RetryQueue,
        shutdown: &CancellationToken,
    ) {
        let request = Request::new(key.clone());
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = self.reconciler.reconcile(request) => result,
        };

        match result {
            Ok(()) => {
                retries.cancel(&key);
                debug!(object = %key, "Reconciliation completed");
            }
            Err(e) if e.is_retryable() => {
                warn!(object = %key, error = %e, retry_in = ?self.retry_delay, "Reconciliation error");
                retries.schedule(key, self.retry_delay);
            }
            Err(e) => {
                retries.cancel(&key);
                error!(object = %key, error = %e, "Reconciliation failed, not retrying");
            }
        }
    }
}

#[async_trait]
impl Runnable for Controller {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
        let span = self.span.clone();
        self.run(shutdown).instrument(span).await
    }
}

/// Pending retries, at most one per object
#[derive(Default)]
struct RetryQueue {
    queue: DelayQueue<NamespacedName>,
    keys: HashMap<NamespacedName, delay_queue::Key>,
}

impl RetryQueue {
    fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn schedule(&mut self, key: NamespacedName, delay: Duration) {
        if self.keys.contains_key(&key) {
            return;
        }
        let handle = self.queue.insert(key.clone(), delay);
        self.keys.insert(key, handle);
    }

    fn cancel(&mut self, key: &NamespacedName) {
        if let Some(handle) = self.keys.remove(key) {
            self.queue.remove(&handle);
        }
    }

    async fn next_due(&mut self) -> Option<NamespacedName> {
        let expired = poll_fn(|cx| self.queue.poll_expired(cx)).await?;
        let key = expired.into_inner();
        self.keys.remove(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockGetter, WatchEvent};
    use crate::manager::predicate::{GenerationChangedPredicate, ObjectEvent};
    use crate::manager::MockManager;
    use gantry_common::{GatewayKind, Scheme};
    use kube::api::DynamicObject;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn route_type() -> ObjectType {
        Scheme::with_defaults()
            .object_type(GatewayKind::HttpRoute)
            .unwrap()
    }

    fn route(name: &str, version: &str, generation: i64) -> DynamicObject {
        let mut obj = DynamicObject::new(name, route_type().api_resource()).within("default");
        obj.metadata.resource_version = Some(version.to_string());
        obj.metadata.generation = Some(generation);
        obj
    }

    /// Reconciler recording requests; fails the first `failures` calls
    struct RecordingReconciler {
        tx: mpsc::UnboundedSender<Request>,
        failures: Mutex<usize>,
    }

    #[async_trait]
    impl Reconciler for RecordingReconciler {
        async fn reconcile(&self, request: Request) -> Result<()> {
            let _ = self.tx.send(request);
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::internal("transient"));
            }
            Ok(())
        }
    }

    fn recording(failures: usize) -> (Arc<dyn Reconciler>, mpsc::UnboundedReceiver<Request>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(RecordingReconciler {
                tx,
                failures: Mutex::new(failures),
            }),
            rx,
        )
    }

    /// Manager whose getter replays `events` and then idles
    fn manager_watching(events: Vec<WatchEvent>) -> MockManager {
        let mut getter = MockGetter::new();
        let events = Mutex::new(Some(events));
        getter.expect_watch().times(1).returning(move |_| {
            let events = events.lock().unwrap().take().unwrap_or_default();
            futures::stream::iter(events.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()
        });
        let getter: Arc<dyn Getter> = Arc::new(getter);

        let mut mgr = MockManager::new();
        mgr.expect_client().returning(move || getter.clone());
        mgr.expect_logger().returning(Span::none);
        mgr
    }

    async fn next_request(rx: &mut mpsc::UnboundedReceiver<Request>) -> NamespacedName {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a reconcile")
            .expect("reconciler dropped")
            .namespaced_name
    }

    #[tokio::test]
    async fn dispatches_every_change_without_predicates() {
        let mgr = manager_watching(vec![
            WatchEvent::RelistStarted,
            WatchEvent::Applied(route("a", "1", 1)),
            WatchEvent::RelistDone,
            WatchEvent::Applied(route("a", "2", 1)),
            WatchEvent::Deleted(route("a", "2", 1)),
        ]);
        let (reconciler, mut rx) = recording(0);
        let controller = ControllerBuilder::new(&mgr, route_type()).build(reconciler);
        assert_eq!(controller.name(), route_type().to_string());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Box::new(controller).start(shutdown.clone()));

        for _ in 0..3 {
            assert_eq!(next_request(&mut rx).await, NamespacedName::new("default", "a"));
        }

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn predicates_gate_updates() {
        let mgr = manager_watching(vec![
            WatchEvent::Applied(route("a", "1", 1)),
            // status-only change: same generation
            WatchEvent::Applied(route("a", "2", 1)),
            WatchEvent::Applied(route("b", "1", 1)),
        ]);
        let (reconciler, mut rx) = recording(0);
        let controller = ControllerBuilder::new(&mgr, route_type())
            .with_event_filter(Arc::new(GenerationChangedPredicate))
            .build(reconciler);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Box::new(controller).start(shutdown.clone()));

        assert_eq!(next_request(&mut rx).await, NamespacedName::new("default", "a"));
        assert_eq!(next_request(&mut rx).await, NamespacedName::new("default", "b"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn all_predicates_must_accept() {
        #[derive(Debug)]
        struct RejectDeletes;
        impl ChangePredicate for RejectDeletes {
            fn delete(&self, _obj: &DynamicObject) -> bool {
                false
            }
        }

        let mgr = manager_watching(vec![
            WatchEvent::Applied(route("a", "1", 1)),
            WatchEvent::Deleted(route("a", "1", 1)),
            WatchEvent::Applied(route("b", "1", 1)),
        ]);
        let (reconciler, mut rx) = recording(0);
        let controller = ControllerBuilder::new(&mgr, route_type())
            .with_event_filters([
                Arc::new(GenerationChangedPredicate) as Arc<dyn ChangePredicate>,
                Arc::new(RejectDeletes),
            ])
            .build(reconciler);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Box::new(controller).start(shutdown.clone()));

        assert_eq!(next_request(&mut rx).await, NamespacedName::new("default", "a"));
        assert_eq!(next_request(&mut rx).await, NamespacedName::new("default", "b"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconcile_is_retried_after_delay() {
        let mgr = manager_watching(vec![WatchEvent::Applied(route("a", "1", 1))]);
        let (reconciler, mut rx) = recording(1);
        let controller = ControllerBuilder::new(&mgr, route_type())
            .retry_delay(Duration::from_millis(50))
            .build(reconciler);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Box::new(controller).start(shutdown.clone()));

        assert_eq!(next_request(&mut rx).await, NamespacedName::new("default", "a"));
        assert_eq!(next_request(&mut rx).await, NamespacedName::new("default", "a"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    /// Reconciler that always fails with the error `fail` builds
    struct FailingReconciler {
        calls: Arc<AtomicUsize>,
        fail: fn() -> Error,
    }

    #[async_trait]
    impl Reconciler for FailingReconciler {
        async fn reconcile(&self, _request: Request) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.fail)())
        }
    }

    async fn reconcile_calls_within(fail: fn() -> Error, window: Duration) -> usize {
        let mgr = manager_watching(vec![WatchEvent::Applied(route("a", "1", 1))]);
        let calls = Arc::new(AtomicUsize::new(0));
        let controller = ControllerBuilder::new(&mgr, route_type())
            .retry_delay(Duration::from_millis(50))
            .build(Arc::new(FailingReconciler {
                calls: calls.clone(),
                fail,
            }));

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Box::new(controller).start(shutdown.clone()));
        tokio::time::sleep(window).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        calls.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_is_not_requeued() {
        let calls = reconcile_calls_within(
            || Error::channel_closed("reconciler"),
            Duration::from_millis(500),
        )
        .await;
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_keeps_being_requeued() {
        let calls = reconcile_calls_within(
            || Error::watch("HTTPRoute", "connection reset"),
            Duration::from_millis(500),
        )
        .await;
        assert!(calls > 1, "expected retries, got {calls} call(s)");
    }

    #[tokio::test]
    async fn ended_watch_stream_is_an_error() {
        let mut getter = MockGetter::new();
        getter
            .expect_watch()
            .returning(|_| futures::stream::empty().boxed());
        let getter: Arc<dyn Getter> = Arc::new(getter);
        let mut mgr = MockManager::new();
        mgr.expect_client().returning(move || getter.clone());
        mgr.expect_logger().returning(Span::none);

        let (reconciler, _rx) = recording(0);
        let controller = ControllerBuilder::new(&mgr, route_type()).build(reconciler);

        let err = Box::new(controller)
            .start(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Watch { .. }));
    }

    #[test]
    fn retry_queue_keeps_one_entry_per_object() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut retries = RetryQueue::default();
            let key = NamespacedName::new("default", "a");
            retries.schedule(key.clone(), Duration::from_secs(60));
            retries.schedule(key.clone(), Duration::from_secs(60));
            assert_eq!(retries.keys.len(), 1);
            assert_eq!(retries.queue.len(), 1);

            retries.cancel(&key);
            assert!(retries.is_empty());
            assert!(retries.queue.is_empty());
        });
    }

    #[test]
    fn object_event_carries_new_state_for_updates() {
        let event = ObjectEvent::Update {
            old: route("a", "1", 1),
            new: route("a", "2", 2),
        };
        assert_eq!(event.object().metadata.resource_version.as_deref(), Some("2"));
    }
}
