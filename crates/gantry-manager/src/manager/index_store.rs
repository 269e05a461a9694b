//! In-memory field indices maintained by the manager
//!
//! Indices are registered before the manager starts. Once started, one
//! informer per indexed kind keeps every index of that kind current, and
//! [`FieldIndexStore::lookup`] answers "which objects have this key".

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gantry_common::{Error, NamespacedName, ObjectType, Result};

use crate::client::Getter;
use crate::manager::cache::SnapshotCache;
use crate::manager::index::IndexerFunc;
use crate::manager::predicate::ObjectEvent;
use crate::manager::FieldIndexer;

type IndexId = (ObjectType, String);

struct FieldIndex {
    extract: IndexerFunc,
    by_key: HashMap<String, BTreeSet<NamespacedName>>,
    by_object: HashMap<NamespacedName, Vec<String>>,
}

impl FieldIndex {
    fn new(extract: IndexerFunc) -> Self {
        Self {
            extract,
            by_key: HashMap::new(),
            by_object: HashMap::new(),
        }
    }

    fn apply(&mut self, obj: &DynamicObject) {
        let nsname = NamespacedName::from_object(obj);
        self.remove(&nsname);

        let keys = (self.extract)(obj);
        for key in &keys {
            self.by_key
                .entry(key.clone())
                .or_default()
                .insert(nsname.clone());
        }
        if !keys.is_empty() {
            self.by_object.insert(nsname, keys);
        }
    }

    fn remove(&mut self, nsname: &NamespacedName) {
        let Some(keys) = self.by_object.remove(nsname) else {
            return;
        };
        for key in keys {
            if let Some(objects) = self.by_key.get_mut(&key) {
                objects.remove(nsname);
                if objects.is_empty() {
                    self.by_key.remove(&key);
                }
            }
        }
    }
}

/// Field indices keyed by (kind, field)
#[derive(Default)]
pub struct FieldIndexStore {
    indices: DashMap<IndexId, FieldIndex>,
    started: AtomicBool,
}

impl FieldIndexStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Index (or re-index) an object of `object_type`
    pub fn apply(&self, object_type: &ObjectType, obj: &DynamicObject) {
        for mut entry in self.indices.iter_mut() {
            if entry.key().0 == *object_type {
                entry.value_mut().apply(obj);
            }
        }
    }

    /// Drop an object of `object_type` from every index of that kind
    pub fn remove(&self, object_type: &ObjectType, nsname: &NamespacedName) {
        for mut entry in self.indices.iter_mut() {
            if entry.key().0 == *object_type {
                entry.value_mut().remove(nsname);
            }
        }
    }

    /// Objects whose `field` index contains `value`, sorted.
    ///
    /// Read side of the store for event handlers resolving related objects,
    /// e.g. the EndpointSlices of a Service through
    /// [`KUBERNETES_SERVICE_NAME_INDEX_FIELD`](crate::manager::index::KUBERNETES_SERVICE_NAME_INDEX_FIELD).
    pub fn lookup(
        &self,
        object_type: &ObjectType,
        field: &str,
        value: &str,
    ) -> Vec<NamespacedName> {
        self.indices
            .get(&(object_type.clone(), field.to_string()))
            .and_then(|index| index.by_key.get(value).map(|set| set.iter().cloned().collect()))
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn has_index(&self, object_type: &ObjectType, field: &str) -> bool {
        self.indices
            .contains_key(&(object_type.clone(), field.to_string()))
    }

    fn indexed_types(&self) -> Vec<ObjectType> {
        let mut types: Vec<ObjectType> = self
            .indices
            .iter()
            .map(|entry| entry.key().0.clone())
            .collect();
        types.sort_by_key(|t| t.to_string());
        types.dedup();
        types
    }

    /// Keep every index current until `shutdown` fires.
    ///
    /// No further indices can be registered once this is called.
    pub async fn run_informers(
        self: Arc<Self>,
        getter: Arc<dyn Getter>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);

        let types = self.indexed_types();
        if types.is_empty() {
            debug!("No field indices registered");
            return Ok(());
        }

        let informers = types.into_iter().map(|object_type| {
            let store = self.clone();
            let getter = getter.clone();
            let shutdown = shutdown.clone();
            async move { store.inform(getter, object_type, shutdown).await }
        });
        futures::future::try_join_all(informers).await?;
        Ok(())
    }

    async fn inform(
        &self,
        getter: Arc<dyn Getter>,
        object_type: ObjectType,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(kind = %object_type, "Starting field index informer");
        let mut stream = getter.watch(&object_type);
        let mut cache = SnapshotCache::default();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                event = stream.next() => match event {
                    Some(Ok(event)) => {
                        for change in cache.observe(event) {
                            match change {
                                ObjectEvent::Delete(obj) => {
                                    self.remove(&object_type, &NamespacedName::from_object(&obj))
                                }
                                other => self.apply(&object_type, other.object()),
                            }
                        }
                    }
                    Some(Err(e)) => warn!(kind = %object_type, error = %e, "Index watch error, retrying with backoff"),
                    None => {
                        return Err(Error::watch(
                            object_type.to_string(),
                            "index watch stream ended unexpectedly",
                        ));
                    }
                },
            }
        }
    }
}

#[async_trait]
impl FieldIndexer for FieldIndexStore {
    async fn index_field(
        &self,
        cancel: &CancellationToken,
        object_type: &ObjectType,
        field: &str,
        extract: IndexerFunc,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("indexing {field} for {object_type}")));
        }
        if self.started.load(Ordering::SeqCst) {
            return Err(Error::IndexerStarted {
                kind: object_type.to_string(),
                field: field.to_string(),
            });
        }

        match self.indices.entry((object_type.clone(), field.to_string())) {
            Entry::Occupied(_) => Err(Error::index_conflict(object_type.to_string(), field)),
            Entry::Vacant(slot) => {
                slot.insert(FieldIndex::new(extract));
                debug!(kind = %object_type, field, "Field index registered");
                Ok(())
            }
        }
    }
}
