//! Last-seen state of a watched kind
//!
//! Turns raw watch events into create/update/delete transitions. A relist
//! re-applies every live object; whatever was cached but not re-applied by
//! the end of the relist is reported as deleted.

use std::collections::{HashMap, HashSet};

use kube::api::DynamicObject;

use gantry_common::NamespacedName;

use crate::client::WatchEvent;
use crate::manager::predicate::ObjectEvent;

#[derive(Default)]
pub(crate) struct SnapshotCache {
    objects: HashMap<NamespacedName, DynamicObject>,
    relist_seen: Option<HashSet<NamespacedName>>,
}

impl SnapshotCache {
    pub(crate) fn observe(&mut self, event: WatchEvent) -> Vec<ObjectEvent> {
        match event {
            WatchEvent::Applied(obj) => {
                let key = NamespacedName::from_object(&obj);
                if let Some(seen) = self.relist_seen.as_mut() {
                    seen.insert(key.clone());
                }
                match self.objects.insert(key, obj.clone()) {
                    None => vec![ObjectEvent::Create(obj)],
                    // relists re-apply objects that didn't change
                    Some(old) if unchanged(&old, &obj) => Vec::new(),
                    Some(old) => vec![ObjectEvent::Update { old, new: obj }],
                }
            }
            WatchEvent::Deleted(obj) => {
                let key = NamespacedName::from_object(&obj);
                if let Some(seen) = self.relist_seen.as_mut() {
                    seen.remove(&key);
                }
                self.objects.remove(&key);
                vec![ObjectEvent::Delete(obj)]
            }
            WatchEvent::RelistStarted => {
                self.relist_seen = Some(HashSet::new());
                Vec::new()
            }
            WatchEvent::RelistDone => {
                let Some(seen) = self.relist_seen.take() else {
                    return Vec::new();
                };
                let mut stale: Vec<NamespacedName> = self
                    .objects
                    .keys()
                    .filter(|key| !seen.contains(*key))
                    .cloned()
                    .collect();
                stale.sort();
                stale
                    .into_iter()
                    .filter_map(|key| self.objects.remove(&key))
                    .map(ObjectEvent::Delete)
                    .collect()
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}

fn unchanged(old: &DynamicObject, new: &DynamicObject) -> bool {
    match (&old.metadata.resource_version, &new.metadata.resource_version) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
