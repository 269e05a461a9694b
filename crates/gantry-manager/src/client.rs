//! Read access to cluster state
//!
//! Reconcilers read current objects through [`Getter::get`]; controllers
//! and index informers follow changes through [`Getter::watch`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;

use gantry_common::{Error, NamespacedName, ObjectType};

#[cfg(test)]
use mockall::automock;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client times out.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// A change observed on a watched kind
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Object created or modified (also emitted for every object during a relist)
    Applied(DynamicObject),
    /// Object deleted
    Deleted(DynamicObject),
    /// A full relist started; objects not re-applied before `RelistDone` are gone
    RelistStarted,
    /// The relist finished
    RelistDone,
}

/// Read-only access to cluster object state
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Getter: Send + Sync {
    /// Current state of one object, `None` if it doesn't exist
    async fn get(
        &self,
        object_type: &ObjectType,
        key: &NamespacedName,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Stream of changes to every object of a kind, starting with a relist
    fn watch(&self, object_type: &ObjectType) -> BoxStream<'static, Result<WatchEvent, Error>>;
}

/// Production getter backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeGetter {
    client: Client,
}

impl KubeGetter {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Getter for KubeGetter {
    async fn get(
        &self,
        object_type: &ObjectType,
        key: &NamespacedName,
    ) -> Result<Option<DynamicObject>, Error> {
        let api = object_type.api_for(self.client.clone(), key);
        Ok(api.get_opt(&key.name).await?)
    }

    fn watch(&self, object_type: &ObjectType) -> BoxStream<'static, Result<WatchEvent, Error>> {
        let api = object_type.api_all(self.client.clone());
        let kind = object_type.to_string();

        watcher::watcher(api, watcher::Config::default().timeout(WATCH_TIMEOUT_SECS))
            .default_backoff()
            .map(move |event| match event {
                Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                    Ok(WatchEvent::Applied(obj))
                }
                Ok(watcher::Event::Delete(obj)) => Ok(WatchEvent::Deleted(obj)),
                Ok(watcher::Event::Init) => Ok(WatchEvent::RelistStarted),
                Ok(watcher::Event::InitDone) => Ok(WatchEvent::RelistDone),
                Err(e) => Err(Error::watch(kind.clone(), e.to_string())),
            })
            .boxed()
    }
}
