//! The controller manager process
//!
//! Runnables are collected with [`Manager::add`] and started together by
//! [`ControllerManager::start`]. The first runnable to fail stops all the
//! others and its error is returned.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument, Span};

use gantry_common::{Error, Result, Scheme};

use crate::client::{Getter, KubeGetter};
use crate::manager::index_store::FieldIndexStore;
use crate::manager::{FieldIndexer, Manager, Runnable};

const INFORMERS_RUNNABLE: &str = "field-index-informers";

#[derive(Default)]
struct Runnables {
    started: bool,
    pending: Vec<Box<dyn Runnable>>,
}

/// Owns controllers and the shared field index store
pub struct ControllerManager {
    client: Arc<dyn Getter>,
    scheme: Arc<Scheme>,
    indexer: Arc<FieldIndexStore>,
    span: Span,
    runnables: Mutex<Runnables>,
}

impl ControllerManager {
    /// Manager reading through `client` with kinds resolved by `scheme`
    pub fn new(client: Arc<dyn Getter>, scheme: Arc<Scheme>) -> Self {
        Self {
            client,
            scheme,
            indexer: Arc::new(FieldIndexStore::new()),
            span: info_span!("manager"),
            runnables: Mutex::new(Runnables::default()),
        }
    }

    /// Manager for a live cluster; kinds are resolved through API discovery
    pub async fn from_kube(client: kube::Client) -> Self {
        let scheme = Scheme::discover(client.clone()).await;
        Self::new(Arc::new(KubeGetter::new(client)), Arc::new(scheme))
    }

    /// The field index store controllers register indices on
    pub fn index_store(&self) -> Arc<FieldIndexStore> {
        self.indexer.clone()
    }

    fn lock_runnables(&self) -> Result<std::sync::MutexGuard<'_, Runnables>> {
        self.runnables
            .lock()
            .map_err(|_| Error::internal_with_context("manager", "runnable registry lock poisoned"))
    }

    /// Run every added runnable until `shutdown` fires or one of them fails.
    ///
    /// Can only be called once.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let runnables = {
            let mut guard = self.lock_runnables()?;
            if guard.started {
                return Err(Error::internal_with_context("manager", "already started"));
            }
            guard.started = true;
            std::mem::take(&mut guard.pending)
        };

        let stop = shutdown.child_token();
        let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

        let store = self.indexer.clone();
        let getter = self.client.clone();
        let token = stop.clone();
        tasks.spawn(
            async move {
                let result = store.run_informers(getter, token).await;
                (INFORMERS_RUNNABLE.to_string(), result)
            }
            .instrument(self.span.clone()),
        );

        info!(parent: &self.span, runnables = runnables.len(), "Starting manager");
        for runnable in runnables {
            let name = runnable.name().to_string();
            let token = stop.clone();
            tasks.spawn(
                async move {
                    let result = runnable.start(token).await;
                    (name, result)
                }
                .instrument(self.span.clone()),
            );
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    debug!(parent: &self.span, runnable = %name, "Runnable finished");
                    None
                }
                Ok((name, Err(e))) => {
                    error!(parent: &self.span, runnable = %name, error = %e, "Runnable failed, stopping manager");
                    Some(e)
                }
                Err(e) => {
                    error!(parent: &self.span, error = %e, "Runnable panicked, stopping manager");
                    Some(Error::internal_with_context("manager", e.to_string()))
                }
            };
            if let Some(e) = failure {
                stop.cancel();
                first_error.get_or_insert(e);
            }
        }

        info!(parent: &self.span, "Manager stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Manager for ControllerManager {
    fn client(&self) -> Arc<dyn Getter> {
        self.client.clone()
    }

    fn scheme(&self) -> Arc<Scheme> {
        self.scheme.clone()
    }

    fn logger(&self) -> Span {
        self.span.clone()
    }

    fn field_indexer(&self) -> Arc<dyn FieldIndexer> {
        self.indexer.clone()
    }

    fn add(&self, runnable: Box<dyn Runnable>) -> Result<()> {
        let mut guard = self.lock_runnables()?;
        if guard.started {
            return Err(Error::ManagerStarted {
                runnable: runnable.name().to_string(),
            });
        }
        debug!(parent: &self.span, runnable = runnable.name(), "Runnable added");
        guard.pending.push(runnable);
        Ok(())
    }
}
