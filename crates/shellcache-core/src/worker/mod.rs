//! The offline cache worker.
//!
//! `CacheWorker` owns one worker version: its settings, its lifecycle phase,
//! the shared `CacheStorage` and the clients it controls. Handlers are gated
//! by phase, so a worker that has not activated never touches the cache on
//! behalf of a request.

pub mod clients;
pub mod fallback;
pub mod lifecycle;
pub mod notify;
pub mod route;
pub mod settings;
mod strategy;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, GenerationKind, GenerationSummary, StorageError};
use crate::net::{FetchError, Fetcher, Request, Response, ResponseType};

pub use clients::{ClientId, ClientInfo, Clients};
pub use lifecycle::{Lifecycle, LifecycleError, WorkerPhase};
pub use notify::{ClientAction, Notification, SyncOutcome, SYNC_TAG};
pub use route::{Decision, PassthroughReason, RequestClass};
pub use settings::WorkerSettings;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Cache storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Network,
    Fallback,
}

/// Result of offering a request to the worker.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the caller goes to the network itself.
    Passthrough(PassthroughReason),
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub deleted: Vec<String>,
    pub claimed: usize,
}

/// How `start` brought the worker to `Activated`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum StartReport {
    /// This version was already active; nothing was fetched.
    Restored,
    Installed {
        install: InstallReport,
        activation: ActivationReport,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub phase: WorkerPhase,
    pub version: String,
    pub origin: String,
    pub generations: Vec<GenerationSummary>,
    pub clients: Vec<ClientInfo>,
}

pub struct CacheWorker<F: Fetcher> {
    settings: WorkerSettings,
    fetcher: F,
    storage: Arc<CacheStorage>,
    lifecycle: Mutex<Lifecycle>,
    clients: Clients,
}

impl<F: Fetcher> CacheWorker<F> {
    pub fn new(settings: WorkerSettings, fetcher: F, storage: Arc<CacheStorage>) -> Self {
        Self {
            settings,
            fetcher,
            storage,
            lifecycle: Mutex::new(Lifecycle::new()),
            clients: Clients::new(),
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Network access for requests the worker passed through.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub async fn phase(&self) -> WorkerPhase {
        self.lifecycle.lock().await.phase()
    }

    async fn advance(&self, next: WorkerPhase) -> Result<(), WorkerError> {
        self.lifecycle.lock().await.advance(next)?;
        debug!(phase = next.label(), version = %self.settings.version, "Worker phase changed");
        Ok(())
    }

    async fn fail(&self, err: WorkerError) -> WorkerError {
        warn!(error = %err, version = %self.settings.version, "Worker became redundant");
        self.lifecycle.lock().await.fail();
        err
    }

    /// Fetch and tag the response as same-origin or cross-origin.
    async fn fetch_tagged(&self, request: &Request) -> Result<Response, FetchError> {
        let kind = ResponseType::for_request(&request.url, &self.settings.origin);
        self.fetcher
            .fetch(request)
            .await
            .map(|response| response.with_kind(kind))
    }

    // ===== Startup =====

    /// Bring the worker to `Activated`: restore it if the manifest already
    /// has this version current, otherwise run install and activate.
    pub async fn start(&self) -> Result<StartReport, WorkerError> {
        let manifest = self.storage.manifest().await;
        let restorable = self
            .settings
            .current_generations()
            .iter()
            .all(|name| manifest.is_current(name));

        if restorable {
            self.lifecycle.lock().await.restore()?;
            self.clients.claim().await;
            info!(version = %self.settings.version, "Restored active worker");
            return Ok(StartReport::Restored);
        }

        let install = self.install().await?;
        let activation = self.activate().await?;
        Ok(StartReport::Installed { install, activation })
    }

    // ===== Install =====

    /// Populate the static generation from the asset list.
    ///
    /// Individual asset failures are logged and reported, never fatal. Only a
    /// storage failure on the manifest makes the worker redundant.
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.advance(WorkerPhase::Installing).await?;

        let static_name = self.settings.static_generation();
        let dynamic_name = self.settings.dynamic_generation();
        let version = self.settings.version.clone();
        let registered = self
            .storage
            .update_manifest(|m| {
                m.register(&static_name, GenerationKind::Static, &version);
                m.register(&dynamic_name, GenerationKind::Dynamic, &version);
            })
            .await;
        if let Err(e) = registered {
            return Err(self.fail(e.into()).await);
        }

        let results: Vec<(Request, Result<Response, FetchError>)> =
            stream::iter(self.settings.static_assets.iter().cloned())
                .map(|url| async move {
                    let request = Request::get(url);
                    let result = self.fetch_tagged(&request).await;
                    (request, result)
                })
                .buffer_unordered(self.settings.install_concurrency.max(1))
                .collect()
                .await;

        let mut report = InstallReport::default();
        for (request, result) in results {
            let url = request.url.to_string();
            let outcome = match result {
                Ok(response) if response.is_success() => self
                    .storage
                    .put(&static_name, &request, response)
                    .await
                    .map_err(|e| e.to_string()),
                Ok(response) => Err(FetchError::from_status(response.status, &response.body).to_string()),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(()) => report.cached.push(url),
                Err(error) => {
                    warn!(url = %url, error = %error, "Failed to cache static asset");
                    report.failed.push(url);
                }
            }
        }
        report.cached.sort();
        report.failed.sort();

        self.advance(WorkerPhase::Installed).await?;
        info!(
            version = %self.settings.version,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Install complete"
        );
        Ok(report)
    }

    // ===== Activate =====

    /// Promote this version, delete stale generations and claim clients.
    pub async fn activate(&self) -> Result<ActivationReport, WorkerError> {
        self.advance(WorkerPhase::Activating).await?;

        match self.prune().await {
            Ok(deleted) => {
                let claimed = self.clients.claim().await;
                self.advance(WorkerPhase::Activated).await?;
                info!(
                    version = %self.settings.version,
                    deleted = deleted.len(),
                    claimed,
                    "Activation complete"
                );
                Ok(ActivationReport { deleted, claimed })
            }
            Err(e) => Err(self.fail(e.into()).await),
        }
    }

    async fn prune(&self) -> Result<Vec<String>, StorageError> {
        let version = self.settings.version.clone();
        self.storage.update_manifest(|m| m.promote(&version)).await?;
        for name in self.settings.current_generations() {
            self.storage.open_generation(&name).await?;
        }

        let manifest = self.storage.manifest().await;
        let keys = self.storage.keys().await;
        let stale = manifest.stale(&self.settings.cache_prefix, &keys);
        for name in &stale {
            info!(generation = %name, "Deleting stale cache generation");
            self.storage.delete(name).await?;
        }
        Ok(stale)
    }

    // ===== Fetch =====

    /// Offer a request to the worker. Never fails: network errors degrade to
    /// cached or synthesized responses.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        if !self.phase().await.is_controlling() {
            return FetchOutcome::Passthrough(PassthroughReason::NotActivated);
        }

        match route::decide(request, &self.settings) {
            Decision::Passthrough(reason) => {
                debug!(url = %request.url, method = %request.method, ?reason, "Not intercepting");
                FetchOutcome::Passthrough(reason)
            }
            Decision::Intercept(RequestClass::StaticAsset) => self.cache_first(request).await,
            Decision::Intercept(RequestClass::Document) => self.network_first(request).await,
        }
    }

    // ===== Side channels =====

    pub async fn sync(&self, tag: &str) -> SyncOutcome {
        notify::handle_sync(tag)
    }

    pub async fn push(&self, payload: Option<&str>) -> Notification {
        let notification = Notification::from_push(payload);
        info!(body = %notification.body, "Showing push notification");
        notification
    }

    /// Close the notification and bring the root page forward.
    pub async fn notification_click(&self, notification: &Notification) -> ClientAction {
        debug!(title = %notification.title, "Notification clicked");
        let root = self.settings.root_url().to_string();
        match self.clients.find(&root).await {
            Some(client) => ClientAction::Focus { client, url: root },
            None => ClientAction::OpenWindow { url: root },
        }
    }

    // ===== Maintenance =====

    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            phase: self.phase().await,
            version: self.settings.version.clone(),
            origin: self.settings.origin.to_string(),
            generations: self.storage.summaries().await,
            clients: self.clients.list().await,
        }
    }

    /// Delete every generation carrying this worker's prefix.
    pub async fn clear(&self) -> Result<Vec<String>, WorkerError> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await {
            if name.starts_with(&self.settings.cache_prefix) {
                self.storage.delete(&name).await?;
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}
