//! Shared fixtures: a scripted origin and a worker wired to it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shellcache_core::cache::CacheStorage;
use shellcache_core::net::{FetchError, Fetcher, Request, Response};
use shellcache_core::worker::{CacheWorker, WorkerSettings};
use tempfile::TempDir;
use url::Url;

pub const ORIGIN: &str = "http://127.0.0.1:5000";
pub const PREFIX: &str = "skanda-billing";

/// An origin that answers from a fixed table and can be switched off.
#[derive(Default)]
pub struct ScriptedOrigin {
    responses: Mutex<HashMap<String, Response>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    requested: Mutex<Vec<String>>,
}

impl ScriptedOrigin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, response: Response) {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.requested.lock().expect("requested lock").clear();
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().expect("requested lock").clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested
            .lock()
            .expect("requested lock")
            .push(request.url.to_string());
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable(request.url.to_string()));
        }
        let found = self
            .responses
            .lock()
            .expect("responses lock")
            .get(request.url.as_str())
            .cloned();
        Ok(found.unwrap_or_else(|| Response::new(404, "not found")))
    }
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN)
        .and_then(|origin| origin.join(path))
        .expect("test url")
}

pub fn html(body: &str) -> Response {
    Response::new(200, body.to_string()).with_header("content-type", "text/html; charset=utf-8")
}

pub fn css(body: &str) -> Response {
    Response::new(200, body.to_string()).with_header("content-type", "text/css")
}

pub fn settings(version: &str, assets: &[&str]) -> WorkerSettings {
    let mut s = WorkerSettings::new(url("/"), PREFIX, version)
        .with_cdn_hosts(vec!["cdn.jsdelivr.net".to_string()])
        .with_static_assets(assets.iter().map(|a| url(a)).collect());
    s.install_concurrency = 4;
    s
}

pub struct Harness {
    pub dir: TempDir,
    pub origin: Arc<ScriptedOrigin>,
    pub storage: Arc<CacheStorage>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = Arc::new(CacheStorage::open(dir.path()).expect("open storage"));
        Self {
            dir,
            origin: ScriptedOrigin::new(),
            storage,
        }
    }

    pub fn worker(&self, settings: WorkerSettings) -> CacheWorker<Arc<ScriptedOrigin>> {
        CacheWorker::new(settings, self.origin.clone(), self.storage.clone())
    }

    /// A worker for `version` that has installed and activated.
    pub async fn active_worker(
        &self,
        version: &str,
        assets: &[&str],
    ) -> CacheWorker<Arc<ScriptedOrigin>> {
        let worker = self.worker(settings(version, assets));
        worker.install().await.expect("install");
        worker.activate().await.expect("activate");
        worker
    }
}
