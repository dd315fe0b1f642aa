//! Cache-first and network-first retrieval.

use tracing::{debug, warn};

use super::{fallback, route, CacheWorker, FetchOutcome, ResponseSource};
use crate::net::{Fetcher, Request, Response};

impl<F: Fetcher> CacheWorker<F> {
    /// Static assets: answer from cache without touching the network; on a
    /// miss, fetch and keep a copy of same-origin 200s.
    pub(super) async fn cache_first(&self, request: &Request) -> FetchOutcome {
        let generations = self.settings.current_generations();
        if let Some(response) = self.storage.match_first(&generations, request).await {
            debug!(url = %request.url, "Cache hit");
            return respond(response, ResponseSource::Cache);
        }

        match self.fetch_tagged(request).await {
            Ok(response) => {
                if response.is_ok_basic() {
                    self.store_dynamic(request, &response).await;
                }
                respond(response, ResponseSource::Network)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Static asset unavailable");
                if route::is_image(&request.url) {
                    respond(fallback::offline_image(), ResponseSource::Fallback)
                } else {
                    respond(fallback::asset_unavailable(), ResponseSource::Fallback)
                }
            }
        }
    }

    /// Documents and API routes: prefer fresh content, fall back to the
    /// cache, then to the cached root for navigations, then to the offline
    /// page.
    pub(super) async fn network_first(&self, request: &Request) -> FetchOutcome {
        match self.fetch_tagged(request).await {
            Ok(response) => {
                if response.status == 200 {
                    self.store_dynamic(request, &response).await;
                }
                return respond(response, ResponseSource::Network);
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
            }
        }

        let generations = self.settings.current_generations();
        if let Some(response) = self.storage.match_first(&generations, request).await {
            return respond(response, ResponseSource::Cache);
        }

        if request.is_navigation() {
            let root = Request::get(self.settings.root_url());
            if let Some(response) = self.storage.match_first(&generations, &root).await {
                debug!(url = %request.url, "Serving cached root document");
                return respond(response, ResponseSource::Cache);
            }
        }

        respond(fallback::offline_page(), ResponseSource::Fallback)
    }

    /// Write failures are not fatal; the response still reaches the page.
    async fn store_dynamic(&self, request: &Request, response: &Response) {
        let name = self.settings.dynamic_generation();
        if let Err(e) = self.storage.put(&name, request, response.clone()).await {
            warn!(url = %request.url, generation = %name, error = %e, "Failed to cache response");
        }
    }
}

fn respond(response: Response, source: ResponseSource) -> FetchOutcome {
    FetchOutcome::Respond { response, source }
}
