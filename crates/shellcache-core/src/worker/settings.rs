use url::Url;

use super::WorkerError;
use crate::config::Config;

/// Resolved, validated settings for one worker version.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub origin: Url,
    pub cache_prefix: String,
    pub version: String,
    pub static_assets: Vec<Url>,
    pub cdn_hosts: Vec<String>,
    pub install_concurrency: usize,
}

impl WorkerSettings {
    pub fn new(origin: Url, cache_prefix: &str, version: &str) -> Self {
        Self {
            origin,
            cache_prefix: cache_prefix.to_string(),
            version: version.to_string(),
            static_assets: Vec::new(),
            cdn_hosts: Vec::new(),
            install_concurrency: 1,
        }
    }

    /// Resolve the asset list against the origin.
    pub fn from_config(config: &Config) -> Result<Self, WorkerError> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| WorkerError::Config(format!("invalid origin {:?}: {}", config.origin, e)))?;
        if config.cache_prefix.is_empty() || config.cache_version.is_empty() {
            return Err(WorkerError::Config(
                "cache prefix and version must not be empty".to_string(),
            ));
        }

        let static_assets = config
            .static_assets
            .iter()
            .map(|asset| {
                origin
                    .join(asset)
                    .map_err(|e| WorkerError::Config(format!("invalid asset {:?}: {}", asset, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            static_assets,
            cdn_hosts: config.cdn_hosts.clone(),
            install_concurrency: config.install_concurrency.max(1),
            ..Self::new(origin, &config.cache_prefix, &config.cache_version)
        })
    }

    pub fn with_static_assets(mut self, assets: Vec<Url>) -> Self {
        self.static_assets = assets;
        self
    }

    pub fn with_cdn_hosts(mut self, hosts: Vec<String>) -> Self {
        self.cdn_hosts = hosts;
        self
    }

    pub fn static_generation(&self) -> String {
        format!("{}-static-{}", self.cache_prefix, self.version)
    }

    pub fn dynamic_generation(&self) -> String {
        format!("{}-dynamic-{}", self.cache_prefix, self.version)
    }

    /// Lookup order for cache hits: shell first, then observed responses.
    pub fn current_generations(&self) -> Vec<String> {
        vec![self.static_generation(), self.dynamic_generation()]
    }

    /// The root document, used as the navigation fallback.
    pub fn root_url(&self) -> Url {
        let mut root = self.origin.clone();
        root.set_path("/");
        root.set_query(None);
        root.set_fragment(None);
        root
    }

    pub fn is_allowed_cdn(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| self.cdn_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)))
            .unwrap_or(false)
    }
}
