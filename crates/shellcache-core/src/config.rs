//! Application configuration management.
//!
//! This module handles loading and saving the configuration: the origin the
//! proxy fronts, the local port, cache naming, the static asset list and the
//! CDN allow-list.
//!
//! Configuration is stored at `~/.config/shellcache/config.json`. A few
//! fields can be overridden from the environment (or a `.env` file loaded
//! by the binary).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shellcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Where the back-office app listens during development.
const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5000";

/// Local port the proxy binds.
const DEFAULT_PORT: u16 = 8080;

const DEFAULT_CACHE_PREFIX: &str = "skanda-billing";
const DEFAULT_CACHE_VERSION: &str = "v1";

/// Parallel fetches while populating the static generation.
/// Small enough to be polite to a single gunicorn worker on a free tier.
const DEFAULT_INSTALL_CONCURRENCY: usize = 6;

/// Icon sizes the PWA manifest references.
const ICON_SIZES: &[u32] = &[72, 96, 128, 144, 152, 192, 384, 512];

fn default_static_assets() -> Vec<String> {
    let mut assets: Vec<String> = [
        "/",
        "/static/css/style.css",
        "/static/js/main.js",
        "/static/manifest.json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assets.extend(
        ICON_SIZES
            .iter()
            .map(|size| format!("/static/icons/icon-{size}x{size}.png")),
    );
    assets.extend(
        [
            "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css",
            "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/js/bootstrap.bundle.min.js",
            "https://cdn.jsdelivr.net/npm/bootstrap-icons@1.10.0/font/bootstrap-icons.css",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    assets
}

fn default_cdn_hosts() -> Vec<String> {
    [
        "cdn.jsdelivr.net",
        "cdnjs.cloudflare.com",
        "fonts.googleapis.com",
        "fonts.gstatic.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub origin: String,
    pub port: u16,
    pub cache_prefix: String,
    pub cache_version: String,
    pub static_assets: Vec<String>,
    pub cdn_hosts: Vec<String>,
    pub cache_dir: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    pub install_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            port: DEFAULT_PORT,
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            static_assets: default_static_assets(),
            cdn_hosts: default_cdn_hosts(),
            cache_dir: None,
            request_timeout_secs: None,
            install_concurrency: DEFAULT_INSTALL_CONCURRENCY,
        }
    }
}

impl Config {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `SHELLCACHE_*` overrides. `lookup` is the environment in
    /// production and a map in tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(origin) = lookup("SHELLCACHE_ORIGIN") {
            self.origin = origin;
        }
        if let Some(port) = lookup("SHELLCACHE_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("SHELLCACHE_PORT is not a valid port: {port}"))?;
        }
        if let Some(version) = lookup("SHELLCACHE_VERSION") {
            self.cache_version = version;
        }
        if let Some(dir) = lookup("SHELLCACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
