use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::manifest::{GenerationKind, GenerationManifest};
use crate::net::{Request, Response};

/// Directory holding one subdirectory per generation, one file per entry
const GENERATIONS_DIR: &str = "generations";

/// Manifest file name in the storage root
const MANIFEST_FILE: &str = "manifest.json";

/// Response headers dropped before a response is stored.
/// A cookie set for one user must never be replayed to another.
const UNCACHEABLE_HEADERS: &[&str] = &["set-cookie", "set-cookie2"];

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {0}: {1}")]
    Serialize(String, #[source] serde_json::Error),

    #[error("Invalid generation name: {0:?}")]
    InvalidName(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// On-disk form of one cache entry.
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    entry: CachedData<Response>,
}

type Generation = BTreeMap<String, CachedData<Response>>;

/// Per-generation view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub name: String,
    pub kind: Option<GenerationKind>,
    pub current: bool,
    pub entries: usize,
    pub last_updated: String,
}

#[derive(Default)]
struct StorageState {
    generations: BTreeMap<String, Generation>,
    manifest: GenerationManifest,
}

/// Named cache generations, persisted under a root directory.
///
/// Lookups are served from memory. Every change is written to disk first
/// (one small file per entry) and applied to memory afterwards, so `state`
/// is never held across file I/O. Writers queue on `writer` so memory and
/// disk see changes in the same order.
pub struct CacheStorage {
    root: PathBuf,
    state: RwLock<StorageState>,
    writer: Mutex<()>,
}

impl CacheStorage {
    /// Open (or create) storage under `root`, loading everything on disk.
    /// Unreadable files are logged and skipped.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        let generations_dir = root.join(GENERATIONS_DIR);
        std::fs::create_dir_all(&generations_dir).map_err(|source| StorageError::Io {
            path: generations_dir.clone(),
            source,
        })?;

        let manifest = load_json::<GenerationManifest>(&root.join(MANIFEST_FILE)).unwrap_or_default();

        let mut generations = BTreeMap::new();
        let entries = std::fs::read_dir(&generations_dir).map_err(|source| StorageError::Io {
            path: generations_dir.clone(),
            source,
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_name(name).is_err() {
                continue;
            }
            let generation = load_generation(&path);
            generations.insert(name.to_string(), generation);
        }

        debug!(root = %root.display(), generations = generations.len(), "Opened cache storage");

        Ok(Self {
            root,
            state: RwLock::new(StorageState {
                generations,
                manifest,
            }),
            writer: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> PathBuf {
        self.root.join(GENERATIONS_DIR).join(name)
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Names of all existing generations, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.state.read().await.generations.keys().cloned().collect()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.state.read().await.generations.contains_key(name)
    }

    /// Create an empty generation if it does not exist yet.
    pub async fn open_generation(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;
        let _writer = self.writer.lock().await;
        if self.has(name).await {
            return Ok(());
        }
        create_dir(&self.generation_dir(name)).await?;
        self.state
            .write()
            .await
            .generations
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    /// Store a response for `request`, creating the generation on first write.
    /// Only this one entry is written; cookies are stripped first.
    pub async fn put(&self, name: &str, request: &Request, response: Response) -> Result<(), StorageError> {
        validate_name(name)?;
        let stored = StoredEntry {
            key: request.cache_key(),
            entry: CachedData::new(storable(response)),
        };
        let contents =
            serde_json::to_vec(&stored).map_err(|e| StorageError::Serialize(stored.key.clone(), e))?;

        let _writer = self.writer.lock().await;
        let dir = self.generation_dir(name);
        create_dir(&dir).await?;
        write_atomic(&dir.join(entry_file_name(&stored.key)), &contents).await?;

        debug!(generation = name, key = %stored.key, bytes = contents.len(), "Stored response");
        self.state
            .write()
            .await
            .generations
            .entry(name.to_string())
            .or_default()
            .insert(stored.key, stored.entry);
        Ok(())
    }

    pub async fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
        let state = self.state.read().await;
        state
            .generations
            .get(name)
            .and_then(|g| g.get(&request.cache_key()))
            .map(|cached| cached.data.clone())
    }

    /// Look `request` up in each generation in order, returning the first hit.
    pub async fn match_first(&self, names: &[String], request: &Request) -> Option<Response> {
        let key = request.cache_key();
        let state = self.state.read().await;
        names
            .iter()
            .filter_map(|name| state.generations.get(name))
            .find_map(|g| g.get(&key))
            .map(|cached| cached.data.clone())
    }

    pub async fn entry_count(&self, name: &str) -> usize {
        self.state
            .read()
            .await
            .generations
            .get(name)
            .map(|g| g.len())
            .unwrap_or(0)
    }

    /// Delete a generation and its manifest record. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        validate_name(name)?;
        let _writer = self.writer.lock().await;

        let dir = self.generation_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(StorageError::Io { path: dir, source }),
        }

        let mut manifest = self.manifest().await;
        let recorded = manifest.get(name).is_some();
        if recorded {
            manifest.forget(name);
            write_json(&self.manifest_path(), &manifest).await?;
        }

        let mut state = self.state.write().await;
        if recorded {
            state.manifest = manifest;
        }
        Ok(state.generations.remove(name).is_some())
    }

    pub async fn manifest(&self) -> GenerationManifest {
        self.state.read().await.manifest.clone()
    }

    /// Apply a change to the manifest and persist it. Memory only changes
    /// once the file is written.
    pub async fn update_manifest<R>(
        &self,
        f: impl FnOnce(&mut GenerationManifest) -> R,
    ) -> Result<R, StorageError> {
        let _writer = self.writer.lock().await;
        let mut manifest = self.manifest().await;
        let result = f(&mut manifest);
        write_json(&self.manifest_path(), &manifest).await?;
        self.state.write().await.manifest = manifest;
        Ok(result)
    }

    pub async fn summaries(&self) -> Vec<GenerationSummary> {
        let state = self.state.read().await;
        state
            .generations
            .iter()
            .map(|(name, generation)| {
                let record = state.manifest.get(name);
                GenerationSummary {
                    name: name.clone(),
                    kind: record.map(|r| r.kind),
                    current: record.map(|r| r.current).unwrap_or(false),
                    entries: generation.len(),
                    last_updated: generation
                        .values()
                        .max_by_key(|cached| cached.cached_at)
                        .map(|newest| newest.age_display())
                        .unwrap_or_else(|| "never".to_string()),
                }
            })
            .collect()
    }
}

fn storable(mut response: Response) -> Response {
    response
        .headers
        .retain(|(name, _)| !UNCACHEABLE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)));
    response
}

/// SHA256 of the cache key, for stable fixed-length file names.
fn entry_file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{}.json", hex::encode(hasher.finalize()))
}

fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

fn load_generation(dir: &Path) -> Generation {
    let mut generation = Generation::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to read cache generation");
            return generation;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stored) = load_json::<StoredEntry>(&path) {
            generation.insert(stored.key, stored.entry);
        }
    }
    generation
}

/// Helper to load a JSON file and log errors without failing
fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read cache file");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse cache file, ignoring it");
            None
        }
    }
}

async fn create_dir(path: &Path) -> Result<(), StorageError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let contents = serde_json::to_vec_pretty(value)
        .map_err(|e| StorageError::Serialize(path.display().to_string(), e))?;
    write_atomic(path, &contents).await
}

/// Write via a temporary file so a crash never leaves a half-written file.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use url::Url;

    fn request(path: &str) -> Request {
        let url = Url::parse("http://127.0.0.1:5000")
            .and_then(|base| base.join(path))
            .expect("test url");
        Request::get(url)
    }

    fn entry_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).expect("read generation dir").count()
    }

    #[test]
    fn test_cached_data_age_display_just_now() {
        let cached = CachedData::new(vec![1, 2, 3]);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_cached_data_age_display_rounding() {
        let at = |minutes: i64| {
            let mut cached = CachedData::new(());
            cached.cached_at = Utc::now() - Duration::minutes(minutes);
            cached.age_display()
        };
        assert_eq!(at(45), "45m ago");
        assert_eq!(at(61), "1h ago");
        assert_eq!(at(90), "2h ago");
        assert_eq!(at(1440 + 60), "1d ago");
        assert_eq!(at(1440 + 13 * 60), "2d ago");

        let mut future = CachedData::new(());
        future.cached_at = Utc::now() + Duration::minutes(5);
        assert_eq!(future.age_display(), "just now");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("skanda-billing-static-v1").is_ok());
        assert!(validate_name("cache_v1.2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("with space").is_err());
    }

    #[test]
    fn test_entry_file_name_is_stable_and_distinct() {
        let a = entry_file_name("GET http://127.0.0.1:5000/vendors");
        assert_eq!(a, entry_file_name("GET http://127.0.0.1:5000/vendors"));
        assert_ne!(a, entry_file_name("GET http://127.0.0.1:5000/bills"));
        assert_eq!(a.len(), 64 + ".json".len());
    }

    #[tokio::test]
    async fn test_put_creates_generation_on_first_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = CacheStorage::open(dir.path()).expect("open");
        assert!(storage.keys().await.is_empty());

        storage
            .put("app-dynamic-v1", &request("/vendors"), Response::new(200, "vendors"))
            .await
            .expect("put");

        assert_eq!(storage.keys().await, vec!["app-dynamic-v1"]);
        let hit = storage.match_in("app-dynamic-v1", &request("/vendors")).await;
        assert_eq!(hit.map(|r| r.text()), Some("vendors".to_string()));
        assert_eq!(entry_files(&dir.path().join("generations/app-dynamic-v1")), 1);
    }

    #[tokio::test]
    async fn test_each_put_writes_only_its_own_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = CacheStorage::open(dir.path()).expect("open");
        let image = vec![0u8; 200 * 1024];

        for n in 0..20 {
            storage
                .put(
                    "app-dynamic-v1",
                    &request(&format!("/static/uploads/{n}.jpg")),
                    Response::new(200, image.clone()),
                )
                .await
                .expect("put");
        }

        let gen_dir = dir.path().join("generations/app-dynamic-v1");
        assert_eq!(entry_files(&gen_dir), 20);
        for file in std::fs::read_dir(&gen_dir).expect("read dir").flatten() {
            let len = file.metadata().expect("metadata").len();
            // One base64 body plus a little JSON, never the whole generation
            assert!(len < 300 * 1024, "entry file is {len} bytes");
        }

        // Replacing an entry rewrites the same file
        storage
            .put("app-dynamic-v1", &request("/static/uploads/0.jpg"), Response::new(200, "small"))
            .await
            .expect("put");
        assert_eq!(entry_files(&gen_dir), 20);
        assert_eq!(storage.entry_count("app-dynamic-v1").await, 20);
    }

    #[tokio::test]
    async fn test_put_strips_cookies() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = CacheStorage::open(dir.path()).expect("open");
        let response = Response::new(200, "<h1>Vendors</h1>")
            .with_header("content-type", "text/html")
            .with_header("Set-Cookie", "session=abc; HttpOnly")
            .with_header("set-cookie2", "legacy=1");

        storage
            .put("app-dynamic-v1", &request("/vendors"), response)
            .await
            .expect("put");

        for storage in [storage, CacheStorage::open(dir.path()).expect("reopen")] {
            let hit = storage
                .match_in("app-dynamic-v1", &request("/vendors"))
                .await
                .expect("hit");
            assert_eq!(hit.header("set-cookie"), None);
            assert_eq!(hit.header("set-cookie2"), None);
            assert_eq!(hit.content_type(), Some("text/html"));
        }
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = CacheStorage::open(dir.path()).expect("open");
        // A file where the generation directory should be
        std::fs::write(dir.path().join("generations/app-dynamic-v1"), "").expect("write");

        let err = storage
            .put("app-dynamic-v1", &request("/vendors"), Response::new(200, "x"))
            .await
            .expect_err("write fails");
        assert!(matches!(err, StorageError::Io { .. }));
        assert!(!storage.has("app-dynamic-v1").await);
    }

    #[tokio::test]
    async fn test_match_first_uses_generation_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = CacheStorage::open(dir.path()).expect("open");
        let req = request("/static/css/style.css");
        storage.put("a", &req, Response::new(200, "from a")).await.expect("put");
        storage.put("b", &req, Response::new(200, "from b")).await.expect("put");

        let names = vec!["missing".to_string(), "b".to_string(), "a".to_string()];
        let hit = storage.match_first(&names, &req).await.expect("hit");
        assert_eq!(hit.text(), "from b");
        assert!(storage.match_first(&names, &request("/other")).await.is_none());
    }

    #[tokio::test]
    async fn test_storage_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let storage = CacheStorage::open(dir.path()).expect("open");
            storage.put("gen", &request("/"), Response::new(200, "home")).await.expect("put");
            storage.open_generation("empty").await.expect("open generation");
            storage
                .update_manifest(|m| {
                    m.register("gen", GenerationKind::Static, "v1");
                    m.promote("v1");
                })
                .await
                .expect("manifest");
        }

        let reopened = CacheStorage::open(dir.path()).expect("reopen");
        assert_eq!(reopened.entry_count("gen").await, 1);
        assert!(reopened.has("empty").await);
        assert!(reopened.manifest().await.is_current("gen"));
    }

    #[tokio::test]
    async fn test_delete_removes_files_and_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = CacheStorage::open(dir.path()).expect("open");
        storage.put("old", &request("/"), Response::new(200, "x")).await.expect("put");
        storage
            .update_manifest(|m| m.register("old", GenerationKind::Dynamic, "v0"))
            .await
            .expect("manifest");

        assert!(storage.delete("old").await.expect("delete"));
        assert!(!storage.has("old").await);
        assert!(storage.manifest().await.get("old").is_none());
        assert!(!dir.path().join("generations/old").exists());
        assert!(!storage.delete("old").await.expect("delete again"));
    }

    #[tokio::test]
    async fn test_corrupt_entry_file_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let storage = CacheStorage::open(dir.path()).expect("open");
            storage.put("gen", &request("/"), Response::new(200, "home")).await.expect("put");
        }
        std::fs::write(dir.path().join("generations/gen/broken.json"), "{ not json").expect("write");

        let storage = CacheStorage::open(dir.path()).expect("open");
        assert!(storage.has("gen").await);
        assert_eq!(storage.entry_count("gen").await, 1);
    }

    #[tokio::test]
    async fn test_summaries_report_entries_and_currency() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = CacheStorage::open(dir.path()).expect("open");
        storage.open_generation("empty").await.expect("open generation");
        storage.put("full", &request("/"), Response::new(200, "x")).await.expect("put");
        storage
            .update_manifest(|m| {
                m.register("full", GenerationKind::Static, "v1");
                m.promote("v1");
            })
            .await
            .expect("manifest");

        let summaries = storage.summaries().await;
        assert_eq!(summaries.len(), 2);
        let empty = &summaries[0];
        assert_eq!(empty.name, "empty");
        assert_eq!(empty.last_updated, "never");
        assert!(!empty.current);
        let full = &summaries[1];
        assert_eq!(full.entries, 1);
        assert_eq!(full.kind, Some(GenerationKind::Static));
        assert!(full.current);
        assert_eq!(full.last_updated, "just now");
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_on_put() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = CacheStorage::open(dir.path()).expect("open");
        let err = storage
            .put("../x", &request("/"), Response::new(200, ""))
            .await
            .expect_err("invalid name");
        assert!(matches!(err, StorageError::InvalidName(_)));
    }
}
