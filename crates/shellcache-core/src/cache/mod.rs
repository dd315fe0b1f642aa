//! Local cache storage for offline access.
//!
//! This module provides the `CacheStorage` holding named cache generations
//! and the `GenerationManifest` that records which generations are current.
//! Each generation is persisted as one JSON file; the manifest sits next to
//! them.
//!
//! Generations in use:
//! - `<prefix>-static-<version>`: app shell, populated at install
//! - `<prefix>-dynamic-<version>`: populated as responses are observed
//! - older versions, kept only until the next activation

pub mod manifest;
pub mod storage;

pub use manifest::{GenerationKind, GenerationManifest, GenerationRecord};
pub use storage::{CacheStorage, CachedData, GenerationSummary, StorageError};
