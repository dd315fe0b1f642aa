//! Core library for shellcache.
//!
//! shellcache keeps the app shell of the Skanda back-office usable when the
//! origin server or the network is unavailable. It mirrors the lifecycle of a
//! browser offline worker:
//!
//! - **install**: pre-populate the static generation from the asset list
//! - **activate**: prune stale generations and take control of clients
//! - **fetch**: classify each request and serve it cache-first or
//!   network-first, degrading to synthesized offline responses
//!
//! The [`worker::CacheWorker`] ties these together over a [`cache::CacheStorage`]
//! and any [`net::Fetcher`].

pub mod cache;
pub mod config;
pub mod deploy;
pub mod net;
pub mod worker;

pub use cache::{CacheStorage, GenerationKind, GenerationManifest};
pub use config::Config;
pub use net::{FetchError, Fetcher, HttpFetcher, Request, RequestMode, Response, ResponseType};
pub use worker::{CacheWorker, FetchOutcome, WorkerPhase, WorkerSettings};
