//! Network layer: the request/response model shared by the cache and the
//! worker, and the `Fetcher` seam used to reach the origin.
//!
//! `HttpFetcher` is the production implementation on top of reqwest. Tests
//! substitute scripted fetchers so the retrieval strategies can be exercised
//! without a live origin.

pub mod error;
pub mod fetcher;
pub mod request;

pub use error::FetchError;
pub use fetcher::{Fetcher, HttpFetcher};
pub use request::{Request, RequestMode, Response, ResponseType};
