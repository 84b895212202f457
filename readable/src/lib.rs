//! Turning a submitted link into readable article text.
//!
//! Two halves, matching the two phases of ingestion: [`fetch`] performs a
//! bounded HTTP GET and classifies every failure as retryable or terminal,
//! and [`extract`] reduces the fetched HTML to plain readable text.

mod fetch;

pub mod extract;

pub use fetch::{FetchConfig, FetchResult, Fetcher, HttpFetcher, short_detail};
