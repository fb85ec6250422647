mod client;
mod fetcher;
mod rate_limit;

pub use client::{Downloader, StagedArtifact};
pub use fetcher::{Fetcher, RetryPolicy};
pub use rate_limit::{RateLimiter, DEFAULT_REQUESTS_PER_SECOND};
