//! Resource search: pluggable backends fanned out in parallel, results
//! aggregated into one news message.

pub mod aggregator;
pub mod backends;

pub use aggregator::SearchAggregator;

use anyhow::Result;
use async_trait::async_trait;

/// One normalized hit from any backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub image_url: String,
}

/// A search source. Backends are queried in parallel; the configured order
/// decides merge priority.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short label shown in status messages and article titles.
    fn label(&self) -> &'static str;

    /// How many of this backend's results may enter the merged news message.
    fn article_limit(&self) -> usize;

    async fn search(&self, query: &str) -> Result<Vec<SearchResultItem>>;
}

#[cfg(test)]
mod tests;
