//! Remote fetcher seam.

use async_trait::async_trait;

use crate::{Error, RawForecastItem};

/// Source of daily forecasts for a place.
///
/// One call performs one remote request for `count` days. Implementations
/// report failures as `Error::Transport` or `Error::RemoteApi`.
#[async_trait]
pub trait ForecastFetcher: Send + Sync {
    async fn fetch(&self, place: &str, count: i64) -> Result<Vec<RawForecastItem>, Error>;
}
