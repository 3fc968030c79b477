use async_trait::async_trait;
use std::collections::HashMap;

use crate::{AnalysisError, Interval, PriceBar};

/// Text returned by [`NewsProvider::fetch_headlines_or_sentinel`] when no
/// headlines could be obtained.
pub const NO_NEWS_SENTINEL: &str = "no news";

/// Outcome of fetching one ticker inside a batch.
pub type TickerHistory = Result<Vec<PriceBar>, AnalysisError>;

/// Batched source of historical bars.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Fetch bars for every ticker.
    ///
    /// A ticker without data maps to `Ok` with an empty series; a ticker whose
    /// request failed maps to `Err`, so callers can tell the two apart. The
    /// outer `Err` is reserved for a failure of the whole batch.
    async fn fetch_history(
        &self,
        tickers: &[String],
        period_days: i64,
        interval: Interval,
    ) -> Result<HashMap<String, TickerHistory>, AnalysisError>;
}

/// Hosted inference endpoint: prompt in, free text out.
#[async_trait]
pub trait ScorerProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError>;

    fn backend_name(&self) -> &'static str;
}

/// Optional headline enrichment.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn fetch_headlines(&self, ticker: &str) -> Result<String, AnalysisError>;

    /// Never fails: any error or an empty result degrades to [`NO_NEWS_SENTINEL`].
    async fn fetch_headlines_or_sentinel(&self, ticker: &str) -> String {
        match self.fetch_headlines(ticker).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => NO_NEWS_SENTINEL.to_string(),
            Err(e) => {
                tracing::debug!("Headlines for {} unavailable: {}", ticker, e);
                NO_NEWS_SENTINEL.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyNews {
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl NewsProvider for FlakyNews {
        async fn fetch_headlines(&self, _ticker: &str) -> Result<String, AnalysisError> {
            self.reply
                .map(str::to_string)
                .ok_or_else(|| AnalysisError::NewsUnavailable("timeout".into()))
        }
    }

    #[tokio::test]
    async fn test_sentinel_on_failure_and_empty() {
        let failing = FlakyNews { reply: None };
        assert_eq!(failing.fetch_headlines_or_sentinel("AAPL").await, NO_NEWS_SENTINEL);

        let empty = FlakyNews { reply: Some("  ") };
        assert_eq!(empty.fetch_headlines_or_sentinel("AAPL").await, NO_NEWS_SENTINEL);

        let ok = FlakyNews { reply: Some("Apple beats estimates") };
        assert_eq!(ok.fetch_headlines_or_sentinel("AAPL").await, "Apple beats estimates");
    }
}
