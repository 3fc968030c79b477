use analysis_core::{
    canonicalize_bars, AnalysisError, HistoryProvider, Interval, NewsProvider, PriceBar, TickerHistory,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";

/// Headlines joined into the prompt per ticker.
const HEADLINE_LIMIT: u32 = 5;

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            // Remove timestamps outside the window
            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            // Need to wait until the oldest request falls out of the window
            let Some(&oldest) = ts.front() else { continue };
            let sleep_dur = (oldest + self.window).duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for Polygon API slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Polygon REST adapter for bar history and news headlines.
#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl PolygonClient {
    /// `rate_limit` is requests per minute (free tier: 5).
    pub fn new(api_key: String, rate_limit: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, AnalysisError> {
        let request = builder.build().map_err(|e| AnalysisError::ExternalService(e.to_string()))?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let req_clone = request.try_clone()
                .ok_or_else(|| AnalysisError::ExternalService("Cannot clone request".to_string()))?;
            let response = self.client.execute(req_clone).await
                .map_err(|e| AnalysisError::ExternalService(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!("Polygon 429 rate limited, waiting {}s before retry {}/3", wait_secs, attempt + 1);
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(AnalysisError::ExternalService("Rate limited by Polygon after 3 retries".to_string()))
    }

    /// Get aggregates (bars) for a symbol, canonicalized ascending by date.
    pub async fn get_aggregates(
        &self,
        symbol: &str,
        interval: Interval,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, AnalysisError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/{}/{}/{}",
            self.base_url,
            symbol,
            interval.timespan(),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self.send_request(
            self.client.get(&url).query(&[("apiKey", self.api_key.as_str()), ("adjusted", "true"), ("sort", "asc")])
        ).await?;

        if !response.status().is_success() {
            return Err(AnalysisError::ExternalService(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let agg_response: AggregateResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ExternalService(e.to_string()))?;

        Ok(aggregates_to_bars(agg_response.results))
    }

    /// Get recent news titles for a symbol
    pub async fn get_news_titles(&self, symbol: &str, limit: u32) -> Result<Vec<String>, AnalysisError> {
        let url = format!("{}/v2/reference/news", self.base_url);
        let query = [
            ("apiKey", self.api_key.clone()),
            ("limit", limit.to_string()),
            ("ticker", symbol.to_string()),
            ("order", "desc".to_string()),
        ];

        let response = self
            .send_request(self.client.get(&url).query(&query))
            .await
            .map_err(|e| AnalysisError::NewsUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AnalysisError::NewsUnavailable(format!("HTTP {}", response.status())));
        }

        let news_response: NewsResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::NewsUnavailable(e.to_string()))?;

        Ok(news_response.results.into_iter().map(|r| r.title).collect())
    }
}

#[async_trait]
impl HistoryProvider for PolygonClient {
    async fn fetch_history(
        &self,
        tickers: &[String],
        period_days: i64,
        interval: Interval,
    ) -> Result<HashMap<String, TickerHistory>, AnalysisError> {
        let to = Utc::now().date_naive();
        let from = to - ChronoDuration::days(period_days.max(1));

        let mut out = HashMap::with_capacity(tickers.len());
        for ticker in tickers {
            // one failed ticker must not sink the batch
            let series = self.get_aggregates(ticker, interval, from, to).await;
            match &series {
                Ok(bars) => tracing::debug!("Fetched {} bars for {}", bars.len(), ticker),
                Err(e) => tracing::warn!("History fetch failed for {}: {}", ticker, e),
            }
            out.insert(ticker.clone(), series);
        }
        Ok(out)
    }
}

#[async_trait]
impl NewsProvider for PolygonClient {
    async fn fetch_headlines(&self, ticker: &str) -> Result<String, AnalysisError> {
        let titles = self.get_news_titles(ticker, HEADLINE_LIMIT).await?;
        Ok(join_headlines(&titles))
    }
}

fn aggregates_to_bars(results: Vec<AggregateResult>) -> Vec<PriceBar> {
    let bars = results
        .into_iter()
        .filter_map(|r| {
            let date = DateTime::from_timestamp_millis(r.t)?.date_naive();
            Some(PriceBar {
                date,
                open: r.o,
                high: r.h,
                low: r.l,
                close: r.c,
                volume: r.v,
            })
        })
        .collect();
    canonicalize_bars(bars)
}

fn join_headlines(titles: &[String]) -> String {
    titles
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

// Response structures
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    #[serde(default)]
    v: f64, // volume
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    results: Vec<NewsResult>,
}

#[derive(Debug, Deserialize)]
struct NewsResult {
    title: String,
}
