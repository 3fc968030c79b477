use analysis_core::Interval;
use analysis_orchestrator::MAX_HORIZON;
use anyhow::{bail, Context, Result};
use ml_client::{CallPolicy, Pacing, ScorerConfig};
use std::env;
use std::time::Duration;
use technical_analysis::BackendPreference;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    // Batch
    pub watchlist: Vec<String>,            // empty: tickers already in the store
    pub forecast_horizon: usize,           // 5 predicted prices
    pub history_period_days: i64,          // 90 (~3 months)
    pub history_interval: Interval,        // day

    // Market data
    pub polygon_api_key: String,
    pub polygon_rate_limit: usize,         // requests per minute (free tier: 5)
    pub enable_news: bool,

    // Scorer
    pub scorer_base_url: String,
    pub scorer_model: String,
    pub scorer_api_key: Option<String>,    // unset: fallback only
    pub scorer_timeout_secs: u64,

    // Call pacing
    pub call_batch_size: usize,            // cool down after every 3 calls
    pub call_cooldown_secs: u64,           // 21
    pub call_delay_ms: Option<u64>,        // set: fixed delay instead of cooldown
    pub call_max_attempts: u32,
    pub call_retry_backoff_ms: u64,

    pub indicator_backend: BackendPreference,

    // Database
    pub database_url: String,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            watchlist: or("WATCHLIST", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            forecast_horizon: or("FORECAST_HORIZON", "5")
                .parse()
                .context("FORECAST_HORIZON must be a positive integer")?,
            history_period_days: or("HISTORY_PERIOD_DAYS", "90")
                .parse()
                .context("HISTORY_PERIOD_DAYS must be an integer")?,
            history_interval: or("HISTORY_INTERVAL", "day")
                .parse::<Interval>()
                .map_err(anyhow::Error::msg)?,

            polygon_api_key: var("POLYGON_API_KEY")
                .context("POLYGON_API_KEY not set")?,
            polygon_rate_limit: or("POLYGON_RATE_LIMIT", "5")
                .parse()
                .context("POLYGON_RATE_LIMIT must be an integer")?,
            enable_news: or("ENABLE_NEWS", "true")
                .parse()
                .context("ENABLE_NEWS must be true or false")?,

            scorer_base_url: or("SCORER_BASE_URL", "https://api.openai.com/v1"),
            scorer_model: or("SCORER_MODEL", "gpt-4o"),
            scorer_api_key: var("SCORER_API_KEY").filter(|k| !k.trim().is_empty()),
            scorer_timeout_secs: or("SCORER_TIMEOUT_SECS", "60")
                .parse()
                .context("SCORER_TIMEOUT_SECS must be an integer")?,

            call_batch_size: or("CALL_BATCH_SIZE", "3")
                .parse()
                .context("CALL_BATCH_SIZE must be an integer")?,
            call_cooldown_secs: or("CALL_COOLDOWN_SECS", "21")
                .parse()
                .context("CALL_COOLDOWN_SECS must be an integer")?,
            call_delay_ms: var("CALL_DELAY_MS")
                .map(|v| v.parse::<u64>())
                .transpose()
                .context("CALL_DELAY_MS must be an integer")?,
            call_max_attempts: or("CALL_MAX_ATTEMPTS", "1")
                .parse()
                .context("CALL_MAX_ATTEMPTS must be an integer")?,
            call_retry_backoff_ms: or("CALL_RETRY_BACKOFF_MS", "1000")
                .parse()
                .context("CALL_RETRY_BACKOFF_MS must be an integer")?,

            indicator_backend: or("INDICATOR_BACKEND", "auto")
                .parse::<BackendPreference>()
                .map_err(anyhow::Error::msg)?,

            database_url: or("DATABASE_URL", "sqlite:forecasts.db"),
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.forecast_horizon == 0 || self.forecast_horizon > MAX_HORIZON {
            bail!("FORECAST_HORIZON must be between 1 and {}", MAX_HORIZON);
        }
        if self.history_period_days <= 0 {
            bail!("HISTORY_PERIOD_DAYS must be positive");
        }
        if self.call_batch_size == 0 {
            bail!("CALL_BATCH_SIZE must be at least 1");
        }
        if self.call_max_attempts == 0 {
            bail!("CALL_MAX_ATTEMPTS must be at least 1");
        }
        if self.polygon_rate_limit == 0 {
            bail!("POLYGON_RATE_LIMIT must be at least 1");
        }
        if self.polygon_api_key.trim().is_empty() {
            bail!("POLYGON_API_KEY is empty");
        }
        Ok(())
    }

    pub fn call_policy(&self) -> CallPolicy {
        let pacing = match self.call_delay_ms {
            Some(0) => Pacing::None,
            Some(ms) => Pacing::FixedDelay(Duration::from_millis(ms)),
            None => Pacing::Cooldown {
                every: self.call_batch_size,
                pause: Duration::from_secs(self.call_cooldown_secs),
            },
        };

        CallPolicy {
            pacing,
            max_attempts: self.call_max_attempts,
            retry_backoff: Duration::from_millis(self.call_retry_backoff_ms),
            call_timeout: Duration::from_secs(self.scorer_timeout_secs),
        }
    }

    /// `None` when no scorer key is configured.
    pub fn scorer_config(&self) -> Option<ScorerConfig> {
        let api_key = self.scorer_api_key.clone()?;
        Some(ScorerConfig {
            base_url: self.scorer_base_url.clone(),
            model: self.scorer_model.clone(),
            api_key,
            timeout: Duration::from_secs(self.scorer_timeout_secs),
        })
    }
}
