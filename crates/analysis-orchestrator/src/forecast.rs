use analysis_core::{
    AnalysisError, FeatureSet, ForecastResult, HistoryRecord, NewsProvider, SourceTag, TrendLabel, NO_NEWS_SENTINEL,
};
use chrono::NaiveDate;
use ml_client::CallOrchestrator;
use std::fmt::Write;
use std::sync::Arc;

use crate::response::parse_scorer_reply;

pub const FALLBACK_PREFIX: &str = "[fallback]";
/// Longest supported path; the bearish fallback stays well above zero up to here.
pub const MAX_HORIZON: usize = 30;
const BULLISH_SCORE: f64 = 5.0;
const BEARISH_SCORE: f64 = -2.0;
/// Per-step drift factor applied to the fallback score.
const FALLBACK_STEP: f64 = 0.001;

/// Produces an N-step path, a score and a rationale for one ticker.
///
/// With a scorer attached the reply is parsed strictly; any failure on that
/// path (orchestrator error, malformed reply) degrades to the deterministic
/// trend rule. Without a scorer every forecast is the fallback.
pub struct ForecastEngine {
    horizon: usize,
    orchestrator: Option<CallOrchestrator>,
    news: Option<Arc<dyn NewsProvider>>,
}

impl ForecastEngine {
    pub fn new(horizon: usize) -> Self {
        Self {
            horizon: horizon.clamp(1, MAX_HORIZON),
            orchestrator: None,
            news: None,
        }
    }

    pub fn with_scorer(mut self, orchestrator: CallOrchestrator) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_news(mut self, news: Arc<dyn NewsProvider>) -> Self {
        self.news = Some(news);
        self
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Name of the attached scorer backend, `None` when running fallback-only.
    pub fn scorer_backend(&self) -> Option<&'static str> {
        self.orchestrator.as_ref().map(CallOrchestrator::backend_name)
    }

    pub async fn forecast(
        &self,
        as_of: NaiveDate,
        ticker: &str,
        current_price: f64,
        features: &FeatureSet,
        prior: Option<&HistoryRecord>,
    ) -> ForecastResult {
        let Some(orchestrator) = &self.orchestrator else {
            return self.fallback(as_of, ticker, current_price, features);
        };

        let headlines = match &self.news {
            Some(news) => news.fetch_headlines_or_sentinel(ticker).await,
            None => NO_NEWS_SENTINEL.to_string(),
        };
        let prompt = self.build_prompt(ticker, current_price, features, &headlines, prior);

        let reply = match orchestrator.invoke(&prompt).await {
            Ok(raw) => parse_scorer_reply(&raw, self.horizon).map_err(AnalysisError::from),
            Err(e) => Err(e),
        };

        match reply {
            Ok(reply) => ForecastResult {
                date: as_of,
                ticker: ticker.to_string(),
                current_price,
                feature_summary: features.digest(),
                price_path: reply.price_path,
                sentiment_score: reply.score,
                rationale: reply.rationale,
                source: SourceTag::Model,
            },
            Err(e) => {
                tracing::warn!("Scorer unusable for {}, using fallback: {}", ticker, e);
                self.fallback(as_of, ticker, current_price, features)
            }
        }
    }

    /// Deterministic trend rule used whenever the scorer cannot be used.
    pub fn fallback(
        &self,
        as_of: NaiveDate,
        ticker: &str,
        current_price: f64,
        features: &FeatureSet,
    ) -> ForecastResult {
        let trend = features.trend_label();
        let (score, price_path) = fallback_path(current_price, trend, self.horizon);

        ForecastResult {
            date: as_of,
            ticker: ticker.to_string(),
            current_price,
            feature_summary: features.digest(),
            price_path,
            sentiment_score: score,
            rationale: format!("{} quantitative {} trend", FALLBACK_PREFIX, trend),
            source: SourceTag::Fallback,
        }
    }

    pub fn build_prompt(
        &self,
        ticker: &str,
        current_price: f64,
        features: &FeatureSet,
        headlines: &str,
        prior: Option<&HistoryRecord>,
    ) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Analyse stock {}, current price {:.2}.", ticker, current_price);
        let _ = writeln!(prompt, "Technical indicators: {}", features.digest());
        let _ = writeln!(prompt, "Recent headlines: {}", headlines);

        if let Some(prior) = prior {
            let path = prior
                .price_path
                .iter()
                .map(|p| format!("{:.2}", p))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                prompt,
                "Your previous forecast on {} (price then {:.2}): score {}, predicted path [{}]. \
                 Reconcile it with the realised price {:.2} and correct your view.",
                prior.date, prior.current_price, prior.sentiment_score, path, current_price
            );
        }

        let _ = write!(
            prompt,
            "Reply with one line: score,price1,...,price{n},summary. \
             The score is a sentiment from -5 to 5, the {n} prices are the next {n} sessions, \
             and the summary must not contain commas.",
            n = self.horizon
        );
        prompt
    }
}

/// `+5` when bullish, `-2` otherwise; `price[i] = current * (1 + score * 0.001 * i)`.
pub fn fallback_path(current_price: f64, trend: TrendLabel, horizon: usize) -> (f64, Vec<f64>) {
    let score = match trend {
        TrendLabel::Bullish => BULLISH_SCORE,
        TrendLabel::Bearish => BEARISH_SCORE,
    };
    let path = (1..=horizon)
        .map(|i| current_price * (1.0 + score * FALLBACK_STEP * i as f64))
        .collect();
    (score, path)
}
