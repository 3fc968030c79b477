use analysis_core::{
    canonicalize_bars, AnalysisError, ErrorKind, HistoryProvider, Interval, ProcessedTicker, RunReport,
    TickerHistory,
};
use chrono::{NaiveDate, Utc};
use history_store::{equal_weights, RecordBackend, ReconciliationStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use technical_analysis::IndicatorEngine;

use crate::forecast::ForecastEngine;

/// Trim, uppercase and dedupe, keeping first-seen order.
pub fn normalize_tickers(tickers: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tickers.len());
    for t in tickers {
        let t = t.trim().to_ascii_uppercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

/// Sequential control loop over one ticker batch.
///
/// Per-ticker failures are recorded in the [`RunReport`] and never stop the
/// batch. Only an empty ticker set or an unreachable store abort the run.
pub struct PipelineRunner<B: RecordBackend> {
    history: Arc<dyn HistoryProvider>,
    indicators: IndicatorEngine,
    forecaster: ForecastEngine,
    store: ReconciliationStore<B>,
    period_days: i64,
    interval: Interval,
    abort: Arc<AtomicBool>,
}

impl<B: RecordBackend> PipelineRunner<B> {
    pub fn new(
        history: Arc<dyn HistoryProvider>,
        indicators: IndicatorEngine,
        forecaster: ForecastEngine,
        store: ReconciliationStore<B>,
    ) -> Self {
        Self {
            history,
            indicators,
            forecaster,
            store,
            period_days: 90,
            interval: Interval::Day1,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_history_window(mut self, period_days: i64, interval: Interval) -> Self {
        self.period_days = period_days;
        self.interval = interval;
        self
    }

    pub fn with_abort_flag(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Setting the flag stops the run before the next ticker.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn store(&self) -> &ReconciliationStore<B> {
        &self.store
    }

    /// The configured list, or the tickers already recorded when it is empty.
    pub async fn resolve_tickers(&self, configured: &[String]) -> Result<Vec<String>, AnalysisError> {
        let configured = normalize_tickers(configured);
        if !configured.is_empty() {
            return Ok(configured);
        }
        let stored = self.store.tickers().await?;
        tracing::info!("No watchlist configured, using {} tickers from the store", stored.len());
        Ok(normalize_tickers(&stored))
    }

    pub async fn run(&self, tickers: &[String]) -> Result<RunReport, AnalysisError> {
        self.run_on(Utc::now().date_naive(), tickers).await
    }

    pub async fn run_on(&self, as_of: NaiveDate, tickers: &[String]) -> Result<RunReport, AnalysisError> {
        let tickers = normalize_tickers(tickers);
        if tickers.is_empty() {
            return Err(AnalysisError::Configuration("no tickers to analyse".to_string()));
        }
        self.store.health_check().await?;

        tracing::info!(
            "Starting run {} over {} tickers ({} indicators, horizon {}, scorer: {})",
            as_of,
            tickers.len(),
            self.indicators.backend().name(),
            self.forecaster.horizon(),
            self.forecaster.scorer_backend().unwrap_or("none, fallback only")
        );

        let mut history: Result<HashMap<String, TickerHistory>, String> = self
            .history
            .fetch_history(&tickers, self.period_days, self.interval)
            .await
            .map_err(|e| {
                tracing::warn!("Batch history fetch failed: {}", e);
                e.to_string()
            });

        let mut report = RunReport::new(as_of);
        let total = tickers.len();

        for (idx, ticker) in tickers.iter().enumerate() {
            if self.abort.load(Ordering::SeqCst) {
                report.cancelled = true;
                for rest in &tickers[idx..] {
                    report.skip(rest, ErrorKind::Cancelled, AnalysisError::Cancelled.to_string());
                }
                break;
            }

            let series = match &mut history {
                Ok(map) => map.remove(ticker).unwrap_or_else(|| Ok(Vec::new())),
                Err(e) => Err(AnalysisError::ExternalService(format!("history unavailable: {}", e))),
            };

            tracing::info!("({}/{}) analysing {}", idx + 1, total, ticker);
            match self.process_ticker(as_of, ticker, series).await {
                Ok(processed) => {
                    tracing::info!("{} {:?} ({})", ticker, processed.outcome, processed.source);
                    report.processed.push(processed);
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", ticker, e);
                    report.skip(ticker, e.kind(), e.to_string());
                }
            }
        }

        if report.cancelled {
            tracing::warn!("Run cancelled, weight allocations left unchanged");
        } else if let Err(e) = self.store.replace_weights(&equal_weights(&tickers, as_of)).await {
            tracing::error!("Weight replacement failed: {}", e);
            report.errors.push(format!("weight replacement failed: {}", e));
        }

        tracing::info!(
            "Run {} finished: {} processed, {} skipped",
            as_of,
            report.processed_count(),
            report.skipped_count()
        );
        Ok(report)
    }

    async fn process_ticker(
        &self,
        as_of: NaiveDate,
        ticker: &str,
        series: TickerHistory,
    ) -> Result<ProcessedTicker, AnalysisError> {
        // a failed fetch keeps its own reason instead of reading as missing data
        let bars = canonicalize_bars(series?);

        let Some(last) = bars.last() else {
            return Err(AnalysisError::InsufficientHistory {
                required: self.indicators.min_history(),
                available: 0,
            });
        };
        let current_price = last.close;
        let features = self.indicators.compute(&bars)?;

        let prior = match self.store.latest_before(ticker, as_of).await {
            Ok(prior) => prior,
            Err(e) => {
                tracing::warn!("Prior record lookup failed for {}, continuing without: {}", ticker, e);
                None
            }
        };

        let result = self
            .forecaster
            .forecast(as_of, ticker, current_price, &features, prior.as_ref())
            .await;
        let source = result.source;
        let outcome = self.store.upsert(&result.into_record()).await?;

        Ok(ProcessedTicker {
            ticker: ticker.to_string(),
            source,
            outcome,
        })
    }
}
