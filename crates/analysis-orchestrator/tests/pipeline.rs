use analysis_core::{
    AnalysisError, ErrorKind, HistoryProvider, HistoryRecord, Interval, PriceBar, ScorerProvider, SourceTag,
    TickerHistory, UpsertOutcome, WeightRecord,
};
use analysis_orchestrator::{ForecastEngine, PipelineRunner};
use async_trait::async_trait;
use chrono::NaiveDate;
use history_store::{
    MemoryBackend, RecordBackend, ReconciliationStore, StoreError, StoreResult,
};
use ml_client::{CallOrchestrator, CallPolicy, Pacing};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use technical_analysis::{IndicatorBackend, IndicatorEngine};

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

fn bars(closes: &[f64]) -> Vec<PriceBar> {
    let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PriceBar {
            date: start + chrono::Duration::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 10_000.0,
        })
        .collect()
}

fn flat(n: usize, price: f64) -> Vec<PriceBar> {
    bars(&vec![price; n])
}

fn rising(n: usize) -> Vec<PriceBar> {
    bars(&(0..n).map(|i| 50.0 + i as f64).collect::<Vec<_>>())
}

fn tickers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

struct StubHistory {
    series: HashMap<String, Vec<PriceBar>>,
    unreachable: Vec<String>,
    fail: bool,
}

impl StubHistory {
    fn with(series: &[(&str, Vec<PriceBar>)]) -> Arc<Self> {
        Arc::new(Self {
            series: series.iter().map(|(t, b)| (t.to_string(), b.clone())).collect(),
            unreachable: Vec::new(),
            fail: false,
        })
    }

    /// Requests for `unreachable` tickers fail; the rest are served from `series`.
    fn with_unreachable(series: &[(&str, Vec<PriceBar>)], unreachable: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            series: series.iter().map(|(t, b)| (t.to_string(), b.clone())).collect(),
            unreachable: tickers(unreachable),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            series: HashMap::new(),
            unreachable: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl HistoryProvider for StubHistory {
    async fn fetch_history(
        &self,
        tickers: &[String],
        _period_days: i64,
        _interval: Interval,
    ) -> Result<HashMap<String, TickerHistory>, AnalysisError> {
        if self.fail {
            return Err(AnalysisError::ExternalService("feed down".to_string()));
        }
        Ok(tickers
            .iter()
            .map(|t| {
                let series = if self.unreachable.contains(t) {
                    Err(AnalysisError::ExternalService(format!("connection refused for {t}")))
                } else {
                    Ok(self.series.get(t).cloned().unwrap_or_default())
                };
                (t.clone(), series)
            })
            .collect())
    }
}

/// Plays back queued replies, then fails; optionally raises the abort flag on every call.
struct ScriptedScorer {
    replies: Mutex<VecDeque<&'static str>>,
    prompts: Mutex<Vec<String>>,
    abort_on_call: Option<Arc<AtomicBool>>,
}

impl ScriptedScorer {
    fn replying(replies: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().copied().collect()),
            prompts: Mutex::new(Vec::new()),
            abort_on_call: None,
        })
    }

    fn always_failing() -> Arc<Self> {
        Self::replying(&[])
    }
}

#[async_trait]
impl ScorerProvider for ScriptedScorer {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(flag) = &self.abort_on_call {
            flag.store(true, Ordering::SeqCst);
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .map(str::to_string)
            .ok_or_else(|| AnalysisError::ExternalService("503 overloaded".to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

fn forecaster(scorer: Option<Arc<ScriptedScorer>>) -> ForecastEngine {
    let engine = ForecastEngine::new(5);
    match scorer {
        Some(scorer) => engine.with_scorer(CallOrchestrator::new(
            scorer,
            CallPolicy {
                pacing: Pacing::None,
                ..CallPolicy::default()
            },
        )),
        None => engine,
    }
}

fn runner<B: RecordBackend>(
    history: Arc<StubHistory>,
    scorer: Option<Arc<ScriptedScorer>>,
    backend: B,
) -> PipelineRunner<B> {
    PipelineRunner::new(
        history,
        IndicatorEngine::new(IndicatorBackend::ManualFormula),
        forecaster(scorer),
        ReconciliationStore::new(backend),
    )
}

#[tokio::test]
async fn flat_history_runs_on_fallback() {
    let pipeline = runner(StubHistory::with(&[("FLAT", flat(25, 100.0))]), None, MemoryBackend::new());

    let report = pipeline.run_on(as_of(), &tickers(&["flat"])).await.unwrap();

    assert_eq!(report.processed_count(), 1);
    assert_eq!(report.fallback_count(), 1);
    assert_eq!(report.processed[0].outcome, UpsertOutcome::Inserted);

    let rows = pipeline.store().history_for("FLAT").await.unwrap();
    assert_eq!(rows.len(), 1);
    // tie on the moving averages is bearish
    assert_eq!(rows[0].sentiment_score, -2.0);
    assert_eq!(rows[0].price_path.len(), 5);
    assert!(rows[0].price_path.iter().all(|p| *p < 100.0));
    assert!(rows[0].rationale.starts_with("[fallback]"));

    let weights = pipeline.store().weights().await.unwrap();
    assert_eq!(weights.len(), 1);
    assert_eq!(weights[0].weight_percent, 100.0);
}

#[tokio::test]
async fn malformed_reply_falls_back_and_batch_continues() {
    let scorer = ScriptedScorer::replying(&["abc,xyz", "3,71,72,73,74,75,solid uptrend"]);
    let history = StubHistory::with(&[("AAA", rising(30)), ("BBB", rising(30))]);
    let pipeline = runner(history, Some(scorer), MemoryBackend::new());

    let report = pipeline.run_on(as_of(), &tickers(&["AAA", "BBB"])).await.unwrap();

    assert_eq!(report.processed_count(), 2);
    assert_eq!(report.processed[0].source, SourceTag::Fallback);
    assert_eq!(report.processed[1].source, SourceTag::Model);

    let bbb = pipeline.store().history_for("BBB").await.unwrap();
    assert_eq!(bbb[0].price_path, vec![71.0, 72.0, 73.0, 74.0, 75.0]);
    assert_eq!(bbb[0].rationale, "solid uptrend");
}

#[tokio::test]
async fn always_failing_scorer_never_panics() {
    let history = StubHistory::with(&[("UP", rising(40)), ("FLAT", flat(25, 10.0))]);
    let pipeline = runner(history, Some(ScriptedScorer::always_failing()), MemoryBackend::new());

    let report = pipeline.run_on(as_of(), &tickers(&["UP", "FLAT"])).await.unwrap();

    assert_eq!(report.processed_count(), 2);
    assert_eq!(report.fallback_count(), 2);
    let up = pipeline.store().history_for("UP").await.unwrap();
    assert_eq!(up[0].price_path.len(), 5);
    assert!(up[0].price_path.iter().all(|p| *p > up[0].current_price));
}

#[tokio::test]
async fn short_or_missing_history_is_skipped() {
    let history = StubHistory::with(&[("SHORT", flat(19, 5.0)), ("GOOD", flat(20, 5.0))]);
    let pipeline = runner(history, None, MemoryBackend::new());

    let report = pipeline.run_on(as_of(), &tickers(&["SHORT", "NONE", "GOOD"])).await.unwrap();

    assert_eq!(report.processed_count(), 1);
    assert_eq!(report.processed[0].ticker, "GOOD");
    assert_eq!(report.skipped_count(), 2);
    assert!(report.skipped.iter().all(|s| s.kind == ErrorKind::InsufficientHistory));
    assert!(report.to_string().contains("skipped SHORT [insufficient_history]"));

    // every requested ticker counts toward the allocation
    assert_eq!(pipeline.store().weights().await.unwrap().len(), 3);
}

#[tokio::test]
async fn batch_history_failure_skips_everything() {
    let pipeline = runner(StubHistory::failing(), None, MemoryBackend::new());

    let report = pipeline.run_on(as_of(), &tickers(&["AAPL", "MSFT"])).await.unwrap();

    assert_eq!(report.processed_count(), 0);
    assert_eq!(report.skipped_count(), 2);
    assert!(report.skipped.iter().all(|s| s.kind == ErrorKind::ExternalService));
}

#[tokio::test]
async fn unreachable_ticker_is_skipped_as_external_service() {
    let history = StubHistory::with_unreachable(&[("GOOD", rising(30))], &["DOWN"]);
    let pipeline = runner(history, None, MemoryBackend::new());

    let report = pipeline.run_on(as_of(), &tickers(&["DOWN", "NONE", "GOOD"])).await.unwrap();

    assert_eq!(report.processed_count(), 1);
    assert_eq!(report.processed[0].ticker, "GOOD");
    assert_eq!(report.skipped_count(), 2);
    assert_eq!(report.skipped[0].ticker, "DOWN");
    assert_eq!(report.skipped[0].kind, ErrorKind::ExternalService);
    assert!(report.skipped[0].reason.contains("connection refused"));
    // no data at all is still a history shortfall
    assert_eq!(report.skipped[1].ticker, "NONE");
    assert_eq!(report.skipped[1].kind, ErrorKind::InsufficientHistory);
}

#[tokio::test]
async fn empty_ticker_set_is_fatal() {
    let pipeline = runner(StubHistory::with(&[]), None, MemoryBackend::new());

    let err = pipeline.run_on(as_of(), &tickers(&[" ", ""])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.is_fatal());
}

#[tokio::test]
async fn rerun_same_day_updates_in_place() {
    let history = StubHistory::with(&[("AAPL", rising(30))]);
    let pipeline = runner(history, None, MemoryBackend::new());

    pipeline.run_on(as_of(), &tickers(&["AAPL"])).await.unwrap();
    let report = pipeline.run_on(as_of(), &tickers(&["AAPL"])).await.unwrap();

    assert_eq!(report.processed[0].outcome, UpsertOutcome::Updated);
    assert_eq!(pipeline.store().history_for("AAPL").await.unwrap().len(), 1);
}

#[tokio::test]
async fn prior_record_reaches_the_prompt() {
    let scorer = ScriptedScorer::always_failing();
    let history = StubHistory::with(&[("AMD", rising(30))]);
    let pipeline = runner(history, Some(scorer.clone()), MemoryBackend::new());

    let yesterday = as_of().pred_opt().unwrap();
    pipeline.run_on(yesterday, &tickers(&["AMD"])).await.unwrap();
    pipeline.run_on(as_of(), &tickers(&["AMD"])).await.unwrap();

    let prompts = scorer.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("previous forecast"));
    assert!(prompts[1].contains(&format!("previous forecast on {}", yesterday)));
}

#[tokio::test]
async fn cancellation_keeps_finished_work_and_skips_the_rest() {
    let abort = Arc::new(AtomicBool::new(false));
    let scorer = Arc::new(ScriptedScorer {
        replies: Mutex::new(VecDeque::new()),
        prompts: Mutex::new(Vec::new()),
        abort_on_call: Some(abort.clone()),
    });
    let history = StubHistory::with(&[("A", rising(30)), ("B", rising(30)), ("C", rising(30))]);
    let pipeline = runner(history, Some(scorer), MemoryBackend::new()).with_abort_flag(abort);

    let previous = vec![WeightRecord {
        ticker: "OLD".to_string(),
        weight_percent: 100.0,
        as_of: as_of().pred_opt().unwrap(),
        note: "equal weight".to_string(),
    }];
    pipeline.store().replace_weights(&previous).await.unwrap();

    let report = pipeline.run_on(as_of(), &tickers(&["A", "B", "C"])).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.processed_count(), 1);
    assert_eq!(report.processed[0].ticker, "A");
    assert_eq!(report.skipped_count(), 2);
    assert!(report.skipped.iter().all(|s| s.kind == ErrorKind::Cancelled));

    assert_eq!(pipeline.store().history_for("A").await.unwrap().len(), 1);
    assert!(pipeline.store().history_for("B").await.unwrap().is_empty());
    assert_eq!(pipeline.store().weights().await.unwrap(), previous);
}

/// Memory store with switchable faults.
#[derive(Default)]
struct FaultyBackend {
    inner: MemoryBackend,
    broken_lookup: Option<&'static str>,
    unhealthy: bool,
    weights_fail: bool,
}

#[async_trait]
impl RecordBackend for FaultyBackend {
    async fn find_history(&self, date: NaiveDate, ticker: &str) -> StoreResult<Option<HistoryRecord>> {
        if self.broken_lookup == Some(ticker) {
            return Err(StoreError::Unavailable("read quota exceeded".to_string()));
        }
        self.inner.find_history(date, ticker).await
    }
    async fn update_history(&self, record: &HistoryRecord) -> StoreResult<()> {
        self.inner.update_history(record).await
    }
    async fn append_history(&self, record: &HistoryRecord) -> StoreResult<()> {
        self.inner.append_history(record).await
    }
    async fn history_for(&self, ticker: &str) -> StoreResult<Vec<HistoryRecord>> {
        self.inner.history_for(ticker).await
    }
    async fn tickers(&self) -> StoreResult<Vec<String>> {
        self.inner.tickers().await
    }
    async fn replace_weights(&self, weights: &[WeightRecord]) -> StoreResult<()> {
        if self.weights_fail {
            return Err(StoreError::Unavailable("weights table locked".to_string()));
        }
        self.inner.replace_weights(weights).await
    }
    async fn weights(&self) -> StoreResult<Vec<WeightRecord>> {
        self.inner.weights().await
    }
    async fn health_check(&self) -> StoreResult<()> {
        if self.unhealthy {
            return Err(StoreError::Unavailable("store unreachable".to_string()));
        }
        Ok(())
    }
    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

#[tokio::test]
async fn store_lookup_failure_skips_only_that_ticker() {
    let history = StubHistory::with(&[("BAD", rising(30)), ("GOOD", rising(30))]);
    let backend = FaultyBackend {
        broken_lookup: Some("BAD"),
        ..FaultyBackend::default()
    };
    let pipeline = runner(history, None, backend);

    let report = pipeline.run_on(as_of(), &tickers(&["BAD", "GOOD"])).await.unwrap();

    assert_eq!(report.processed_count(), 1);
    assert_eq!(report.processed[0].ticker, "GOOD");
    assert_eq!(report.skipped[0].ticker, "BAD");
    assert_eq!(report.skipped[0].kind, ErrorKind::Persistence);
    assert!(pipeline.store().history_for("BAD").await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_watchlist_falls_back_to_stored_tickers() {
    let history = StubHistory::with(&[("MSFT", rising(30)), ("AAPL", rising(30))]);
    let pipeline = runner(history, None, MemoryBackend::new());
    pipeline.run_on(as_of(), &tickers(&["MSFT", "AAPL"])).await.unwrap();

    assert_eq!(pipeline.resolve_tickers(&[]).await.unwrap(), vec!["MSFT", "AAPL"]);
    assert_eq!(pipeline.resolve_tickers(&tickers(&["tsla"])).await.unwrap(), vec!["TSLA"]);
}

#[tokio::test]
async fn unhealthy_store_aborts_before_any_work() {
    let backend = FaultyBackend {
        unhealthy: true,
        ..FaultyBackend::default()
    };
    let scorer = ScriptedScorer::replying(&["3,71,72,73,74,75,fine"]);
    let pipeline = runner(StubHistory::with(&[("AAPL", rising(30))]), Some(scorer.clone()), backend);

    let err = pipeline.run_on(as_of(), &tickers(&["AAPL"])).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert!(scorer.prompts.lock().unwrap().is_empty());
    assert!(pipeline.store().history_for("AAPL").await.unwrap().is_empty());
}

#[tokio::test]
async fn weight_replacement_failure_is_reported_not_fatal() {
    let backend = FaultyBackend {
        weights_fail: true,
        ..FaultyBackend::default()
    };
    let history = StubHistory::with(&[("AAPL", rising(30)), ("MSFT", rising(30))]);
    let pipeline = runner(history, None, backend);

    let report = pipeline.run_on(as_of(), &tickers(&["AAPL", "MSFT"])).await.unwrap();

    assert_eq!(report.processed_count(), 2);
    assert!(!report.cancelled);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("weight replacement failed"));
    assert_eq!(pipeline.store().history_for("MSFT").await.unwrap().len(), 1);
    assert!(pipeline.store().weights().await.unwrap().is_empty());
}
