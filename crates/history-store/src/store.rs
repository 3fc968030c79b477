use analysis_core::{AnalysisError, HistoryRecord, UpsertOutcome, WeightRecord};
use chrono::NaiveDate;

use crate::backend::RecordBackend;

pub const EQUAL_WEIGHT_NOTE: &str = "equal weight";

/// Keyed record store with idempotent upsert and full-replace allocations.
pub struct ReconciliationStore<B: RecordBackend> {
    backend: B,
}

impl<B: RecordBackend> ReconciliationStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Look the key up first, then overwrite in place or append.
    pub async fn upsert(&self, record: &HistoryRecord) -> Result<UpsertOutcome, AnalysisError> {
        let existing = self
            .backend
            .find_history(record.date, &record.ticker)
            .await
            .map_err(|e| AnalysisError::Persistence(format!("lookup failed for {}: {}", record.ticker, e)))?;

        if existing.is_some() {
            self.backend.update_history(record).await?;
            tracing::debug!("Updated {} on {}", record.ticker, record.date);
            Ok(UpsertOutcome::Updated)
        } else {
            self.backend.append_history(record).await?;
            tracing::debug!("Appended {} on {}", record.ticker, record.date);
            Ok(UpsertOutcome::Inserted)
        }
    }

    pub async fn history_for(&self, ticker: &str) -> Result<Vec<HistoryRecord>, AnalysisError> {
        Ok(self.backend.history_for(ticker).await?)
    }

    /// Most recent record strictly before `date`.
    pub async fn latest_before(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<HistoryRecord>, AnalysisError> {
        let rows = self.backend.history_for(ticker).await?;
        Ok(rows.into_iter().filter(|r| r.date < date).last())
    }

    pub async fn replace_weights(&self, weights: &[WeightRecord]) -> Result<(), AnalysisError> {
        self.backend.replace_weights(weights).await?;
        tracing::info!("Replaced weight allocations with {} rows", weights.len());
        Ok(())
    }

    pub async fn weights(&self) -> Result<Vec<WeightRecord>, AnalysisError> {
        Ok(self.backend.weights().await?)
    }

    pub async fn tickers(&self) -> Result<Vec<String>, AnalysisError> {
        Ok(self.backend.tickers().await?)
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        Ok(self.backend.health_check().await?)
    }
}

/// `100 / n` percent for each distinct ticker.
pub fn equal_weights(tickers: &[String], as_of: NaiveDate) -> Vec<WeightRecord> {
    let mut unique: Vec<&String> = Vec::with_capacity(tickers.len());
    for t in tickers {
        if !unique.contains(&t) {
            unique.push(t);
        }
    }
    if unique.is_empty() {
        return Vec::new();
    }

    let weight = 100.0 / unique.len() as f64;
    unique
        .into_iter()
        .map(|t| WeightRecord {
            ticker: t.clone(),
            weight_percent: weight,
            as_of,
            note: EQUAL_WEIGHT_NOTE.to_string(),
        })
        .collect()
}
