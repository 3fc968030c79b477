use analysis_core::{HistoryRecord, WeightRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::db::HistoryDb;
use crate::error::{StoreError, StoreResult};

/// Narrow transport over the record tables.
///
/// Callers go through [`crate::ReconciliationStore`], which owns the
/// lookup-then-write discipline; backends only move rows.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    async fn find_history(&self, date: NaiveDate, ticker: &str) -> StoreResult<Option<HistoryRecord>>;

    /// Overwrite every non-key field of an existing row.
    async fn update_history(&self, record: &HistoryRecord) -> StoreResult<()>;

    async fn append_history(&self, record: &HistoryRecord) -> StoreResult<()>;

    /// All rows for a ticker, ascending by date.
    async fn history_for(&self, ticker: &str) -> StoreResult<Vec<HistoryRecord>>;

    /// Distinct tickers in first-seen order.
    async fn tickers(&self) -> StoreResult<Vec<String>>;

    /// Clear the allocation table and write `weights` as one unit.
    async fn replace_weights(&self, weights: &[WeightRecord]) -> StoreResult<()>;

    async fn weights(&self) -> StoreResult<Vec<WeightRecord>>;

    async fn health_check(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    date: NaiveDate,
    ticker: String,
    current_price: f64,
    feature_summary: String,
    price_path: String,
    sentiment_score: f64,
    rationale: String,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistoryRecord {
            date: row.date,
            ticker: row.ticker,
            current_price: row.current_price,
            feature_summary: row.feature_summary,
            price_path: serde_json::from_str(&row.price_path)?,
            sentiment_score: row.sentiment_score,
            rationale: row.rationale,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WeightRow {
    ticker: String,
    weight_percent: f64,
    as_of: NaiveDate,
    note: String,
}

impl From<WeightRow> for WeightRecord {
    fn from(row: WeightRow) -> Self {
        WeightRecord {
            ticker: row.ticker,
            weight_percent: row.weight_percent,
            as_of: row.as_of,
            note: row.note,
        }
    }
}

const HISTORY_COLUMNS: &str =
    "date, ticker, current_price, feature_summary, price_path, sentiment_score, rationale";

/// SQLite tables `forecast_history` and `weight_allocations`.
#[derive(Clone)]
pub struct SqliteBackend {
    db: HistoryDb,
}

impl SqliteBackend {
    pub fn new(db: HistoryDb) -> Self {
        Self { db }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        Ok(Self::new(HistoryDb::new(database_url).await?))
    }

    /// Get a reference to the database
    pub fn db(&self) -> &HistoryDb {
        &self.db
    }
}

#[async_trait]
impl RecordBackend for SqliteBackend {
    async fn find_history(&self, date: NaiveDate, ticker: &str) -> StoreResult<Option<HistoryRecord>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM forecast_history WHERE date = ? AND ticker = ?"
        ))
        .bind(date)
        .bind(ticker)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(HistoryRecord::try_from).transpose()
    }

    async fn update_history(&self, record: &HistoryRecord) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE forecast_history
            SET current_price = ?, feature_summary = ?, price_path = ?,
                sentiment_score = ?, rationale = ?, updated_at = CURRENT_TIMESTAMP
            WHERE date = ? AND ticker = ?
            "#,
        )
        .bind(record.current_price)
        .bind(&record.feature_summary)
        .bind(serde_json::to_string(&record.price_path)?)
        .bind(record.sentiment_score)
        .bind(&record.rationale)
        .bind(record.date)
        .bind(&record.ticker)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRecord {
                ticker: record.ticker.clone(),
                date: record.date.to_string(),
            });
        }
        Ok(())
    }

    async fn append_history(&self, record: &HistoryRecord) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO forecast_history ({HISTORY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(record.date)
        .bind(&record.ticker)
        .bind(record.current_price)
        .bind(&record.feature_summary)
        .bind(serde_json::to_string(&record.price_path)?)
        .bind(record.sentiment_score)
        .bind(&record.rationale)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn history_for(&self, ticker: &str) -> StoreResult<Vec<HistoryRecord>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM forecast_history WHERE ticker = ? ORDER BY date ASC"
        ))
        .bind(ticker)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(HistoryRecord::try_from).collect()
    }

    async fn tickers(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT ticker FROM forecast_history GROUP BY ticker ORDER BY MIN(id)",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn replace_weights(&self, weights: &[WeightRecord]) -> StoreResult<()> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM weight_allocations")
            .execute(&mut *tx)
            .await?;

        for w in weights {
            sqlx::query(
                "INSERT INTO weight_allocations (ticker, weight_percent, as_of, note) VALUES (?, ?, ?, ?)",
            )
            .bind(&w.ticker)
            .bind(w.weight_percent)
            .bind(w.as_of)
            .bind(&w.note)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn weights(&self) -> StoreResult<Vec<WeightRecord>> {
        let rows = sqlx::query_as::<_, WeightRow>(
            "SELECT ticker, weight_percent, as_of, note FROM weight_allocations ORDER BY ticker",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(WeightRecord::from).collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(self.db.pool()).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[derive(Default)]
struct MemoryTables {
    history: Vec<HistoryRecord>,
    weights: Vec<WeightRecord>,
}

/// In-process tables for tests and dry runs.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<MemoryTables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history_len(&self) -> usize {
        self.tables.read().await.history.len()
    }
}

#[async_trait]
impl RecordBackend for MemoryBackend {
    async fn find_history(&self, date: NaiveDate, ticker: &str) -> StoreResult<Option<HistoryRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.history.iter().find(|r| r.key() == (date, ticker)).cloned())
    }

    async fn update_history(&self, record: &HistoryRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        match tables.history.iter_mut().find(|r| r.key() == record.key()) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::MissingRecord {
                ticker: record.ticker.clone(),
                date: record.date.to_string(),
            }),
        }
    }

    async fn append_history(&self, record: &HistoryRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.history.iter().any(|r| r.key() == record.key()) {
            return Err(StoreError::DuplicateRecord {
                ticker: record.ticker.clone(),
                date: record.date.to_string(),
            });
        }
        tables.history.push(record.clone());
        Ok(())
    }

    async fn history_for(&self, ticker: &str) -> StoreResult<Vec<HistoryRecord>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<HistoryRecord> =
            tables.history.iter().filter(|r| r.ticker == ticker).cloned().collect();
        rows.sort_by_key(|r| r.date);
        Ok(rows)
    }

    async fn tickers(&self) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        let mut seen: Vec<String> = Vec::new();
        for r in &tables.history {
            if !seen.contains(&r.ticker) {
                seen.push(r.ticker.clone());
            }
        }
        Ok(seen)
    }

    async fn replace_weights(&self, weights: &[WeightRecord]) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.weights = weights.to_vec();
        Ok(())
    }

    async fn weights(&self) -> StoreResult<Vec<WeightRecord>> {
        let tables = self.tables.read().await;
        let mut rows = tables.weights.clone();
        rows.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(rows)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
