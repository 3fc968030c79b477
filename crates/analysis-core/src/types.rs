use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ErrorKind;

/// One session's OHLCV observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

/// Sort ascending by date, keep the last observation for duplicated dates and
/// drop bars with non-finite prices.
pub fn canonicalize_bars(mut bars: Vec<PriceBar>) -> Vec<PriceBar> {
    bars.retain(PriceBar::is_finite);
    // stable sort keeps arrival order among equal dates
    bars.sort_by_key(|b| b.date);

    let mut out: Vec<PriceBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

/// Bar interval requested from the history provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    Hour1,
    Day1,
    Week1,
}

impl Interval {
    /// Polygon aggregate `timespan` segment.
    pub fn timespan(&self) -> &'static str {
        match self {
            Interval::Hour1 => "hour",
            Interval::Day1 => "day",
            Interval::Week1 => "week",
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "1h" | "hour1" => Ok(Interval::Hour1),
            "day" | "1d" | "day1" | "daily" => Ok(Interval::Day1),
            "week" | "1wk" | "week1" | "weekly" => Ok(Interval::Week1),
            other => Err(format!("unknown interval '{}'", other)),
        }
    }
}

/// Two-state trend tag derived from the moving-average comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Bullish,
    Bearish,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::Bullish => "bullish",
            TrendLabel::Bearish => "bearish",
        }
    }
}

impl fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Technical features at the latest bar of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub moving_average_fast: f64,
    pub moving_average_slow: f64,
    pub rsi: f64,
    pub macd_diff: f64,
    pub bollinger_high: f64,
    pub bollinger_low: f64,
    pub stochastic_k: f64,
    pub stochastic_d: f64,
}

impl FeatureSet {
    /// Bullish only when the fast average is strictly above the slow one;
    /// a tie resolves to bearish.
    pub fn trend_label(&self) -> TrendLabel {
        if self.moving_average_fast > self.moving_average_slow {
            TrendLabel::Bullish
        } else {
            TrendLabel::Bearish
        }
    }

    /// Compact single-line digest passed to the scorer and persisted as the
    /// feature summary column.
    pub fn digest(&self) -> String {
        format!(
            "MA5={:.2} MA20={:.2} RSI={:.1} MACD={:.3} BB=[{:.2},{:.2}] K={:.1} D={:.1} trend={}",
            self.moving_average_fast,
            self.moving_average_slow,
            self.rsi,
            self.macd_diff,
            self.bollinger_low,
            self.bollinger_high,
            self.stochastic_k,
            self.stochastic_d,
            self.trend_label(),
        )
    }
}

/// Where a forecast came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Model,
    Fallback,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Model => "model",
            SourceTag::Fallback => "fallback",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forecast produced for one ticker in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub date: NaiveDate,
    pub ticker: String,
    pub current_price: f64,
    pub feature_summary: String,
    pub price_path: Vec<f64>,
    pub sentiment_score: f64,
    pub rationale: String,
    pub source: SourceTag,
}

impl ForecastResult {
    pub fn into_record(self) -> HistoryRecord {
        HistoryRecord {
            date: self.date,
            ticker: self.ticker,
            current_price: self.current_price,
            feature_summary: self.feature_summary,
            price_path: self.price_path,
            sentiment_score: self.sentiment_score,
            rationale: self.rationale,
        }
    }
}

/// Persisted row, keyed by (date, ticker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub date: NaiveDate,
    pub ticker: String,
    pub current_price: f64,
    pub feature_summary: String,
    pub price_path: Vec<f64>,
    pub sentiment_score: f64,
    pub rationale: String,
}

impl HistoryRecord {
    pub fn key(&self) -> (NaiveDate, &str) {
        (self.date, self.ticker.as_str())
    }
}

/// Allocation row, replaced wholesale every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    pub ticker: String,
    pub weight_percent: f64,
    pub as_of: NaiveDate,
    pub note: String,
}

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedTicker {
    pub ticker: String,
    pub source: SourceTag,
    pub outcome: UpsertOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedTicker {
    pub ticker: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub as_of: NaiveDate,
    pub processed: Vec<ProcessedTicker>,
    pub skipped: Vec<SkippedTicker>,
    /// Run-level problems that did not stop the batch (e.g. weight replacement).
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            processed: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn fallback_count(&self) -> usize {
        self.processed
            .iter()
            .filter(|p| p.source == SourceTag::Fallback)
            .count()
    }

    pub fn skip(&mut self, ticker: &str, kind: ErrorKind, reason: impl Into<String>) {
        self.skipped.push(SkippedTicker {
            ticker: ticker.to_string(),
            kind,
            reason: reason.into(),
        });
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {}: {} processed ({} fallback), {} skipped{}",
            self.as_of,
            self.processed_count(),
            self.fallback_count(),
            self.skipped_count(),
            if self.cancelled { ", cancelled" } else { "" },
        )?;
        for s in &self.skipped {
            writeln!(f, "  skipped {} [{}]: {}", s.ticker, s.kind, s.reason)?;
        }
        for e in &self.errors {
            writeln!(f, "  error: {}", e)?;
        }
        Ok(())
    }
}
