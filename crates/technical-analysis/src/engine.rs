use analysis_core::{AnalysisError, FeatureSet, PriceBar};
use serde::{Deserialize, Serialize};

use crate::backend::IndicatorBackend;
use crate::indicators::{bollinger_bands, latest_filled, macd_diff, rsi, sma, stochastic};

/// Window lengths used by [`IndicatorEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorParams {
    pub fast_ma: usize,
    pub slow_ma: usize,
    pub rsi_period: usize,
    pub macd_fast_span: usize,
    pub macd_slow_span: usize,
    pub bollinger_period: usize,
    pub bollinger_width: f64,
    pub stochastic_k: usize,
    pub stochastic_d: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            fast_ma: 5,
            slow_ma: 20,
            rsi_period: 14,
            macd_fast_span: 12,
            macd_slow_span: 26,
            bollinger_period: 20,
            bollinger_width: 2.0,
            stochastic_k: 14,
            stochastic_d: 3,
        }
    }
}

impl IndicatorParams {
    /// Longest rolling window in use. The EMA spans are recursive and defined
    /// from the first bar, so they do not count.
    pub fn min_history(&self) -> usize {
        [
            self.fast_ma,
            self.slow_ma,
            self.bollinger_period,
            self.rsi_period + 1,
            self.stochastic_k,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
        .max(1)
    }
}

/// Computes the [`FeatureSet`] at the latest bar of a price history.
pub struct IndicatorEngine {
    backend: IndicatorBackend,
    params: IndicatorParams,
}

impl IndicatorEngine {
    pub fn new(backend: IndicatorBackend) -> Self {
        Self::with_params(backend, IndicatorParams::default())
    }

    pub fn with_params(backend: IndicatorBackend, params: IndicatorParams) -> Self {
        Self { backend, params }
    }

    pub fn backend(&self) -> IndicatorBackend {
        self.backend
    }

    pub fn min_history(&self) -> usize {
        self.params.min_history()
    }

    pub fn compute(&self, history: &[PriceBar]) -> Result<FeatureSet, AnalysisError> {
        let required = self.min_history();
        if history.len() < required {
            return Err(AnalysisError::InsufficientHistory {
                required,
                available: history.len(),
            });
        }

        let p = &self.params;
        let closes: Vec<f64> = history.iter().map(|b| b.close).collect();

        let fast = sma(self.backend, &closes, p.fast_ma);
        let slow = sma(self.backend, &closes, p.slow_ma);
        let rsi_series = rsi(self.backend, &closes, p.rsi_period);
        let macd = macd_diff(&closes, p.macd_fast_span, p.macd_slow_span);
        let bands = bollinger_bands(self.backend, &closes, p.bollinger_period, p.bollinger_width);
        let stoch = stochastic(self.backend, history, p.stochastic_k, p.stochastic_d);

        let available = history.len();
        let latest = |series: &[Option<f64>]| {
            latest_filled(series).ok_or(AnalysisError::InsufficientHistory { required, available })
        };

        Ok(FeatureSet {
            moving_average_fast: latest(&fast)?,
            moving_average_slow: latest(&slow)?,
            rsi: latest(&rsi_series)?,
            macd_diff: macd.last().copied().unwrap_or(0.0),
            bollinger_high: latest(&bands.upper)?,
            bollinger_low: latest(&bands.lower)?,
            stochastic_k: latest(&stoch.k)?,
            stochastic_d: latest(&stoch.d)?,
        })
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new(IndicatorBackend::detect())
    }
}
