//! Per-bar indicator series.
//!
//! Every rolling series has the same length as its input; positions inside
//! the warm-up window are `None`.

use analysis_core::PriceBar;

use crate::backend::IndicatorBackend;

/// Simple Moving Average
pub fn sma(backend: IndicatorBackend, data: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling(data, period, |w| backend.mean(w))
}

/// Rolling population standard deviation
pub fn rolling_std(backend: IndicatorBackend, data: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling(data, period, |w| backend.population_std(w))
}

fn rolling(data: &[f64], period: usize, f: impl Fn(&[f64]) -> f64) -> Vec<Option<f64>> {
    let mut out = vec![None; data.len()];
    if period == 0 || data.len() < period {
        return out;
    }
    for i in period - 1..data.len() {
        out[i] = Some(f(&data[i + 1 - period..=i]));
    }
    out
}

/// Exponential Moving Average, `alpha = 2 / (span + 1)`, seeded with the first value.
pub fn ema(data: &[f64], span: usize) -> Vec<f64> {
    if data.is_empty() {
        return vec![];
    }
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);

    let mut result = Vec::with_capacity(data.len());
    result.push(data[0]);
    for i in 1..data.len() {
        let prev = result[i - 1];
        result.push(alpha * data[i] + (1.0 - alpha) * prev);
    }
    result
}

/// Relative Strength Index from the rolling mean of gains against the rolling
/// mean of losses. A zero loss mean yields 100.
pub fn rsi(backend: IndicatorBackend, closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return out;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for w in closes.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let avg_gain = sma(backend, &gains, period);
    let avg_loss = sma(backend, &losses, period);

    // delta i describes closes[i + 1]
    for i in 0..gains.len() {
        if let (Some(gain), Some(loss)) = (avg_gain[i], avg_loss[i]) {
            let value = if loss == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + gain / loss)
            };
            out[i + 1] = Some(value.clamp(0.0, 100.0));
        }
    }
    out
}

/// Spread between the fast and slow EMA.
pub fn macd_diff(closes: &[f64], fast_span: usize, slow_span: usize) -> Vec<f64> {
    let fast = ema(closes, fast_span);
    let slow = ema(closes, slow_span);
    fast.iter().zip(slow.iter()).map(|(f, s)| f - s).collect()
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

pub fn bollinger_bands(
    backend: IndicatorBackend,
    closes: &[f64],
    period: usize,
    width: f64,
) -> BollingerBands {
    let middle = sma(backend, closes, period);
    let std = rolling_std(backend, closes, period);

    let mut upper = Vec::with_capacity(closes.len());
    let mut lower = Vec::with_capacity(closes.len());
    for (m, s) in middle.iter().zip(std.iter()) {
        match (m, s) {
            (Some(m), Some(s)) => {
                upper.push(Some(m + width * s));
                lower.push(Some(m - width * s));
            }
            _ => {
                upper.push(None);
                lower.push(None);
            }
        }
    }

    BollingerBands { upper, middle, lower }
}

/// Stochastic Oscillator
pub struct StochasticResult {
    pub k: Vec<Option<f64>>,
    pub d: Vec<Option<f64>>,
}

/// %K over `k_period` bars, exactly 50 on a flat window; %D is the
/// `d_period` mean of %K.
pub fn stochastic(
    backend: IndicatorBackend,
    bars: &[PriceBar],
    k_period: usize,
    d_period: usize,
) -> StochasticResult {
    let mut k = vec![None; bars.len()];
    let mut d = vec![None; bars.len()];
    if k_period == 0 || bars.len() < k_period {
        return StochasticResult { k, d };
    }

    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();

    for i in k_period - 1..bars.len() {
        let highest = backend.max(&highs[i + 1 - k_period..=i]);
        let lowest = backend.min(&lows[i + 1 - k_period..=i]);
        k[i] = Some(if highest == lowest {
            50.0
        } else {
            100.0 * (bars[i].close - lowest) / (highest - lowest)
        });
    }

    if d_period > 0 {
        for i in 0..bars.len() {
            if i + 1 < d_period {
                continue;
            }
            let window: Option<Vec<f64>> = k[i + 1 - d_period..=i].iter().copied().collect();
            if let Some(window) = window {
                d[i] = Some(backend.mean(&window));
            }
        }
    }

    StochasticResult { k, d }
}

/// Backfill leading gaps from the first valid value, then forward-fill the
/// remaining gaps from the last valid value. `None` when the series has no
/// valid value at all.
pub fn fill_gaps(series: &[Option<f64>]) -> Option<Vec<f64>> {
    let first = series.iter().flatten().copied().next()?;

    let mut out = Vec::with_capacity(series.len());
    let mut last = first;
    for value in series {
        if let Some(v) = value {
            last = *v;
        }
        out.push(last);
    }
    Some(out)
}

/// Latest value of a gap-filled series.
pub fn latest_filled(series: &[Option<f64>]) -> Option<f64> {
    fill_gaps(series).and_then(|s| s.last().copied())
}
