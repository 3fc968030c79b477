use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[cfg(feature = "statrs")]
use statrs::statistics::Statistics;

/// How window statistics are computed. Both variants produce the same
/// feature values; the choice is made once when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorBackend {
    /// Window statistics delegated to `statrs`.
    LibraryBacked,
    /// Hand-written loops.
    ManualFormula,
}

impl IndicatorBackend {
    /// Probe which backends this build supports and pick the richest one.
    pub fn detect() -> Self {
        if Self::library_available() {
            IndicatorBackend::LibraryBacked
        } else {
            IndicatorBackend::ManualFormula
        }
    }

    pub fn library_available() -> bool {
        cfg!(feature = "statrs")
    }

    /// Resolve a configured preference, degrading to the manual formulas when
    /// the library variant was requested but is not compiled in.
    pub fn resolve(preference: BackendPreference) -> Self {
        match preference {
            BackendPreference::Auto => Self::detect(),
            BackendPreference::Manual => IndicatorBackend::ManualFormula,
            BackendPreference::Library if Self::library_available() => IndicatorBackend::LibraryBacked,
            BackendPreference::Library => {
                tracing::warn!("statrs backend requested but not compiled in, using manual formulas");
                IndicatorBackend::ManualFormula
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IndicatorBackend::LibraryBacked => "library-backed",
            IndicatorBackend::ManualFormula => "manual-formula",
        }
    }

    pub fn mean(&self, window: &[f64]) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        match self {
            #[cfg(feature = "statrs")]
            IndicatorBackend::LibraryBacked => window.mean(),
            _ => window.iter().sum::<f64>() / window.len() as f64,
        }
    }

    pub fn population_std(&self, window: &[f64]) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        match self {
            #[cfg(feature = "statrs")]
            IndicatorBackend::LibraryBacked => window.population_std_dev(),
            _ => {
                let m = self.mean(window);
                let variance = window.iter().map(|x| (x - m).powi(2)).sum::<f64>() / window.len() as f64;
                variance.sqrt()
            }
        }
    }

    pub fn min(&self, window: &[f64]) -> f64 {
        match self {
            #[cfg(feature = "statrs")]
            IndicatorBackend::LibraryBacked => Statistics::min(window),
            _ => window.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    pub fn max(&self, window: &[f64]) -> f64 {
        match self {
            #[cfg(feature = "statrs")]
            IndicatorBackend::LibraryBacked => Statistics::max(window),
            _ => window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Configured backend choice (`INDICATOR_BACKEND=auto|library|manual`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Library,
    Manual,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(BackendPreference::Auto),
            "library" | "statrs" => Ok(BackendPreference::Library),
            "manual" => Ok(BackendPreference::Manual),
            other => Err(format!("unknown indicator backend '{}'", other)),
        }
    }
}
