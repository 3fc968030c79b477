pub mod backend;
pub mod engine;
pub mod indicators;


pub use backend::{BackendPreference, IndicatorBackend};
pub use engine::{IndicatorEngine, IndicatorParams};
pub use indicators::*;
