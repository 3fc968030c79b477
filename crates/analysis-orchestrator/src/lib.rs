//! Forecast generation and the per-run control loop.

pub mod forecast;
pub mod pipeline;
pub mod response;

pub use forecast::{fallback_path, ForecastEngine, FALLBACK_PREFIX, MAX_HORIZON};
pub use pipeline::{normalize_tickers, PipelineRunner};
pub use response::{parse_scorer_reply, ParseError, ScorerReply};
