pub mod error;
pub mod orchestrator;
pub mod scorer;

pub use error::{MLError, MLResult};
pub use orchestrator::{CallOrchestrator, CallPolicy, Pacing};
pub use scorer::{ChatScorerClient, ScorerConfig};
