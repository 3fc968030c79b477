//! Pacing, retry and timeout around one external scorer.
//!
//! The orchestrator never substitutes a value of its own: a call either
//! yields the scorer's text or an [`AnalysisError::ExternalService`].

use analysis_core::{AnalysisError, ScorerProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How consecutive calls are spaced out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pacing {
    /// Sleep `pause` before the call that follows every `every` completed calls.
    Cooldown { every: usize, pause: Duration },
    /// Sleep a fixed delay between consecutive calls.
    FixedDelay(Duration),
    None,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing::Cooldown {
            every: 3,
            pause: Duration::from_secs(21),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub pacing: Pacing,
    /// Total attempts per invoke, including the first.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            pacing: Pacing::default(),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(1000),
            call_timeout: Duration::from_secs(60),
        }
    }
}

struct CallState {
    completed: u64,
}

pub struct CallOrchestrator {
    scorer: Arc<dyn ScorerProvider>,
    policy: CallPolicy,
    state: Mutex<CallState>,
}

impl CallOrchestrator {
    pub fn new(scorer: Arc<dyn ScorerProvider>, policy: CallPolicy) -> Self {
        Self {
            scorer,
            policy,
            state: Mutex::new(CallState { completed: 0 }),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.scorer.backend_name()
    }

    /// Number of attempts issued so far.
    pub async fn calls_made(&self) -> u64 {
        self.state.lock().await.completed
    }

    pub async fn invoke(&self, payload: &str) -> Result<String, AnalysisError> {
        // held for the whole invoke so pacing sees a consistent count
        let mut state = self.state.lock().await;
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.pace(state.completed).await;
            state.completed += 1;

            let outcome = tokio::time::timeout(self.policy.call_timeout, self.scorer.complete(payload)).await;
            match outcome {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:.1}s", self.policy.call_timeout.as_secs_f64())
                }
            }

            tracing::warn!(
                "Scorer attempt {}/{} via {} failed: {}",
                attempt,
                attempts,
                self.scorer.backend_name(),
                last_error
            );

            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_backoff * attempt).await;
            }
        }

        Err(AnalysisError::ExternalService(format!(
            "scorer failed after {} attempt(s): {}",
            attempts, last_error
        )))
    }

    async fn pace(&self, completed: u64) {
        if completed == 0 {
            return;
        }
        match &self.policy.pacing {
            Pacing::Cooldown { every, pause } => {
                let every = (*every).max(1) as u64;
                if completed % every == 0 {
                    tracing::info!("Cooling down {:.0}s for scorer rate limit", pause.as_secs_f64());
                    tokio::time::sleep(*pause).await;
                }
            }
            Pacing::FixedDelay(delay) => {
                tracing::debug!("Pacing scorer call by {}ms", delay.as_millis());
                tokio::time::sleep(*delay).await;
            }
            Pacing::None => {}
        }
    }
}
