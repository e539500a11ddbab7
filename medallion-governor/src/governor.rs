//! Uniform retry / timeout / circuit-breaker policy for stage calls.

use std::future::Future;
use std::time::Duration;

use medallion_core::CancelToken;
use medallion_types::{BackoffConfig, BreakerConfig, DataType, PipelineConfig, PipelineError, Stage};

use crate::backoff::BackoffPolicy;
use crate::breaker::{BreakerRegistry, circuit_open};

/// Result of a governed call together with the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Governed<T> {
    /// Final outcome. Errors here are permanent for the record.
    pub outcome: Result<T, PipelineError>,
    /// Attempts made, including the first. Zero when the breaker refused the call.
    pub attempts: u32,
}

impl<T> Governed<T> {
    /// Retries spent beyond the first attempt.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Applies the retry, timeout and breaker policy to every stage transition.
///
/// Breaker state lives here and is shared by every run of the owning pipeline.
#[derive(Debug)]
pub struct Governor {
    backoff: BackoffPolicy,
    breakers: BreakerRegistry,
    stage_timeout: Duration,
}

impl Governor {
    /// Governor from explicit policy parts.
    #[must_use]
    pub fn new(backoff: BackoffConfig, breaker: BreakerConfig, stage_timeout: Duration) -> Self {
        Self {
            backoff: BackoffPolicy::new(backoff),
            breakers: BreakerRegistry::new(breaker),
            stage_timeout,
        }
    }

    /// Governor configured from a pipeline configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.backoff, config.breaker, config.stage_timeout)
    }

    /// Backoff schedule in use.
    #[must_use]
    pub const fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Per-`(stage, data_type)` breakers.
    #[must_use]
    pub const fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    /// Run `op` under the policy for `(stage, data_type)`.
    ///
    /// `op` receives the 1-based attempt number. Each attempt is bounded by the
    /// stage timeout. Transient errors are retried with backoff until the
    /// attempt budget is spent, then escalate to `RetriesExhausted`. Permanent
    /// errors return immediately. An open breaker fails the call with
    /// `CircuitOpen` without invoking `op`. Cancellation during a backoff wait
    /// abandons the retry with `Cancelled`.
    pub async fn call<T, F, Fut>(
        &self,
        stage: Stage,
        data_type: DataType,
        cancel: &CancelToken,
        mut op: F,
    ) -> Governed<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let breaker = self.breakers.get(stage, data_type);
        let mut attempts = 0u32;
        loop {
            if let Err(remaining) = breaker.try_acquire() {
                return Governed {
                    outcome: Err(circuit_open(stage, data_type, remaining)),
                    attempts,
                };
            }

            attempts += 1;
            let result = tokio::time::timeout(self.stage_timeout, op(attempts))
                .await
                .unwrap_or_else(|_| Err(PipelineError::timeout(stage.as_str())));

            let err = match result {
                Ok(value) => {
                    breaker.record(false);
                    return Governed {
                        outcome: Ok(value),
                        attempts,
                    };
                }
                Err(e) if e.is_transient() => e,
                Err(e) => {
                    breaker.record(false);
                    return Governed {
                        outcome: Err(e),
                        attempts,
                    };
                }
            };

            breaker.record(true);
            if attempts >= self.backoff.max_attempts() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    stage = %stage,
                    data_type = %data_type,
                    attempts,
                    error = %err,
                    "retries exhausted"
                );
                return Governed {
                    outcome: Err(PipelineError::RetriesExhausted {
                        attempts,
                        last: Box::new(err),
                    }),
                    attempts,
                };
            }

            let delay = self.backoff.delay_for(attempts - 1);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                stage = %stage,
                data_type = %data_type,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure; backing off"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Governed {
                        outcome: Err(PipelineError::Cancelled),
                        attempts,
                    };
                }
            }
        }
    }
}

impl Default for Governor {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

