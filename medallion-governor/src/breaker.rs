//! Rolling-window circuit breakers keyed by `(stage, data_type)`.
//!
//! Clocks come from `tokio::time` so paused-time tests can drive cooldowns.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use medallion_types::{BreakerConfig, DataType, PipelineError, Stage};
use tokio::time::Instant;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls are admitted.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open {
        /// Time left before the breaker closes again.
        remaining: Duration,
    },
}

#[derive(Debug, Default)]
struct Window {
    calls: VecDeque<(Instant, bool)>,
    failures: usize,
    open_until: Option<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant, span: Duration) {
        while let Some((at, failed)) = self.calls.front().copied() {
            if now.duration_since(at) < span {
                break;
            }
            self.calls.pop_front();
            if failed {
                self.failures -= 1;
            }
        }
    }

    /// Clear an elapsed open period. Returns the remaining cooldown if still open.
    fn refresh(&mut self, now: Instant) -> Option<Duration> {
        let until = self.open_until?;
        if now < until {
            return Some(until - now);
        }
        self.open_until = None;
        self.calls.clear();
        self.failures = 0;
        None
    }
}

/// Failure-rate circuit breaker over a rolling time window.
///
/// Only transient failures count against the rate. The rate is evaluated once
/// the window holds at least `min_calls` outcomes; a rate above the threshold
/// opens the breaker for `cooldown`, after which it closes with an empty window.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    window: Mutex<Window>,
}

impl CircuitBreaker {
    /// Closed breaker with an empty window.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window::default()),
        }
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        let mut w = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        match w.refresh(Instant::now()) {
            Some(remaining) => BreakerState::Open { remaining },
            None => BreakerState::Closed,
        }
    }

    /// Admit a call, or return the remaining cooldown if open.
    ///
    /// # Errors
    /// Returns the time left before the breaker closes.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut w = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        w.refresh(Instant::now()).map_or(Ok(()), Err)
    }

    /// Record a call outcome; `transient_failure` counts against the rate.
    pub fn record(&self, transient_failure: bool) {
        let now = Instant::now();
        let mut w = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if w.refresh(now).is_some() {
            return;
        }
        w.prune(now, self.config.window);
        w.calls.push_back((now, transient_failure));
        if transient_failure {
            w.failures += 1;
        }

        let calls = w.calls.len();
        if calls < self.config.min_calls as usize {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = w.failures as f64 / calls as f64;
        if rate > self.config.failure_rate_threshold {
            w.open_until = Some(now + self.config.cooldown);
            #[cfg(feature = "tracing")]
            tracing::warn!(
                failures = w.failures,
                calls,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    /// Outcomes currently inside the rolling window as `(calls, transient_failures)`.
    pub fn window_counts(&self) -> (usize, usize) {
        let now = Instant::now();
        let mut w = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if w.refresh(now).is_none() {
            w.prune(now, self.config.window);
        }
        (w.calls.len(), w.failures)
    }
}

pub(crate) fn circuit_open(
    stage: Stage,
    data_type: DataType,
    remaining: Duration,
) -> PipelineError {
    PipelineError::CircuitOpen {
        stage: stage.as_str().to_string(),
        data_type: data_type.as_str().to_string(),
        reset_in_ms: remaining.as_millis().try_into().unwrap_or(u64::MAX),
    }
}

/// Lazily created breakers, one per `(stage, data_type)`.
///
/// The map lock is only held to find or insert a breaker; each breaker
/// carries its own lock.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<(Stage, DataType), Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Empty registry creating breakers with `config`.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for `(stage, data_type)`, created on first use.
    pub fn get(&self, stage: Stage, data_type: DataType) -> Arc<CircuitBreaker> {
        let key = (stage, data_type);
        if let Some(b) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(b);
        }
        let mut map = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(key)
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config))),
        )
    }

    /// State of `(stage, data_type)`; untouched keys report `Closed`.
    pub fn state(&self, stage: Stage, data_type: DataType) -> BreakerState {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(stage, data_type))
            .map_or(BreakerState::Closed, |b| b.state())
    }

    /// Admit a call for `(stage, data_type)`.
    ///
    /// # Errors
    /// `CircuitOpen` carrying the remaining cooldown in milliseconds.
    pub fn admit(&self, stage: Stage, data_type: DataType) -> Result<(), PipelineError> {
        self.get(stage, data_type)
            .try_acquire()
            .map_err(|remaining| circuit_open(stage, data_type, remaining))
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
