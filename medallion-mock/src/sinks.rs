use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use medallion_core::{
    DeadLetterSink, ErrorRecord, GoldRecord, GoldSink, PipelineError, SummaryRow, SummarySink,
};

/// Failure script shared by the in-memory sinks.
#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<PipelineError>,
    always: Option<PipelineError>,
    hang: bool,
}

enum Next {
    Proceed,
    Fail(PipelineError),
    Hang,
}

impl Script {
    fn next(&mut self) -> Next {
        if let Some(err) = self.queued.pop_front() {
            return Next::Fail(err);
        }
        if let Some(err) = &self.always {
            return Next::Fail(err.clone());
        }
        if self.hang {
            return Next::Hang;
        }
        Next::Proceed
    }
}

async fn hang<T>() -> T {
    std::future::pending().await
}

type ConflictKey = (String, String, DateTime<Utc>);

#[derive(Debug, Default)]
struct SummaryState {
    rows: BTreeMap<ConflictKey, SummaryRow>,
    upserts: usize,
    script: Script,
}

/// Summary table replacing on the conflict key.
///
/// A row only replaces the stored one when its `created_at` is newer, so a
/// delayed write of an older snapshot never rolls a window back.
#[derive(Debug, Default)]
pub struct InMemorySummarySink {
    state: Mutex<SummaryState>,
}

impl InMemorySummarySink {
    /// Empty, healthy sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rows ordered by conflict key.
    pub async fn rows(&self) -> Vec<SummaryRow> {
        self.state.lock().await.rows.values().cloned().collect()
    }

    /// Row stored under `(tenant_id, instrument_id, interval_start)`.
    pub async fn row(
        &self,
        tenant_id: &str,
        instrument_id: &str,
        interval_start: DateTime<Utc>,
    ) -> Option<SummaryRow> {
        let key = (
            tenant_id.to_string(),
            instrument_id.to_string(),
            interval_start,
        );
        self.state.lock().await.rows.get(&key).cloned()
    }

    /// Successful `upsert` calls so far.
    pub async fn upsert_count(&self) -> usize {
        self.state.lock().await.upserts
    }

    /// Fail the next `n` calls with `SinkUnavailable`.
    pub async fn fail_next(&self, n: usize) {
        let err = PipelineError::sink_unavailable("memory-summary", "scripted outage");
        let mut guard = self.state.lock().await;
        guard.script.queued.extend(std::iter::repeat_n(err, n));
    }

    /// Fail every call with `err` until cleared with `None`.
    pub async fn fail_always(&self, err: Option<PipelineError>) {
        self.state.lock().await.script.always = err;
    }

    /// Make every call hang (or stop hanging).
    pub async fn set_hang(&self, hang: bool) {
        self.state.lock().await.script.hang = hang;
    }
}

#[async_trait]
impl SummarySink for InMemorySummarySink {
    fn name(&self) -> &str {
        "memory-summary"
    }

    async fn upsert(&self, rows: &[SummaryRow]) -> Result<(), PipelineError> {
        let next = self.state.lock().await.script.next();
        match next {
            Next::Fail(err) => return Err(err),
            Next::Hang => return hang().await,
            Next::Proceed => {}
        }
        let mut guard = self.state.lock().await;
        for row in rows {
            match guard.rows.get(&row.conflict_key()) {
                Some(stored) if stored.created_at >= row.created_at => {}
                _ => {
                    guard.rows.insert(row.conflict_key(), row.clone());
                }
            }
        }
        guard.upserts += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LetterState {
    letters: Vec<ErrorRecord>,
    script: Script,
}

/// Dead-letter sink collecting every descriptor in write order.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    state: Mutex<LetterState>,
}

impl InMemoryDeadLetterSink {
    /// Empty, healthy sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptors written so far.
    pub async fn letters(&self) -> Vec<ErrorRecord> {
        self.state.lock().await.letters.clone()
    }

    /// Fail every write with `err` until cleared with `None`.
    pub async fn fail_always(&self, err: Option<PipelineError>) {
        self.state.lock().await.script.always = err;
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    fn name(&self) -> &str {
        "memory-dlq"
    }

    async fn write(&self, record: &ErrorRecord) -> Result<(), PipelineError> {
        let mut guard = self.state.lock().await;
        match guard.script.next() {
            Next::Fail(err) => Err(err),
            Next::Hang => {
                drop(guard);
                hang().await
            }
            Next::Proceed => {
                guard.letters.push(record.clone());
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
struct GoldState {
    published: Vec<GoldRecord>,
    script: Script,
}

/// Gold topic stand-in collecting every published record.
#[derive(Debug, Default)]
pub struct InMemoryGoldSink {
    state: Mutex<GoldState>,
}

impl InMemoryGoldSink {
    /// Empty, healthy sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records published so far.
    pub async fn published(&self) -> Vec<GoldRecord> {
        self.state.lock().await.published.clone()
    }

    /// Fail the next `n` calls with `SinkUnavailable`.
    pub async fn fail_next(&self, n: usize) {
        let err = PipelineError::sink_unavailable("memory-gold", "scripted outage");
        let mut guard = self.state.lock().await;
        guard.script.queued.extend(std::iter::repeat_n(err, n));
    }
}

#[async_trait]
impl GoldSink for InMemoryGoldSink {
    fn name(&self) -> &str {
        "memory-gold"
    }

    async fn publish(&self, record: &GoldRecord) -> Result<(), PipelineError> {
        let mut guard = self.state.lock().await;
        match guard.script.next() {
            Next::Fail(err) => Err(err),
            Next::Hang => {
                drop(guard);
                hang().await
            }
            Next::Proceed => {
                guard.published.push(record.clone());
                Ok(())
            }
        }
    }
}
