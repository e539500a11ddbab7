use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use medallion_core::{
    PipelineError, ReferenceEntry, ReferenceKey, ReferenceSource, StaticReferenceTable,
};

/// Instruction for how a lookup should behave for a given instrument.
#[derive(Debug, Clone)]
pub enum MockBehavior<T> {
    /// Return the provided value immediately.
    Return(T),
    /// Fail immediately with the provided error.
    Fail(PipelineError),
    /// Hang indefinitely (simulate a stalled dependency).
    Hang,
}

#[derive(Default)]
struct InternalState {
    table: StaticReferenceTable,
    rules: HashMap<String, MockBehavior<Option<ReferenceEntry>>>,
    queued_failures: VecDeque<PipelineError>,
    lookups: Vec<ReferenceKey>,
}

/// Controller handle used by tests to drive a [`DynamicReferenceSource`].
pub struct DynamicMockController {
    state: Arc<Mutex<InternalState>>,
}

impl DynamicMockController {
    /// Set the behavior for lookups of one instrument.
    pub async fn set_behavior(
        &self,
        instrument_id: &str,
        behavior: MockBehavior<Option<ReferenceEntry>>,
    ) {
        let mut guard = self.state.lock().await;
        guard.rules.insert(instrument_id.to_string(), behavior);
    }

    /// Add an entry to the fallback table.
    pub async fn insert_entry(&self, entry: ReferenceEntry) {
        self.state.lock().await.table.insert(entry);
    }

    /// Fail the next `n` lookups (any instrument) with `err`, before rules apply.
    pub async fn fail_next(&self, n: usize, err: PipelineError) {
        let mut guard = self.state.lock().await;
        guard.queued_failures.extend(std::iter::repeat_n(err, n));
    }

    /// Keys looked up so far, in call order.
    pub async fn lookups(&self) -> Vec<ReferenceKey> {
        self.state.lock().await.lookups.clone()
    }

    /// Number of lookups served so far.
    pub async fn lookup_count(&self) -> usize {
        self.state.lock().await.lookups.len()
    }

    /// Clear all configured behaviors, queued failures and the call log.
    pub async fn clear_all_behaviors(&self) {
        let mut guard = self.state.lock().await;
        guard.rules.clear();
        guard.queued_failures.clear();
        guard.lookups.clear();
    }
}

/// A reference source that defers its behavior to an external controller.
///
/// Lookups without a rule fall back to an internal [`StaticReferenceTable`].
pub struct DynamicReferenceSource {
    name: String,
    state: Arc<Mutex<InternalState>>,
}

impl DynamicReferenceSource {
    /// Create a new dynamic source over `table` and its controller.
    #[must_use]
    pub fn new_with_controller(
        name: &str,
        table: StaticReferenceTable,
    ) -> (Arc<dyn ReferenceSource>, DynamicMockController) {
        let state = Arc::new(Mutex::new(InternalState {
            table,
            ..InternalState::default()
        }));
        let controller = DynamicMockController {
            state: Arc::clone(&state),
        };
        let me = Arc::new(Self {
            name: name.to_string(),
            state,
        });
        (me as Arc<dyn ReferenceSource>, controller)
    }
}

#[async_trait]
impl ReferenceSource for DynamicReferenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, key: &ReferenceKey) -> Result<Option<ReferenceEntry>, PipelineError> {
        // Resolve the behavior without holding the lock across the hang.
        let behavior = {
            let mut guard = self.state.lock().await;
            guard.lookups.push(key.clone());
            if let Some(err) = guard.queued_failures.pop_front() {
                MockBehavior::Fail(err)
            } else if let Some(rule) = guard.rules.get(&key.instrument_id) {
                rule.clone()
            } else {
                MockBehavior::Return(guard.table.find(key).cloned())
            }
        };
        match behavior {
            MockBehavior::Return(entry) => Ok(entry),
            MockBehavior::Fail(err) => Err(err),
            MockBehavior::Hang => std::future::pending().await,
        }
    }
}
