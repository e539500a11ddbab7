//! Streaming runs: partitioned workers fed by bounded queues.
//!
//! Each partition has its own worker and queue, so records sharing a
//! partition key are processed in arrival order. Workers emit result deltas
//! every `batch_size` terminal records or every `flush_interval`, whichever
//! comes first. Each flush also evicts windows behind the retention horizon.
//! A supervisor task joins the workers and reports the cumulative result
//! through the [`RunHandle`].

use std::hash::{DefaultHasher, Hash, Hasher};

use futures::{Stream, StreamExt};
use medallion_core::{
    BronzeRecord, CancelToken, PipelineRunResult, RunHandle, RunTally, StreamConfig,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::Pipeline;

/// Why a record was not accepted by a streaming run. The record is handed back.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// The partition queue is at capacity (`try_send` only).
    #[error("partition {partition} queue is full")]
    Full {
        /// Partition the record hashed to.
        partition: usize,
        /// The rejected record.
        record: Box<BronzeRecord>,
    },
    /// The run has stopped accepting records.
    #[error("stream run is closed")]
    Closed {
        /// The rejected record.
        record: Box<BronzeRecord>,
    },
}

impl IngressError {
    /// Recover the rejected record.
    #[must_use]
    pub fn into_record(self) -> BronzeRecord {
        match self {
            Self::Full { record, .. } | Self::Closed { record } => *record,
        }
    }
}

/// Producer side of a streaming run.
///
/// Dropping every clone ends the run once queued records are processed.
#[derive(Debug, Clone)]
pub struct StreamIngress {
    partitions: Vec<mpsc::Sender<BronzeRecord>>,
}

impl StreamIngress {
    /// Number of partition workers.
    #[must_use]
    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Worker index a partition key maps to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let n = self.partitions.len().max(1) as u64;
        usize::try_from(hasher.finish() % n).unwrap_or(0)
    }

    /// Enqueue a record, waiting while its partition queue is full.
    ///
    /// # Errors
    /// Returns `Closed` once the run has been cancelled or has finished.
    pub async fn send(&self, record: BronzeRecord) -> Result<(), IngressError> {
        let partition = self.partition_for(&record.partition_key());
        let Some(tx) = self.partitions.get(partition) else {
            return Err(IngressError::Closed {
                record: Box::new(record),
            });
        };
        tx.send(record)
            .await
            .map_err(|mpsc::error::SendError(record)| IngressError::Closed {
                record: Box::new(record),
            })
    }

    /// Enqueue a record without waiting.
    ///
    /// # Errors
    /// Returns `Full` when the partition queue is at capacity and `Closed`
    /// once the run has stopped.
    pub fn try_send(&self, record: BronzeRecord) -> Result<(), IngressError> {
        let partition = self.partition_for(&record.partition_key());
        let Some(tx) = self.partitions.get(partition) else {
            return Err(IngressError::Closed {
                record: Box::new(record),
            });
        };
        tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(record) => IngressError::Full {
                partition,
                record: Box::new(record),
            },
            mpsc::error::TrySendError::Closed(record) => IngressError::Closed {
                record: Box::new(record),
            },
        })
    }
}

struct PartitionWorker {
    pipeline: Pipeline,
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    partition: usize,
    rx: mpsc::Receiver<BronzeRecord>,
    deltas: mpsc::UnboundedSender<PipelineRunResult>,
    cancel: CancelToken,
    cfg: StreamConfig,
}

struct Flusher {
    tally: RunTally,
    total: PipelineRunResult,
    period: Instant,
}

impl Flusher {
    fn new() -> Self {
        Self {
            tally: RunTally::new(None),
            total: PipelineRunResult::default(),
            period: Instant::now(),
        }
    }

    fn flush(&mut self, deltas: &mpsc::UnboundedSender<PipelineRunResult>) {
        if self.tally.received_count() == 0 {
            return;
        }
        let delta = self.tally.take_delta(self.period.elapsed());
        self.period = Instant::now();
        self.total.merge(delta.clone());
        // The consumer may have stopped listening; the cumulative total is still reported.
        let _ = deltas.send(delta);
    }
}

impl PartitionWorker {
    fn flush(&self, out: &mut Flusher) {
        out.flush(&self.deltas);
        self.pipeline.enforce_retention();
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "medallion::stream::partition_worker",
            skip(self),
            fields(partition = self.partition),
        )
    )]
    async fn run(mut self) -> PipelineRunResult {
        let started = Instant::now();
        let mut out = Flusher::new();
        let batch_size = self.cfg.batch_size as u64;
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.cfg.flush_interval,
            self.cfg.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = self.rx.recv() => {
                    let Some(record) = next else { break };
                    self.pipeline
                        .process(record, None, &self.cancel, &mut out.tally)
                        .await;
                    if out.tally.terminal_count() >= batch_size {
                        self.flush(&mut out);
                    }
                }
                _ = ticker.tick() => self.flush(&mut out),
            }
        }

        // Anything still queued was never started; account for it as cancelled.
        self.rx.close();
        while let Ok(record) = self.rx.try_recv() {
            self.pipeline
                .process(record, None, &self.cancel, &mut out.tally)
                .await;
        }
        self.flush(&mut out);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            partition = self.partition,
            received = out.total.received(),
            dead_lettered = out.total.dead_lettered(),
            "partition worker stopped"
        );
        out.total.with_elapsed(started.elapsed())
    }
}

impl Pipeline {
    fn spawn_stream(
        &self,
        cancel: &CancelToken,
    ) -> (
        StreamIngress,
        mpsc::UnboundedReceiver<PipelineRunResult>,
        JoinHandle<PipelineRunResult>,
    ) {
        let cfg = self.inner.cfg.stream;
        let (delta_tx, delta_rx) = mpsc::unbounded_channel();
        let mut senders = Vec::with_capacity(cfg.partitions);
        let mut workers = Vec::with_capacity(cfg.partitions);
        for partition in 0..cfg.partitions {
            let (tx, rx) = mpsc::channel(cfg.queue_capacity);
            senders.push(tx);
            let worker = PartitionWorker {
                pipeline: self.clone(),
                partition,
                rx,
                deltas: delta_tx.clone(),
                cancel: cancel.clone(),
                cfg,
            };
            workers.push(tokio::spawn(worker.run()));
        }
        drop(delta_tx);

        let started = Instant::now();
        let supervisor = tokio::spawn(async move {
            let mut total = PipelineRunResult::default();
            for worker in workers {
                if let Ok(result) = worker.await {
                    total.merge(result);
                }
            }
            total.with_elapsed(started.elapsed())
        });
        (
            StreamIngress {
                partitions: senders,
            },
            delta_rx,
            supervisor,
        )
    }

    /// Start a streaming run fed through the returned [`StreamIngress`].
    ///
    /// Behavior and trade-offs:
    /// - Records are routed to `partitions` workers by their partition key;
    ///   ordering holds only within a partition.
    /// - Each worker queue holds `queue_capacity` records: `send` waits and
    ///   `try_send` rejects once it is full.
    /// - Deltas are emitted per worker every `batch_size` terminal records or
    ///   every `flush_interval`. The delta channel is unbounded.
    /// - The run ends when every ingress clone is dropped and the queues
    ///   drain, or on cancellation. Records queued but not started when the
    ///   run is cancelled are dead-lettered as `Cancelled`.
    /// - Dropping the [`RunHandle`] cancels the run.
    #[must_use]
    pub fn run_stream(
        &self,
    ) -> (
        StreamIngress,
        mpsc::UnboundedReceiver<PipelineRunResult>,
        RunHandle,
    ) {
        let cancel = CancelToken::new();
        let (ingress, deltas, supervisor) = self.spawn_stream(&cancel);
        (ingress, deltas, RunHandle::new(supervisor, cancel))
    }

    /// Start a streaming run that pumps `source` until it ends.
    ///
    /// The pump applies the same backpressure as [`StreamIngress::send`]. On
    /// cancellation it stops pulling from `source`.
    #[must_use]
    pub fn run_stream_from<S>(
        &self,
        source: S,
    ) -> (mpsc::UnboundedReceiver<PipelineRunResult>, RunHandle)
    where
        S: Stream<Item = BronzeRecord> + Send + 'static,
    {
        let cancel = CancelToken::new();
        let (ingress, deltas, supervisor) = self.spawn_stream(&cancel);
        let pump_cancel = cancel.clone();
        let pump = tokio::spawn(async move {
            let mut source = std::pin::pin!(source);
            loop {
                tokio::select! {
                    biased;
                    () = pump_cancel.cancelled() => break,
                    next = source.next() => {
                        let Some(record) = next else { break };
                        if ingress.send(record).await.is_err() {
                            break;
                        }
                    }
                }
            }
            drop(ingress);
            supervisor.await.unwrap_or_default()
        });
        (deltas, RunHandle::new(pump, cancel))
    }
}
