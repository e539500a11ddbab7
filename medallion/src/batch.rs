use std::path::Path;

use futures::stream::{self, StreamExt};
use medallion_core::{
    BronzeRecord, CancelToken, DataType, PipelineError, PipelineRunResult, RunTally, Stage,
    load_snapshot_dir,
};
use tokio::time::Instant;

use crate::core::Pipeline;

impl Pipeline {
    /// Process every record of one data type and report the run.
    ///
    /// Records are processed sequentially in input order, so aggregation
    /// tie-breaks are deterministic. An unsupported `data_type` dead-letters
    /// every record with `UnsupportedType`; a record tagged with a different
    /// type fails validation on `data_type`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "medallion::batch::run_batch",
            skip(self, records),
            fields(data_type = data_type, records = records.len()),
        )
    )]
    pub async fn run_batch(
        &self,
        records: Vec<BronzeRecord>,
        data_type: &str,
    ) -> PipelineRunResult {
        self.run_batch_with_cancel(records, data_type, &CancelToken::new())
            .await
    }

    /// [`Self::run_batch`] under a caller-owned cancellation token.
    ///
    /// Once `cancel` fires, the record in flight finishes its current stage
    /// and every remaining record is dead-lettered as `Cancelled`, so the
    /// result still reconciles.
    pub async fn run_batch_with_cancel(
        &self,
        records: Vec<BronzeRecord>,
        data_type: &str,
        cancel: &CancelToken,
    ) -> PipelineRunResult {
        let started = Instant::now();
        match data_type.parse::<DataType>() {
            Ok(expected) => {
                let mut tally = RunTally::new(Some(expected.as_str().to_string()));
                for record in records {
                    self.process(record, Some(expected), cancel, &mut tally)
                        .await;
                }
                self.enforce_retention();
                let result = tally.finish(started.elapsed());
                #[cfg(feature = "tracing")]
                tracing::info!(
                    data_type = expected.as_str(),
                    received = result.received(),
                    success = result.success(),
                    dead_lettered = result.dead_lettered(),
                    retries = result.retries(),
                    "batch finished"
                );
                result
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(data_type, "unsupported batch data type");
                let mut tally = RunTally::new(Some(data_type.to_string()));
                for record in records {
                    tally.received();
                    let identity = record.identity();
                    self.dead_letter(&mut tally, Stage::Normalize, data_type, identity, &err, 1)
                        .await;
                }
                tally.finish(started.elapsed())
            }
        }
    }

    /// Run several data types, up to `max_concurrent_types` at a time.
    ///
    /// Results are returned in input order, one per `(data_type, records)` pair.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "medallion::batch::run_batches",
            skip(self, batches),
            fields(types = batches.len()),
        )
    )]
    pub async fn run_batches(
        &self,
        batches: Vec<(String, Vec<BronzeRecord>)>,
    ) -> Vec<PipelineRunResult> {
        stream::iter(batches)
            .map(|(data_type, records)| async move {
                self.run_batch(records, &data_type).await
            })
            .buffered(self.inner.cfg.max_concurrent_types)
            .collect()
            .await
    }

    /// Load every snapshot table present in `dir` and run each as a batch.
    ///
    /// # Errors
    /// Returns `Structural` or `Ingest` when a file is rejected; no record of
    /// any table is processed in that case.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            name = "medallion::batch::run_snapshot_dir",
            skip(self, dir),
            fields(dir = %dir.display(), source = source),
        )
    )]
    pub async fn run_snapshot_dir(
        &self,
        dir: &Path,
        source: &str,
    ) -> Result<Vec<PipelineRunResult>, PipelineError> {
        let tables = load_snapshot_dir(dir, source)?;
        let batches = tables
            .into_iter()
            .map(|(table, records)| (table.as_str().to_string(), records))
            .collect();
        Ok(self.run_batches(batches).await)
    }
}
