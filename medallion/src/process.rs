//! Per-record stage sequencing.
//!
//! Every record handed to [`Pipeline::process`] ends either `PUBLISHED` or
//! `DEAD_LETTERED` in the caller's tally. Cancellation is observed at stage
//! boundaries; a record that has not started when the token fires is
//! dead-lettered at `Receive`.

use chrono::Utc;
use medallion_core::{
    BronzeRecord, CancelToken, DEFAULT_TENANT, DataType, Enricher, ErrorRecord, PipelineError,
    RecordId, RunTally, SilverRecord, Stage,
};

use crate::core::Pipeline;

impl Pipeline {
    /// Drive one record through Normalize -> Enrich -> Aggregate -> Publish.
    ///
    /// `expected` is the data type a batch was declared with; a record tagged
    /// otherwise fails validation on `data_type`.
    pub(crate) async fn process(
        &self,
        record: BronzeRecord,
        expected: Option<DataType>,
        cancel: &CancelToken,
        tally: &mut RunTally,
    ) {
        tally.received();
        let record = self.assign_tenant(record);
        let identity = record.identity();
        let tag = record.data_type().to_string();

        if cancel.is_cancelled() {
            let err = PipelineError::Cancelled;
            self.dead_letter(tally, Stage::Receive, &tag, identity, &err, 0)
                .await;
            return;
        }

        let silver = match self.normalize_checked(&record, expected) {
            Ok(silver) => silver,
            Err(err) => {
                self.dead_letter(tally, Stage::Normalize, &tag, identity, &err, 1)
                    .await;
                return;
            }
        };
        let data_type = silver.data_type();
        let tag = data_type.as_str();

        if cancel.is_cancelled() {
            let err = PipelineError::Cancelled;
            self.dead_letter(tally, Stage::Enrich, tag, identity, &err, 0)
                .await;
            return;
        }

        let key = Enricher::reference_key(&silver);
        let source = self.inner.enricher.source();
        let lookup = self
            .inner
            .governor
            .call(Stage::Enrich, data_type, cancel, |_| source.lookup(&key))
            .await;
        tally.retried(lookup.retries());
        let entry = match lookup.outcome {
            Ok(entry) => entry,
            Err(err) => {
                self.dead_letter(tally, Stage::Enrich, tag, identity, &err, lookup.attempts)
                    .await;
                return;
            }
        };
        let gold = self.inner.enricher.apply(silver, entry.as_ref(), Utc::now());
        tally.gold(entry.is_some());

        if cancel.is_cancelled() {
            let err = PipelineError::Cancelled;
            self.dead_letter(tally, Stage::Aggregate, tag, identity, &err, 0)
                .await;
            return;
        }

        let update = match self.inner.aggregator.aggregate(&gold, self.inner.cfg.interval) {
            Ok(update) => update,
            Err(err) => {
                self.dead_letter(tally, Stage::Aggregate, tag, identity, &err, 1)
                    .await;
                return;
            }
        };
        if update.as_ref().is_some_and(|u| u.applied) {
            tally.aggregated();
        }

        if cancel.is_cancelled() {
            let err = PipelineError::Cancelled;
            self.dead_letter(tally, Stage::Publish, tag, identity, &err, 0)
                .await;
            return;
        }

        if let Some(update) = update {
            let summary = &self.inner.summary;
            let rows = [update.row];
            let upsert = self
                .inner
                .governor
                .call(Stage::Publish, data_type, cancel, |_| summary.upsert(&rows))
                .await;
            tally.retried(upsert.retries());
            if let Err(err) = upsert.outcome {
                self.dead_letter(tally, Stage::Publish, tag, identity, &err, upsert.attempts)
                    .await;
                return;
            }
        }

        if let Some(sink) = &self.inner.gold {
            let published = self
                .inner
                .governor
                .call(Stage::Publish, data_type, cancel, |_| sink.publish(&gold))
                .await;
            tally.retried(published.retries());
            if let Err(err) = published.outcome {
                self.dead_letter(tally, Stage::Publish, tag, identity, &err, published.attempts)
                    .await;
                return;
            }
        }

        tally.published();
    }

    fn assign_tenant(&self, record: BronzeRecord) -> BronzeRecord {
        let tenant = &self.inner.cfg.default_tenant;
        if record.tenant_id() == DEFAULT_TENANT && tenant != DEFAULT_TENANT {
            record.with_tenant(tenant.clone())
        } else {
            record
        }
    }

    fn normalize_checked(
        &self,
        record: &BronzeRecord,
        expected: Option<DataType>,
    ) -> Result<SilverRecord, PipelineError> {
        if let Some(expected) = expected
            && record.data_type().parse::<DataType>().ok() != Some(expected)
        {
            return Err(PipelineError::validation(
                "data_type",
                format!(
                    "record tagged {:?} in a {expected} batch",
                    record.data_type()
                ),
            ));
        }
        self.inner.normalizer.normalize(record)
    }

    /// Record a permanent failure and write it to the dead-letter sink.
    ///
    /// The write is bounded by the stage timeout and never fails the record
    /// twice: a sink error is logged and the record still counts as
    /// dead-lettered.
    pub(crate) async fn dead_letter(
        &self,
        tally: &mut RunTally,
        stage: Stage,
        data_type: &str,
        identity: RecordId,
        err: &PipelineError,
        attempts: u32,
    ) {
        let letter = ErrorRecord::new(stage, data_type, identity, err, attempts);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            stage = %stage,
            data_type,
            record = %letter.record_identity.as_str(),
            kind = letter.error_kind.as_str(),
            attempts,
            "dead-lettering record"
        );
        let sink = &self.inner.dead_letters;
        let written = Self::call_with_timeout(
            "dead_letter",
            self.inner.cfg.stage_timeout,
            sink.write(&letter),
        )
        .await;
        if let Err(_e) = written {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                sink = sink.name(),
                error = %_e,
                record = %letter.record_identity.as_str(),
                "dead-letter write failed"
            );
        }
        tally.dead_lettered(letter);
    }
}
