// Batch engine: transactional take, local staging and rollover to the remote side

use crate::config::BatchSettings;
use crate::errors::{DeliveryError, SinkError};
use crate::models::{Record, Status};
use crate::queue::{Channel, Transaction};
use crate::telemetry;
use crate::transfer::{ensure_remote_dir, RemoteTransfer};
use tracing::{debug, error, info, instrument, warn};

use super::staging::{batch_file_name, StageMark, StagingWriter};

/// Counters and staging state restored when an invocation aborts
#[derive(Debug, Clone, Copy)]
struct Checkpoint {
    consumed_count: u64,
    stage: StageMark,
}

/// Drains one record per invocation into the staging file and ships the
/// batch once `roll_count` records have been staged.
pub struct BatchEngine {
    staging: StagingWriter,
    destination_folder: String,
    roll_count: u64,
    consumed_count: u64,
    batch_sequence: u64,
}

impl BatchEngine {
    pub fn new(settings: &BatchSettings) -> Self {
        Self {
            staging: StagingWriter::new(&settings.staging_dir, settings.destination_file.clone()),
            destination_folder: settings.destination_folder.clone(),
            roll_count: settings.roll_count.max(1),
            consumed_count: 0,
            batch_sequence: 0,
        }
    }

    /// Records staged since the last successful rollover
    pub fn consumed_count(&self) -> u64 {
        self.consumed_count
    }

    /// Number of batches delivered so far; also the sequence of the next batch
    pub fn batch_sequence(&self) -> u64 {
        self.batch_sequence
    }

    pub fn staging(&self) -> &StagingWriter {
        &self.staging
    }

    /// Remote path for batch `sequence`
    pub fn remote_path(&self, sequence: u64) -> String {
        let name = batch_file_name(sequence, self.staging.template());
        let folder = self.destination_folder.trim_end_matches('/');
        if folder.is_empty() && !self.destination_folder.starts_with('/') {
            name
        } else {
            format!("{}/{}", folder, name)
        }
    }

    /// Move at most one record from `channel` towards the remote side.
    ///
    /// Every call runs exactly one begin/commit-or-rollback cycle and always
    /// closes the transaction. An error means the transaction was rolled back
    /// and the caller should back off.
    #[instrument(skip_all, fields(batch_sequence = self.batch_sequence))]
    pub async fn process<C: Channel>(
        &mut self,
        channel: &C,
        remote: &dyn RemoteTransfer,
    ) -> Result<Status, DeliveryError> {
        let mut txn = match channel.begin().await {
            Ok(txn) => txn,
            Err(e) => {
                let e = SinkError::from(e);
                error!(error = %e, "Failed to begin transaction");
                return Err(delivery_failure(e));
            }
        };

        let result = match self.run(&mut txn, remote).await {
            Ok(status) => Ok(status),
            Err(e) => {
                error!(error = %e, "Error while delivering record, rolling back");
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                }
                Err(delivery_failure(e))
            }
        };

        txn.close().await;
        result
    }

    async fn run<T: Transaction>(
        &mut self,
        txn: &mut T,
        remote: &dyn RemoteTransfer,
    ) -> Result<Status, SinkError> {
        let Some(record) = txn.take().await? else {
            txn.commit().await?;
            return Ok(Status::Backoff);
        };

        let checkpoint = self.checkpoint();

        let rolled_over = match self.stage(&record, remote) {
            Ok(rolled_over) => rolled_over,
            Err(e) => {
                self.restore(checkpoint);
                return Err(e);
            }
        };

        if let Err(e) = txn.commit().await {
            if rolled_over {
                // The batch already left; a redelivered record lands in the next one
                warn!(
                    delivered_sequence = checkpoint.stage.sequence,
                    "Commit failed after batch upload, record may be delivered twice"
                );
            } else {
                self.restore(checkpoint);
            }
            return Err(e.into());
        }

        Ok(Status::Ready)
    }

    /// Stage `record`; returns whether it completed a batch that was shipped
    fn stage(&mut self, record: &Record, remote: &dyn RemoteTransfer) -> Result<bool, SinkError> {
        let data = record.text();
        debug!(data = %data, "Writing data");

        self.staging.append(self.batch_sequence, &data)?;
        self.consumed_count += 1;
        telemetry::record_staged();
        telemetry::set_pending_records(self.consumed_count);
        debug!(consumed = self.consumed_count, roll_count = self.roll_count, "Event staged");

        if self.consumed_count < self.roll_count {
            return Ok(false);
        }

        self.roll_over(remote)?;
        Ok(true)
    }

    #[instrument(skip_all, fields(batch_sequence = self.batch_sequence))]
    fn roll_over(&mut self, remote: &dyn RemoteTransfer) -> Result<(), SinkError> {
        self.staging.finalize_current()?;

        ensure_remote_dir(remote, &self.destination_folder)?;

        let local = self.staging.path_for(self.batch_sequence);
        let destination = self.remote_path(self.batch_sequence);
        info!(
            local = %local.display(),
            destination = %destination,
            "Transferring file"
        );
        remote.upload(&local, &destination)?;

        telemetry::record_batch_uploaded(self.consumed_count);
        self.staging.reset();
        self.consumed_count = 0;
        self.batch_sequence += 1;
        telemetry::set_pending_records(0);
        Ok(())
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            consumed_count: self.consumed_count,
            stage: self.staging.mark(self.batch_sequence),
        }
    }

    /// Undo the staging of a record that is going back to the queue
    fn restore(&mut self, checkpoint: Checkpoint) {
        if let Err(e) = self.staging.rewind(checkpoint.stage) {
            warn!(error = %e, "Failed to truncate staging file, trimming on next append");
        }
        self.consumed_count = checkpoint.consumed_count;
        telemetry::set_pending_records(self.consumed_count);
    }
}

fn delivery_failure(e: SinkError) -> DeliveryError {
    telemetry::record_delivery_failure(e.reason());
    DeliveryError::from(e)
}
