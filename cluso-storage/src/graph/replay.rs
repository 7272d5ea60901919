use tracing::{info, warn};

use cluso_core::error::{Error, Result};

use super::mutation::Mutation;
use super::storage::GraphInner;

impl GraphInner {
    /// Apply every WAL entry logged after `snapshot_lsn`, in LSN order.
    ///
    /// A checksum failure stops recovery with the error: the entries behind it
    /// were acknowledged once and must not be silently dropped.
    pub(super) fn replay_wal(&self, snapshot_lsn: u64) -> Result<u64> {
        let mut replayed = 0u64;

        for entry in self.wal.replay(snapshot_lsn + 1)? {
            let entry = entry.map_err(|e| {
                warn!("WAL replay halted after {} entr(ies): {}", replayed, e);
                e
            })?;

            let mutation = Mutation::from_entry(&entry)?;
            self.apply(&mutation).map_err(|e| Error::Internal {
                message: format!("failed to replay WAL entry {}: {}", entry.lsn, e),
            })?;
            replayed += 1;
        }

        if replayed > 0 {
            info!(
                "Replayed {} WAL entr(ies) after snapshot LSN {}",
                replayed, snapshot_lsn
            );
        }
        self.metrics.record_wal_replayed(replayed);
        Ok(replayed)
    }
}
