//! WAL replay at open.
//!
//! SSTables are already loaded by [`LevelManager::load`](crate::levels::LevelManager::load)
//! by the time this runs; the WAL only holds writes that never reached one.

use anyhow::{Context, Result};
use memtable::InsertOutcome;
use tracing::info;

use crate::Engine;

impl Engine {
    /// Replays the WAL into the memtable in log order.
    ///
    /// A log longer than the memtable threshold is flushed to level 0 as it
    /// replays. In that case the remainder is flushed too before the WAL is
    /// truncated, so a crash during recovery at worst writes the same records
    /// twice; equal timestamps make the copies interchangeable.
    pub(crate) fn recover(&mut self) -> Result<()> {
        let entries = self
            .wal
            .read_all()
            .with_context(|| format!("replaying {}", self.wal.path().display()))?;
        if entries.is_empty() {
            return Ok(());
        }

        let replayed = entries.len();
        let mut flushed_mid_replay = false;
        for entry in entries {
            self.last_ts = self.last_ts.max(entry.record.timestamp);
            if self.mem.insert(entry.record) == InsertOutcome::FlushRequired {
                let records = self.mem.flush();
                self.levels.flush_to_disk(&records)?;
                flushed_mid_replay = true;
            }
        }

        if flushed_mid_replay {
            if !self.mem.is_empty() {
                let records = self.mem.flush();
                self.levels.flush_to_disk(&records)?;
            }
            self.wal.truncate()?;
        }

        info!(
            entries = replayed,
            memtable = self.mem.len(),
            flushed = flushed_mid_replay,
            "replayed WAL"
        );
        Ok(())
    }
}
