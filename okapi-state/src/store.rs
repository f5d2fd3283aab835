//! The store directory: file layout and process-level locks.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// Directory layout. All managed files live directly under the configured
// directory.
pub(crate) const BLOCK_TABLE: &str = "block_table";
pub(crate) const CANDIDATE_INDEX: &str = "candidate_index";
pub(crate) const CONFIRMED_INDEX: &str = "confirmed_index";
pub(crate) const TRANSACTION_INDEX: &str = "transaction_index";
pub(crate) const TRANSACTION_TABLE: &str = "transaction_table";
pub(crate) const PAYMENT_TABLE: &str = "payment_table";
pub(crate) const PAYMENT_INDEX: &str = "payment_index";
pub(crate) const NEUTRINO_FILTER_TABLE: &str = "neutrino_filter_table";
const FLUSH_LOCK: &str = "flush_lock";
const EXCLUSIVE_LOCK: &str = "exclusive_lock";

/// Exclusive access to a store directory, plus the conditional
/// flush-per-write discipline.
///
/// The exclusive lock is an advisory file lock held for the lifetime of the
/// store, keeping a second process out. The flush lock is a sentinel file
/// created at the start of every flushed write and removed after a
/// successful flush: if it is present on open, a previous run died
/// mid-write and the store contents cannot be trusted.
pub struct Store {
    directory: PathBuf,
    flush_each_write: bool,
    exclusive: File,
}

impl Store {
    /// Lock `directory` for this process.
    ///
    /// Fails with [`Error::UncleanShutdown`] if the flush sentinel is
    /// present, and [`Error::StoreLockFailure`] if another process holds
    /// the directory.
    pub fn open(directory: &Path, flush_each_write: bool) -> Result<Store> {
        fs::create_dir_all(directory)?;

        if directory.join(FLUSH_LOCK).exists() {
            warn!(directory = ?directory, "flush lock present: unclean shutdown");
            return Err(Error::UncleanShutdown);
        }

        let exclusive = OpenOptions::new()
            .write(true)
            .create(true)
            .open(directory.join(EXCLUSIVE_LOCK))?;

        exclusive
            .try_lock_exclusive()
            .map_err(|_| Error::StoreLockFailure)?;

        debug!(directory = ?directory, flush_each_write, "store locked");

        Ok(Store {
            directory: directory.to_owned(),
            flush_each_write,
            exclusive,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn flush_each_write(&self) -> bool {
        self.flush_each_write
    }

    /// Engage the flush lock if per-write flushing is enabled.
    pub fn begin_write(&self) -> Result<()> {
        if self.flush_each_write {
            File::create(self.directory.join(FLUSH_LOCK)).map_err(|_| Error::StoreLockFailure)?;
        }

        Ok(())
    }

    /// Release the flush lock after a successful flush.
    ///
    /// Callers must flush first; a failure before this call intentionally
    /// leaves the sentinel on disk so the next open refuses the store.
    pub fn end_write(&self) -> Result<()> {
        if self.flush_each_write {
            fs::remove_file(self.directory.join(FLUSH_LOCK))
                .map_err(|_| Error::StoreLockFailure)?;
        }

        Ok(())
    }

    /// Release the exclusive lock.
    pub fn close(&self) -> Result<()> {
        self.exclusive.unlock()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn open_locks_out_second_store() {
        let dir = TempDir::new("store").unwrap();
        let _store = Store::open(dir.path(), false).unwrap();

        match Store::open(dir.path(), false) {
            Err(Error::StoreLockFailure) => {}
            other => panic!("expected lock failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn close_releases_the_lock() {
        let dir = TempDir::new("store").unwrap();
        let store = Store::open(dir.path(), false).unwrap();
        store.close().unwrap();
        drop(store);

        assert!(Store::open(dir.path(), false).is_ok());
    }

    #[test]
    fn write_bracket_toggles_the_sentinel() {
        let dir = TempDir::new("store").unwrap();
        let store = Store::open(dir.path(), true).unwrap();

        store.begin_write().unwrap();
        assert!(dir.path().join("flush_lock").exists());
        store.end_write().unwrap();
        assert!(!dir.path().join("flush_lock").exists());
    }

    #[test]
    fn abandoned_write_blocks_reopen() {
        let dir = TempDir::new("store").unwrap();
        {
            let store = Store::open(dir.path(), true).unwrap();
            store.begin_write().unwrap();
            // No end_write: simulates dying mid-write.
            store.close().unwrap();
        }

        match Store::open(dir.path(), true) {
            Err(Error::UncleanShutdown) => {}
            other => panic!("expected unclean shutdown, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unflushed_mode_skips_the_sentinel() {
        let dir = TempDir::new("store").unwrap();
        let store = Store::open(dir.path(), false).unwrap();
        store.begin_write().unwrap();
        assert!(!dir.path().join("flush_lock").exists());
    }
}
