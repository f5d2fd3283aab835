use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::memory::FileStorage;

use super::{Link, Manager, WATERMARK_SIZE};

/// An append-only allocator of fixed-size records, addressed by a
/// monotonically increasing record index.
///
/// File layout: `[ header | record count (u64 LE) | records ]`. The record
/// count is the watermark, in record units.
pub struct RecordManager<L> {
    file: Arc<FileStorage>,
    header_size: u64,
    record_size: u64,
    records: RwLock<u64>,
    _link: PhantomData<L>,
}

impl<L: Link> RecordManager<L> {
    pub fn new(file: Arc<FileStorage>, header_size: u64, record_size: u64) -> Self {
        assert!(record_size > 0, "records must have a size");

        Self {
            file,
            header_size,
            record_size,
            records: RwLock::new(0),
            _link: PhantomData,
        }
    }

    /// Initialize an empty region: zero records.
    pub fn create(&self) -> Result<()> {
        let mut records = self.records.write();
        *records = 0;
        self.file.reserve(self.header_size + WATERMARK_SIZE)?;
        self.write_watermark(*records);
        Ok(())
    }

    /// Reread the persisted record count.
    pub fn start(&self) -> Result<()> {
        let mut records = self.records.write();
        let access = self.file.access();

        if self.header_size + WATERMARK_SIZE > access.len() {
            return Err(Error::OperationFailed);
        }

        let count = u64::read(access.read(self.header_size, WATERMARK_SIZE as usize));
        if self.record_offset(count) > access.len() {
            return Err(Error::OperationFailed);
        }

        *records = count;
        Ok(())
    }

    /// Persist the current record count.
    pub fn commit(&self) -> Result<()> {
        self.write_watermark(*self.records.read());
        Ok(())
    }

    /// The number of allocated records (the watermark).
    pub fn count(&self) -> u64 {
        *self.records.read()
    }

    /// Allocate `count` records and return the index of the first.
    ///
    /// Commit after writing the bodies. On failure the watermark is
    /// unchanged and the allocation never happened.
    pub fn allocate(&self, count: u64) -> Result<L> {
        let mut records = self.records.write();
        let position = *records;
        self.file.reserve(self.record_offset(position + count))?;
        *records = position + count;
        Ok(L::from_u64(position))
    }

    /// Roll the watermark back to `count` records.
    ///
    /// Used by the height indexes, which pop strictly from the top.
    pub fn truncate(&self, count: u64) {
        let mut records = self.records.write();
        debug_assert!(count <= *records);
        *records = count;
    }

    /// The absolute file offset of record `link`.
    pub fn offset(&self, link: L) -> u64 {
        self.record_offset(link.as_u64())
    }

    /// Whether `link` points past the watermark.
    pub fn past_eof(&self, link: L) -> bool {
        link.as_u64() >= *self.records.read()
    }

    pub fn storage(&self) -> &FileStorage {
        &self.file
    }

    fn record_offset(&self, record: u64) -> u64 {
        self.header_size + WATERMARK_SIZE + record * self.record_size
    }

    fn write_watermark(&self, count: u64) {
        let mut word = [0u8; WATERMARK_SIZE as usize];
        count.write(&mut word);
        self.file.access().write(self.header_size, &word);
    }
}

impl<L: Link> Manager for RecordManager<L> {
    type Link = L;

    fn create(&self) -> Result<()> {
        RecordManager::create(self)
    }

    fn start(&self) -> Result<()> {
        RecordManager::start(self)
    }

    fn commit(&self) -> Result<()> {
        RecordManager::commit(self)
    }

    fn allocate(&self, size: u64) -> Result<L> {
        debug_assert_eq!(size, self.record_size, "element size must match the record size");
        RecordManager::allocate(self, 1)
    }

    fn offset(&self, link: L) -> u64 {
        RecordManager::offset(self, link)
    }

    fn past_eof(&self, link: L) -> bool {
        RecordManager::past_eof(self, link)
    }

    fn storage(&self) -> &FileStorage {
        RecordManager::storage(self)
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn manager(dir: &TempDir) -> RecordManager<u32> {
        let file = Arc::new(FileStorage::open(&dir.path().join("records"), 1, 0).unwrap());
        RecordManager::new(file, 0, 4)
    }

    #[test]
    fn allocate_advances_watermark() {
        let dir = TempDir::new("record_manager").unwrap();
        let manager = manager(&dir);
        manager.create().unwrap();

        assert_eq!(manager.allocate(1).unwrap(), 0);
        assert_eq!(manager.allocate(3).unwrap(), 1);
        assert_eq!(manager.count(), 4);
    }

    #[test]
    fn allocate_zero_leaves_watermark_unchanged() {
        let dir = TempDir::new("record_manager").unwrap();
        let manager = manager(&dir);
        manager.create().unwrap();

        manager.allocate(2).unwrap();
        assert_eq!(manager.allocate(0).unwrap(), 2);
        assert_eq!(manager.count(), 2);
    }

    #[test]
    fn watermark_survives_commit_and_start() {
        let dir = TempDir::new("record_manager").unwrap();
        let manager = manager(&dir);
        manager.create().unwrap();

        manager.allocate(5).unwrap();
        manager.commit().unwrap();

        manager.truncate(0);
        manager.start().unwrap();
        assert_eq!(manager.count(), 5);
    }

    #[test]
    fn uncommitted_allocation_is_invisible_after_start() {
        let dir = TempDir::new("record_manager").unwrap();
        let manager = manager(&dir);
        manager.create().unwrap();

        manager.allocate(2).unwrap();
        manager.commit().unwrap();
        manager.allocate(3).unwrap();

        // The last commit saw two records; the three above it are not
        // durable.
        manager.start().unwrap();
        assert_eq!(manager.count(), 2);
    }

    #[test]
    fn truncate_rolls_back() {
        let dir = TempDir::new("record_manager").unwrap();
        let manager = manager(&dir);
        manager.create().unwrap();

        manager.allocate(3).unwrap();
        manager.truncate(2);
        assert_eq!(manager.count(), 2);
        assert!(manager.past_eof(2));
        assert!(!manager.past_eof(1));
    }
}
