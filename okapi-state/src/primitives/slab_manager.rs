use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::memory::FileStorage;

use super::{Link, Manager, WATERMARK_SIZE};

/// An append-only allocator of variable-size slabs, addressed by byte
/// offset within the payload region.
///
/// File layout: `[ header | payload size (u64 LE) | slabs ]`. The payload
/// size counts the watermark word itself, so the first slab sits at offset
/// `WATERMARK_SIZE` and offset zero is never a valid link.
pub struct SlabManager<L> {
    file: Arc<FileStorage>,
    header_size: u64,
    payload: RwLock<u64>,
    _link: PhantomData<L>,
}

impl<L: Link> SlabManager<L> {
    pub fn new(file: Arc<FileStorage>, header_size: u64) -> Self {
        Self {
            file,
            header_size,
            payload: RwLock::new(WATERMARK_SIZE),
            _link: PhantomData,
        }
    }

    /// Initialize an empty region: no slabs.
    pub fn create(&self) -> Result<()> {
        let mut payload = self.payload.write();
        *payload = WATERMARK_SIZE;
        self.file.reserve(self.header_size + WATERMARK_SIZE)?;
        self.write_watermark(*payload);
        Ok(())
    }

    /// Reread the persisted payload size.
    pub fn start(&self) -> Result<()> {
        let mut payload = self.payload.write();
        let access = self.file.access();

        if self.header_size + WATERMARK_SIZE > access.len() {
            return Err(Error::OperationFailed);
        }

        let size = u64::read(access.read(self.header_size, WATERMARK_SIZE as usize));
        if size < WATERMARK_SIZE || self.header_size + size > access.len() {
            return Err(Error::OperationFailed);
        }

        *payload = size;
        Ok(())
    }

    /// Persist the current payload size.
    pub fn commit(&self) -> Result<()> {
        self.write_watermark(*self.payload.read());
        Ok(())
    }

    /// The size of all slabs plus the watermark word (the watermark).
    pub fn payload_size(&self) -> u64 {
        *self.payload.read()
    }

    /// Allocate a slab of `size` bytes and return its offset.
    ///
    /// Commit after writing the body. On failure the watermark is unchanged
    /// and the allocation never happened.
    pub fn allocate(&self, size: u64) -> Result<L> {
        let mut payload = self.payload.write();
        let position = *payload;
        self.file.reserve(self.header_size + position + size)?;
        *payload = position + size;
        Ok(L::from_u64(position))
    }

    /// The absolute file offset of slab `link`.
    pub fn offset(&self, link: L) -> u64 {
        self.header_size + link.as_u64()
    }

    /// Whether `link` points past the watermark.
    pub fn past_eof(&self, link: L) -> bool {
        link.as_u64() >= *self.payload.read()
    }

    pub fn storage(&self) -> &FileStorage {
        &self.file
    }

    fn write_watermark(&self, size: u64) {
        let mut word = [0u8; WATERMARK_SIZE as usize];
        size.write(&mut word);
        self.file.access().write(self.header_size, &word);
    }
}

impl<L: Link> Manager for SlabManager<L> {
    type Link = L;

    fn create(&self) -> Result<()> {
        SlabManager::create(self)
    }

    fn start(&self) -> Result<()> {
        SlabManager::start(self)
    }

    fn commit(&self) -> Result<()> {
        SlabManager::commit(self)
    }

    fn allocate(&self, size: u64) -> Result<L> {
        SlabManager::allocate(self, size)
    }

    fn offset(&self, link: L) -> u64 {
        SlabManager::offset(self, link)
    }

    fn past_eof(&self, link: L) -> bool {
        SlabManager::past_eof(self, link)
    }

    fn storage(&self) -> &FileStorage {
        SlabManager::storage(self)
    }
}
