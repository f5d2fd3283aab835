use std::cmp;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::trace;

use crate::error::Result;

struct Map {
    mmap: MmapMut,
    /// Base pointer of `mmap`, captured at map time so accessors can write
    /// through a shared guard.
    ptr: *mut u8,
    /// The mapped length; the backing file is exactly this large while open.
    capacity: u64,
    /// High-water mark excluding expansion padding. The file is truncated
    /// back to this size on close so padding never persists.
    logical_size: u64,
}

// The raw pointer aliases the mapping owned by the same struct; it is only
// dereferenced while the enclosing lock guard proves the mapping is alive.
unsafe impl Send for Map {}
unsafe impl Sync for Map {}

/// A growable memory-mapped byte arena.
///
/// Readers pin the current mapping with [`FileStorage::access`]; `resize`
/// and `reserve` wait for all outstanding accessors to release before
/// remapping. Writing through an accessor is allowed, but concurrent
/// writers must target disjoint ranges: the slot allocators and the
/// database metadata mutexes above this layer enforce that.
pub struct FileStorage {
    path: PathBuf,
    file: File,
    expansion: u16,
    map: RwLock<Map>,
}

impl FileStorage {
    /// Open or create the backing file, size it to at least `minimum`
    /// bytes, and map it.
    ///
    /// `expansion` is the reserve-time growth padding, in percent.
    pub fn open(path: &Path, minimum: u64, expansion: u16) -> Result<FileStorage> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let length = file.metadata()?.len();
        let capacity = cmp::max(length, cmp::max(minimum, 1));
        if capacity != length {
            file.set_len(capacity)?;
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let ptr = mmap.as_mut_ptr();

        trace!(path = ?path, capacity, "mapped file");

        Ok(FileStorage {
            path: path.to_owned(),
            file,
            expansion,
            map: RwLock::new(Map {
                mmap,
                ptr,
                capacity,
                logical_size: capacity,
            }),
        })
    }

    /// The currently mapped length, in bytes.
    pub fn capacity(&self) -> u64 {
        self.map.read().capacity
    }

    /// Pin the current mapping for reading and writing.
    ///
    /// The recursive read acquisition keeps an accessor-holding thread from
    /// deadlocking against a queued remap when it briefly pins the mapping
    /// a second time.
    pub fn access(&self) -> Accessor<'_> {
        Accessor {
            map: self.map.read_recursive(),
        }
    }

    /// Truncate or grow the file to exactly `size` bytes and remap.
    pub fn resize(&self, size: u64) -> Result<()> {
        let mut map = self.map.write();
        self.remap(&mut map, size)?;
        map.logical_size = size;
        Ok(())
    }

    /// Grow the file so that at least `size` bytes are mapped.
    ///
    /// Growth applies the expansion policy: the new capacity is the larger
    /// of `size` and the current capacity padded by the growth rate. A
    /// request at or below the current capacity does not change the file.
    pub fn reserve(&self, size: u64) -> Result<()> {
        let mut map = self.map.write();

        if size > map.capacity {
            let padded = map.capacity * (100 + self.expansion as u64) / 100;
            self.remap(&mut map, cmp::max(size, padded))?;
        }

        map.logical_size = cmp::max(map.logical_size, size);
        Ok(())
    }

    /// Synchronize the mapping with the backing file.
    pub fn flush(&self) -> Result<()> {
        self.map.read().mmap.flush()?;
        Ok(())
    }

    /// Flush and truncate the file back to its logical size, discarding
    /// expansion padding.
    pub fn close(&self) -> Result<()> {
        let map = self.map.write();
        map.mmap.flush()?;
        self.file.set_len(map.logical_size)?;
        trace!(path = ?self.path, size = map.logical_size, "closed file");
        Ok(())
    }

    fn remap(&self, map: &mut Map, size: u64) -> Result<()> {
        let size = cmp::max(size, 1);
        self.file.set_len(size)?;

        let mut mmap = unsafe { MmapMut::map_mut(&self.file)? };
        map.ptr = mmap.as_mut_ptr();
        map.mmap = mmap;
        map.capacity = size;
        Ok(())
    }
}

/// A pinned view of the mapping.
///
/// Holding an accessor blocks remaps, so file regions read through it stay
/// valid exactly as long as the accessor lives. Accessors must not outlive
/// the calling scope.
pub struct Accessor<'a> {
    map: RwLockReadGuard<'a, Map>,
}

impl<'a> Accessor<'a> {
    /// The mapped length, in bytes.
    pub fn len(&self) -> u64 {
        self.map.capacity
    }

    /// Read `len` bytes starting at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.map.mmap[start..start + len]
    }

    /// Read from `offset` to the end of the mapping.
    pub fn read_from(&self, offset: u64) -> &[u8] {
        &self.map.mmap[offset as usize..]
    }

    /// Copy `data` into the mapping at `offset`.
    ///
    /// Concurrent writes must target disjoint ranges; the callers' locks
    /// enforce that.
    pub fn write(&self, offset: u64, data: &[u8]) {
        assert!(
            offset + data.len() as u64 <= self.map.capacity,
            "write past the mapped region"
        );

        // Safe per the range-disjointness contract above: the mapping is
        // alive for the guard's lifetime and no other thread touches these
        // bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.map.ptr.add(offset as usize), data.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn storage(dir: &TempDir, minimum: u64, expansion: u16) -> FileStorage {
        FileStorage::open(&dir.path().join("file"), minimum, expansion).unwrap()
    }

    #[test]
    fn open_sizes_file_to_minimum() {
        let dir = TempDir::new("file_storage").unwrap();
        let instance = storage(&dir, 42, 0);
        assert_eq!(instance.capacity(), 42);
    }

    #[test]
    fn resize_sets_exact_capacity() {
        let dir = TempDir::new("file_storage").unwrap();
        let instance = storage(&dir, 1, 50);
        instance.resize(42).unwrap();
        assert_eq!(instance.capacity(), 42);
    }

    #[test]
    fn reserve_within_capacity_does_not_grow() {
        let dir = TempDir::new("file_storage").unwrap();
        let instance = storage(&dir, 100, 50);
        instance.reserve(42).unwrap();
        assert_eq!(instance.capacity(), 100);
    }

    #[test]
    fn reserve_without_growth_rate_grows_exactly() {
        let dir = TempDir::new("file_storage").unwrap();
        let instance = storage(&dir, 1, 0);
        instance.reserve(100).unwrap();
        assert_eq!(instance.capacity(), 100);
    }

    #[test]
    fn reserve_pads_by_growth_rate() {
        let dir = TempDir::new("file_storage").unwrap();
        let instance = storage(&dir, 100, 50);
        instance.reserve(101).unwrap();
        // max(101, 100 * 150%) = 150
        assert_eq!(instance.capacity(), 150);
    }

    #[test]
    fn close_truncates_expansion_padding() {
        let dir = TempDir::new("file_storage").unwrap();
        let path = dir.path().join("file");
        let instance = FileStorage::open(&path, 100, 50).unwrap();
        instance.reserve(101).unwrap();
        assert_eq!(instance.capacity(), 150);
        instance.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 101);
    }

    #[test]
    fn write_read_roundtrip_survives_reopen() {
        let dir = TempDir::new("file_storage").unwrap();
        let path = dir.path().join("file");
        let expected = 0x0102_0304_0506_0708u64.to_le_bytes();

        {
            let instance = FileStorage::open(&path, 8, 0).unwrap();
            instance.access().write(0, &expected);
            instance.flush().unwrap();
            instance.close().unwrap();
        }

        let instance = FileStorage::open(&path, 8, 0).unwrap();
        assert_eq!(instance.access().read(0, 8), &expected);
    }

    #[test]
    fn concurrent_accessors_coexist() {
        let dir = TempDir::new("file_storage").unwrap();
        let instance = storage(&dir, 16, 0);
        let first = instance.access();
        let second = instance.access();
        assert_eq!(first.len(), second.len());
    }
}
