use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;

use super::{Element, Key, Link, Manager};

/// A file-backed hash table: closed-addressed buckets over singly-linked
/// element chains.
///
/// Layout: a bucket array of `buckets × Link::SIZE` little-endian entries
/// (the manager's embedder header), immediately followed by the manager's
/// region. Each bucket holds the head link of its collision chain, or the
/// terminal sentinel when empty.
///
/// A key's bucket is its first four little-endian bytes modulo the bucket
/// count. This distributes well only for uniformly random keys, which holds
/// for the cryptographic hashes used here.
///
/// Many readers may walk chains while a single writer links or unlinks:
/// a new element becomes reachable only when its bucket head is rewritten,
/// after the body is fully written.
pub struct HashTable<M: Manager, K: Key> {
    manager: M,
    buckets: u64,
    _key: PhantomData<K>,
}

impl<M: Manager, K: Key> HashTable<M, K> {
    /// The embedder header size for a bucket count, used to position the
    /// manager region.
    pub fn header_size(buckets: u64) -> u64 {
        buckets * M::Link::SIZE
    }

    pub fn new(manager: M, buckets: u64) -> Self {
        assert!(buckets > 0, "hash tables need at least one bucket");

        Self {
            manager,
            buckets,
            _key: PhantomData,
        }
    }

    /// Initialize the bucket array and the manager region.
    pub fn create(&self) -> Result<()> {
        self.manager.create()?;

        let access = self.manager.storage().access();
        let mut word = [0u8; 8];
        M::Link::NOT_ALLOCATED.write(&mut word);
        for bucket in 0..self.buckets {
            access.write(bucket * M::Link::SIZE, &word[..M::Link::SIZE as usize]);
        }

        Ok(())
    }

    /// Prepare an existing table for use.
    pub fn start(&self) -> Result<()> {
        self.manager.start()
    }

    /// Persist the manager watermark.
    pub fn commit(&self) -> Result<()> {
        self.manager.commit()
    }

    /// The element at `link`, bypassing the bucket walk.
    ///
    /// The link must come from this table; it is not range-checked.
    pub fn get(&self, link: M::Link) -> Element<'_, M, K> {
        Element::new(&self.manager, link)
    }

    /// Walk `key`'s bucket chain and return the first matching element.
    pub fn find(&self, key: &K) -> Option<Element<'_, M, K>> {
        let mut link = self.bucket_head(self.bucket_index(key));

        while !link.is_terminal() {
            // A link at or past the watermark would be corruption; treat the
            // chain as ending there.
            debug_assert!(!self.manager.past_eof(link));
            if self.manager.past_eof(link) {
                return None;
            }

            let element = Element::new(&self.manager, link);
            if element.key() == *key {
                return Some(element);
            }

            link = element.next();
        }

        None
    }

    /// Allocate a new unlinked element for `key`, filling the value bytes
    /// through `writer`. The element is unreachable until passed to
    /// [`HashTable::link`].
    pub fn allocate(
        &self,
        key: &K,
        value_size: u64,
        writer: impl FnOnce(&mut [u8]),
    ) -> Result<Element<'_, M, K>> {
        let size = K::SIZE + M::Link::SIZE + value_size;
        let link = self.manager.allocate(size)?;

        let mut buffer = vec![0u8; size as usize];
        buffer[..K::SIZE as usize].copy_from_slice(key.as_bytes());
        M::Link::NOT_ALLOCATED.write(&mut buffer[K::SIZE as usize..]);
        writer(&mut buffer[(K::SIZE + M::Link::SIZE) as usize..]);

        let access = self.manager.storage().access();
        access.write(self.manager.offset(link), &buffer);

        Ok(Element::new(&self.manager, link))
    }

    /// Splice `element` onto the head of its bucket's chain.
    ///
    /// The order matters: the element's next pointer is set first, so
    /// readers only ever observe the element once it is fully wired.
    pub fn link(&self, element: &Element<'_, M, K>) {
        let bucket = self.bucket_index(&element.key());
        element.set_next(self.bucket_head(bucket));
        self.set_bucket_head(bucket, element.link());
    }

    /// Remove the first element matching `key` from its chain.
    ///
    /// Returns whether a match was unlinked. Physical space is not
    /// reclaimed.
    pub fn unlink(&self, key: &K) -> bool {
        let bucket = self.bucket_index(key);
        let mut link = self.bucket_head(bucket);
        let mut previous: Option<Element<'_, M, K>> = None;

        while !link.is_terminal() {
            if self.manager.past_eof(link) {
                return false;
            }

            let element = Element::new(&self.manager, link);
            if element.key() == *key {
                match previous {
                    None => self.set_bucket_head(bucket, element.next()),
                    Some(predecessor) => predecessor.set_next(element.next()),
                }
                return true;
            }

            link = element.next();
            previous = Some(element);
        }

        false
    }

    fn bucket_index(&self, key: &K) -> u64 {
        LittleEndian::read_u32(&key.as_bytes()[..4]) as u64 % self.buckets
    }

    fn bucket_head(&self, bucket: u64) -> M::Link {
        let access = self.manager.storage().access();
        M::Link::read(access.read(bucket * M::Link::SIZE, M::Link::SIZE as usize))
    }

    fn set_bucket_head(&self, bucket: u64, link: M::Link) {
        let mut word = [0u8; 8];
        link.write(&mut word);
        let access = self.manager.storage().access();
        access.write(bucket * M::Link::SIZE, &word[..M::Link::SIZE as usize]);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempdir::TempDir;

    use okapi_chain::transaction;

    use crate::memory::FileStorage;
    use crate::primitives::{RecordManager, SlabManager};

    use super::*;

    const VALUE_SIZE: u64 = 8;

    fn record_table(dir: &TempDir, buckets: u64) -> HashTable<RecordManager<u32>, transaction::Hash> {
        let file = Arc::new(FileStorage::open(&dir.path().join("table"), 1, 0).unwrap());
        let header = HashTable::<RecordManager<u32>, transaction::Hash>::header_size(buckets);
        let manager = RecordManager::new(file, header, 32 + 4 + VALUE_SIZE);
        let table = HashTable::new(manager, buckets);
        table.create().unwrap();
        table
    }

    fn slab_table(dir: &TempDir, buckets: u64) -> HashTable<SlabManager<u64>, transaction::Hash> {
        let file = Arc::new(FileStorage::open(&dir.path().join("slab_table"), 1, 0).unwrap());
        let header = HashTable::<SlabManager<u64>, transaction::Hash>::header_size(buckets);
        let manager = SlabManager::new(file, header);
        let table = HashTable::new(manager, buckets);
        table.create().unwrap();
        table
    }

    fn key(fill: u8) -> transaction::Hash {
        transaction::Hash([fill; 32])
    }

    /// A key landing in the same bucket as `key(fill)` for small tables.
    fn colliding_key(fill: u8, suffix: u8) -> transaction::Hash {
        let mut bytes = [suffix; 32];
        bytes[..4].copy_from_slice(&[fill; 4]);
        transaction::Hash(bytes)
    }

    #[test]
    fn find_on_empty_bucket_is_terminal() {
        let dir = TempDir::new("hash_table").unwrap();
        let table = record_table(&dir, 16);
        assert!(table.find(&key(7)).is_none());
    }

    #[test]
    fn linked_element_is_found() {
        let dir = TempDir::new("hash_table").unwrap();
        let table = record_table(&dir, 16);

        let element = table
            .allocate(&key(7), VALUE_SIZE, |value| value.copy_from_slice(b"sevenson"))
            .unwrap();
        table.link(&element);

        let found = table.find(&key(7)).expect("element is linked");
        assert_eq!(found.key(), key(7));
        found.read(|value| assert_eq!(&value[..8], b"sevenson"));
    }

    #[test]
    fn unlinked_element_is_invisible() {
        let dir = TempDir::new("hash_table").unwrap();
        let table = record_table(&dir, 16);

        table
            .allocate(&key(9), VALUE_SIZE, |value| value.copy_from_slice(b"unlinked"))
            .unwrap();

        assert!(table.find(&key(9)).is_none());
    }

    #[test]
    fn colliding_keys_share_a_chain() {
        let dir = TempDir::new("hash_table").unwrap();
        let table = record_table(&dir, 16);

        let first = colliding_key(3, 0xaa);
        let second = colliding_key(3, 0xbb);

        for (key, value) in &[(first, b"firstval"), (second, b"secondvl")] {
            let element = table
                .allocate(key, VALUE_SIZE, |bytes| bytes.copy_from_slice(&value[..]))
                .unwrap();
            table.link(&element);
        }

        let found_first = table.find(&first).expect("first key resolves");
        let found_second = table.find(&second).expect("second key resolves");
        assert_ne!(found_first.link(), found_second.link());

        // Chain order is most-recent-first.
        assert_eq!(found_second.next(), found_first.link());
        assert!(found_first.next().is_terminal());
    }

    #[test]
    fn unlink_skips_the_match() {
        let dir = TempDir::new("hash_table").unwrap();
        let table = record_table(&dir, 16);

        let first = colliding_key(5, 0x11);
        let second = colliding_key(5, 0x22);

        for key in &[first, second] {
            let element = table.allocate(key, VALUE_SIZE, |_| {}).unwrap();
            table.link(&element);
        }

        assert!(table.unlink(&first));
        assert!(table.find(&first).is_none());
        assert!(table.find(&second).is_some());
        assert!(!table.unlink(&first));
    }

    #[test]
    fn slab_elements_vary_in_size() {
        let dir = TempDir::new("hash_table").unwrap();
        let table = slab_table(&dir, 8);

        let small = key(1);
        let large = key(2);

        let element = table
            .allocate(&small, 3, |value| value.copy_from_slice(b"abc"))
            .unwrap();
        table.link(&element);

        let element = table
            .allocate(&large, 100, |value| value[..5].copy_from_slice(b"hello"))
            .unwrap();
        table.link(&element);

        table.find(&small).unwrap().read(|value| assert_eq!(&value[..3], b"abc"));
        table.find(&large).unwrap().read(|value| assert_eq!(&value[..5], b"hello"));
    }

    #[test]
    fn table_survives_commit_and_start() {
        let dir = TempDir::new("hash_table").unwrap();
        let table = record_table(&dir, 16);

        let element = table
            .allocate(&key(4), VALUE_SIZE, |value| value.copy_from_slice(b"durable!"))
            .unwrap();
        table.link(&element);
        table.commit().unwrap();

        table.start().unwrap();
        assert!(table.find(&key(4)).is_some());
    }
}
