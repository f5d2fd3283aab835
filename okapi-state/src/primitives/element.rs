use std::marker::PhantomData;

use super::{Key, Link, Manager};

/// One hashed record: `[ key | next link | value bytes ]`.
///
/// The value bytes are opaque to the hash table; embedding databases define
/// their own layouts on top of [`Element::value_offset`].
pub struct Element<'a, M: Manager, K: Key> {
    manager: &'a M,
    link: M::Link,
    _key: PhantomData<K>,
}

impl<'a, M: Manager, K: Key> Element<'a, M, K> {
    pub(super) fn new(manager: &'a M, link: M::Link) -> Self {
        Self {
            manager,
            link,
            _key: PhantomData,
        }
    }

    /// This element's own link.
    pub fn link(&self) -> M::Link {
        self.link
    }

    pub fn key(&self) -> K {
        let access = self.manager.storage().access();
        K::from_bytes(access.read(self.manager.offset(self.link), K::SIZE as usize))
    }

    /// The next element in this bucket's chain, or the terminal sentinel.
    pub fn next(&self) -> M::Link {
        let access = self.manager.storage().access();
        let offset = self.manager.offset(self.link) + K::SIZE;
        M::Link::read(access.read(offset, M::Link::SIZE as usize))
    }

    pub(super) fn set_next(&self, next: M::Link) {
        let mut word = [0u8; 8];
        next.write(&mut word);

        let access = self.manager.storage().access();
        let offset = self.manager.offset(self.link) + K::SIZE;
        access.write(offset, &word[..M::Link::SIZE as usize]);
    }

    /// The absolute file offset of the value bytes.
    pub fn value_offset(&self) -> u64 {
        self.manager.offset(self.link) + K::SIZE + M::Link::SIZE
    }

    /// Read the value bytes through `reader`.
    ///
    /// The slice extends to the end of the mapped region; readers parse the
    /// prefix they expect.
    pub fn read<T>(&self, reader: impl FnOnce(&[u8]) -> T) -> T {
        let access = self.manager.storage().access();
        reader(access.read_from(self.value_offset()))
    }
}
