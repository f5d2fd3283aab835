//! Memory-mapped file storage.

mod file_storage;

pub use file_storage::{Accessor, FileStorage};
