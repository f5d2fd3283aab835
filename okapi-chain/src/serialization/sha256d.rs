//! The double-SHA256 hash used for block and transaction ids.

use std::io;

use sha2::{Digest, Sha256};

/// An `io::Write` sink that computes SHA256(SHA256(input)).
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Writer {
    /// Consume the writer and produce the double hash.
    pub fn finish(self) -> [u8; 32] {
        let first = self.hash.finalize();
        let second = Sha256::digest(&first);
        let mut result = [0u8; 32];
        result.copy_from_slice(&second);
        result
    }
}

/// Double-hash a byte slice in one call.
pub fn hash(data: &[u8]) -> [u8; 32] {
    use io::Write;

    let mut writer = Writer::default();
    writer.write_all(data).expect("sha256d::Writer is infallible");
    writer.finish()
}
