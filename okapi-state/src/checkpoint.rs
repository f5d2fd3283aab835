use okapi_chain::block;

/// A (hash, height) pair naming one block on a chain.
///
/// Reorganizations are described by their fork point: the last checkpoint
/// shared between the outgoing and incoming chains.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub hash: block::Hash,
    pub height: u32,
}

impl Checkpoint {
    pub fn new(hash: block::Hash, height: u32) -> Self {
        Self { hash, height }
    }
}
