use cairn_types::{Block, Cid};

use crate::error::StoreResult;

/// Durable mapping from CID to block bytes.
///
/// All implementations must satisfy these invariants:
/// - `put` is idempotent: storing a block whose CID is already present is a
///   no-op returning success.
/// - `put_many` is atomic at the batch boundary: either every block in the
///   batch becomes visible or none does.
/// - `has`/`get` may run concurrently with `put`; once `has` observes a CID,
///   a subsequent `get` in the same process returns the block.
/// - Blocks are verified before they reach the store; the store never
///   re-interprets their contents.
pub trait Blockstore: Send + Sync {
    /// Store a block. No-op if the CID is already present.
    fn put(&self, block: Block) -> StoreResult<()>;

    /// Store a batch of blocks atomically.
    ///
    /// Default implementation takes the lock once per block; backends with a
    /// real batch path should override.
    fn put_many(&self, blocks: Vec<Block>) -> StoreResult<()> {
        for block in blocks {
            self.put(block)?;
        }
        Ok(())
    }

    /// Fetch a block, or `NotFound`.
    fn get(&self, cid: &Cid) -> StoreResult<Block>;

    /// Whether a block is present.
    fn has(&self, cid: &Cid) -> StoreResult<bool>;

    /// Delete a block. Deleting an absent CID is a no-op.
    fn delete(&self, cid: &Cid) -> StoreResult<()>;

    /// Snapshot iterator over every stored CID.
    ///
    /// Finite and not restartable: each call takes a fresh snapshot; blocks
    /// stored after the call may or may not appear.
    fn all_keys(&self) -> StoreResult<Box<dyn Iterator<Item = Cid> + Send>>;
}
