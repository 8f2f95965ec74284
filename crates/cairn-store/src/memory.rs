use std::collections::HashMap;
use std::sync::RwLock;

use tracing::trace;

use cairn_types::{Block, Cid, MAX_BLOCK_SIZE};

use crate::error::{StoreError, StoreResult};
use crate::traits::Blockstore;

/// In-memory, HashMap-based blockstore.
///
/// The reference implementation of the [`Blockstore`] contract; also what
/// tests and embedded nodes run on. All blocks are held behind a single
/// `RwLock`, which gives the batch path its atomicity for free.
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Cid, Block>>,
}

impl MemoryBlockstore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blocks.
    pub fn total_bytes(&self) -> u64 {
        self.blocks
            .read()
            .expect("lock poisoned")
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }

    fn check_size(block: &Block) -> StoreResult<()> {
        if block.len() > MAX_BLOCK_SIZE {
            return Err(StoreError::OverSize {
                cid: *block.cid(),
                size: block.len(),
            });
        }
        Ok(())
    }
}

impl Default for MemoryBlockstore {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockstore for MemoryBlockstore {
    fn put(&self, block: Block) -> StoreResult<()> {
        Self::check_size(&block)?;
        let mut map = self.blocks.write().expect("lock poisoned");
        // Idempotent: content-addressing guarantees an existing entry under
        // this CID holds the same bytes.
        map.entry(*block.cid()).or_insert(block);
        Ok(())
    }

    fn put_many(&self, blocks: Vec<Block>) -> StoreResult<()> {
        for block in &blocks {
            Self::check_size(block)?;
        }
        let mut map = self.blocks.write().expect("lock poisoned");
        let count = blocks.len();
        for block in blocks {
            map.entry(*block.cid()).or_insert(block);
        }
        trace!(count, "batch stored");
        Ok(())
    }

    fn get(&self, cid: &Cid) -> StoreResult<Block> {
        let map = self.blocks.read().expect("lock poisoned");
        map.get(cid).cloned().ok_or(StoreError::NotFound(*cid))
    }

    fn has(&self, cid: &Cid) -> StoreResult<bool> {
        let map = self.blocks.read().expect("lock poisoned");
        Ok(map.contains_key(cid))
    }

    fn delete(&self, cid: &Cid) -> StoreResult<()> {
        let mut map = self.blocks.write().expect("lock poisoned");
        map.remove(cid);
        Ok(())
    }

    fn all_keys(&self) -> StoreResult<Box<dyn Iterator<Item = Cid> + Send>> {
        let keys: Vec<Cid> = {
            let map = self.blocks.read().expect("lock poisoned");
            map.keys().copied().collect()
        };
        Ok(Box::new(keys.into_iter()))
    }
}

impl std::fmt::Debug for MemoryBlockstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlockstore")
            .field("block_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::{Codec, HashAlg};

    fn block(data: &[u8]) -> Block {
        Block::new(data.to_vec(), HashAlg::Sha2_256, Codec::Raw).unwrap()
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn put_and_get() {
        let store = MemoryBlockstore::new();
        let b = block(b"hello");
        store.put(b.clone()).unwrap();
        let got = store.get(b.cid()).unwrap();
        assert_eq!(got, b);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = MemoryBlockstore::new();
        let b = block(b"missing");
        assert!(matches!(
            store.get(b.cid()),
            Err(StoreError::NotFound(cid)) if cid == *b.cid()
        ));
    }

    #[test]
    fn has_after_put() {
        let store = MemoryBlockstore::new();
        let b = block(b"present");
        assert!(!store.has(b.cid()).unwrap());
        store.put(b.clone()).unwrap();
        assert!(store.has(b.cid()).unwrap());
        // has ⇒ get succeeds in the same process
        assert!(store.get(b.cid()).is_ok());
    }

    #[test]
    fn put_is_idempotent() {
        let store = MemoryBlockstore::new();
        let b = block(b"twice");
        store.put(b.clone()).unwrap();
        store.put(b.clone()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let store = MemoryBlockstore::new();
        let b = block(b"gone");
        store.put(b.clone()).unwrap();
        store.delete(b.cid()).unwrap();
        assert!(store.get(b.cid()).is_err());
        // deleting again is a no-op
        store.delete(b.cid()).unwrap();
    }

    // -----------------------------------------------------------------------
    // Batch semantics
    // -----------------------------------------------------------------------

    #[test]
    fn put_many_stores_all() {
        let store = MemoryBlockstore::new();
        let blocks = vec![block(b"a"), block(b"b"), block(b"c")];
        let cids: Vec<Cid> = blocks.iter().map(|b| *b.cid()).collect();
        store.put_many(blocks).unwrap();
        for cid in &cids {
            assert!(store.has(cid).unwrap());
        }
    }

    #[test]
    fn put_many_dedups_against_existing() {
        let store = MemoryBlockstore::new();
        let b = block(b"dup");
        store.put(b.clone()).unwrap();
        store.put_many(vec![b.clone(), block(b"new")]).unwrap();
        assert_eq!(store.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------------

    #[test]
    fn all_keys_is_a_snapshot() {
        let store = MemoryBlockstore::new();
        store.put(block(b"a")).unwrap();
        store.put(block(b"b")).unwrap();

        let iter = store.all_keys().unwrap();
        // Mutations after the call do not disturb the snapshot.
        store.put(block(b"c")).unwrap();
        let keys: Vec<Cid> = iter.collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn all_keys_empty_store() {
        let store = MemoryBlockstore::new();
        assert_eq!(store.all_keys().unwrap().count(), 0);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_readers_and_writers() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryBlockstore::new());
        let seed = block(b"seed");
        store.put(seed.clone()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let cid = *seed.cid();
                thread::spawn(move || {
                    store.put(block(format!("writer-{i}").as_bytes())).unwrap();
                    assert!(store.get(&cid).is_ok());
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }
        assert_eq!(store.len(), 9);
    }

    #[test]
    fn total_bytes_sums_block_lengths() {
        let store = MemoryBlockstore::new();
        store.put(block(b"12345")).unwrap();
        store.put(block(b"123456789")).unwrap();
        assert_eq!(store.total_bytes(), 14);
    }
}
