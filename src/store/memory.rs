/// In-memory `Storage` implementation used by coordinator, reorg-handler,
/// and live-tail unit tests so they never require a live Postgres instance.
use super::Storage;
use crate::domain::Block;
use crate::errors::StoreError;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    blocks_by_height: BTreeMap<u64, Block>,
    seen_tx_hashes: HashSet<alloy_primitives::B256>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_block_locked(inner: &mut Inner, block: &Block) {
        let mut stored = block.clone();
        stored.transactions.retain(|tx| inner.seen_tx_hashes.insert(tx.hash));
        inner.blocks_by_height.insert(stored.height, stored);
    }
}

impl Storage for InMemoryStore {
    async fn get_latest_canonical_block(&self) -> Result<Block, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .blocks_by_height
            .values()
            .rev()
            .find(|b| !b.orphaned)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Block, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .blocks_by_height
            .get(&height)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert_block(&self, block: &Block) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        Self::insert_block_locked(&mut inner, block);
        Ok(())
    }

    async fn bulk_insert_blocks(&self, blocks: &[Block]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for block in blocks {
            Self::insert_block_locked(&mut inner, block);
        }
        Ok(())
    }

    async fn mark_blocks_orphaned(&self, lo: u64, hi: u64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut count = 0u64;
        for (_, block) in inner.blocks_by_height.range_mut(lo..=hi) {
            if !block.orphaned {
                block.orphaned = true;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};

    fn block(height: u64, hash: u8, parent: u8) -> Block {
        Block {
            height,
            hash: B256::repeat_byte(hash),
            parent_hash: B256::repeat_byte(parent),
            miner: Address::ZERO,
            gas_used: U256::ZERO,
            gas_limit: U256::from(30_000_000u64),
            timestamp: height,
            transactions: Vec::new(),
            orphaned: false,
        }
    }

    #[tokio::test]
    async fn insert_then_get_latest_round_trips() {
        let store = InMemoryStore::new();
        store.insert_block(&block(1, 1, 0)).await.unwrap();
        store.insert_block(&block(2, 2, 1)).await.unwrap();
        let latest = store.get_latest_canonical_block().await.unwrap();
        assert_eq!(latest.height, 2);
    }

    #[tokio::test]
    async fn reinsert_is_a_no_op_for_height() {
        let store = InMemoryStore::new();
        store.insert_block(&block(5, 5, 4)).await.unwrap();
        store.insert_block(&block(5, 5, 4)).await.unwrap();
        let got = store.get_block_by_height(5).await.unwrap();
        assert_eq!(got.height, 5);
    }

    #[tokio::test]
    async fn mark_blocks_orphaned_is_idempotent() {
        let store = InMemoryStore::new();
        store.insert_block(&block(1, 1, 0)).await.unwrap();
        store.insert_block(&block(2, 2, 1)).await.unwrap();
        let first = store.mark_blocks_orphaned(1, 2).await.unwrap();
        let second = store.mark_blocks_orphaned(1, 2).await.unwrap();
        assert_eq!(first, 2);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn empty_store_reports_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_latest_canonical_block().await,
            Err(StoreError::NotFound)
        ));
    }
}
