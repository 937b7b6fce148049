/// Live-Tail Coordinator - single cooperative polling loop appending one
/// canonical block per tick, delegating to the reorg handler on parent-hash
/// mismatch.
use crate::domain::Block;
use crate::errors::{IndexerError, StoreError};
use crate::fanout::Hub;
use crate::metrics;
use crate::reorg::handle_reorg;
use crate::rpc::Node;
use crate::store::Storage;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct LiveTailConfig {
    pub poll_interval: std::time::Duration,
    pub genesis_height: u64,
    pub reorg_max_depth: u64,
}

/// Run the live-tail loop until `cancel_token` fires. Returns on a fatal
/// reorg failure (`DepthExceeded` / `ForkPointNotFound`) or cancellation.
pub async fn run_live_tail<N, S>(
    node: N,
    store: S,
    hub: Hub,
    config: LiveTailConfig,
    cancel_token: CancellationToken,
) -> Result<(), IndexerError>
where
    N: Node,
    S: Storage,
{
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = cancel_token.cancelled() => {
                info!("live-tail canceled");
                return Ok(());
            }
        }

        if let Err(err) = tick(&node, &store, &hub, &config, &cancel_token).await {
            error!(error = %err, "live-tail tick failed fatally, halting");
            return Err(err);
        }
    }
}

async fn tick<N, S>(
    node: &N,
    store: &S,
    hub: &Hub,
    config: &LiveTailConfig,
    cancel_token: &CancellationToken,
) -> Result<(), IndexerError>
where
    N: Node,
    S: Storage,
{
    let head = match store.get_latest_canonical_block().await {
        Ok(block) => Some(block),
        Err(StoreError::NotFound) => None,
        Err(err) => return Err(err.into()),
    };

    let next_height = head.as_ref().map(|b| b.height + 1).unwrap_or(config.genesis_height);

    let fetched = tokio::select! {
        result = node.get_block_by_number(next_height) => result,
        _ = cancel_token.cancelled() => return Ok(()),
    };

    let raw = match fetched {
        Ok(raw) => raw,
        Err(err) if !err.is_retryable() => return Err(err.into()),
        Err(_) => return Ok(()), // not yet available; retry next tick
    };

    let fetched_block = crate::parser::parse_block(raw);

    match &head {
        Some(head) if fetched_block.parent_hash != head.hash => {
            let outcome = handle_reorg(node, store, &fetched_block, head, config.reorg_max_depth).await?;
            info!(fork_point = outcome.fork_point, "reorg handled, resuming on next tick");
            Ok(())
        }
        _ => {
            store.insert_block(&fetched_block).await?;
            publish_and_record_lag(node, hub, &fetched_block).await;
            Ok(())
        }
    }
}

async fn publish_and_record_lag<N: Node>(node: &N, hub: &Hub, block: &Block) {
    hub.publish_block(block);
    for tx in &block.transactions {
        hub.publish_transaction(block.height, tx);
    }

    if let Ok(network_head) = node.get_chain_head().await {
        let lag_blocks = network_head.saturating_sub(block.height);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let lag_seconds = now as i64 - block.timestamp as i64;
        metrics::set_index_lag(lag_blocks, lag_seconds);
    }

    metrics::increment_blocks_indexed(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RpcError;
    use crate::rpc::{RawBlock, RawTransaction, TransactionReceipt};
    use crate::store::memory::InMemoryStore;
    use alloy_primitives::{Address, B256, U256};
    use std::sync::Mutex as StdMutex;

    #[derive(Clone)]
    struct ScriptedNode {
        blocks: std::sync::Arc<StdMutex<std::collections::HashMap<u64, RawBlock>>>,
    }

    impl Node for ScriptedNode {
        async fn get_block_by_number(&self, height: u64) -> Result<RawBlock, RpcError> {
            self.blocks
                .lock()
                .unwrap()
                .get(&height)
                .cloned()
                .ok_or_else(|| RpcError::Transient("not yet available".into()))
        }

        async fn get_chain_head(&self) -> Result<u64, RpcError> {
            Ok(self.blocks.lock().unwrap().keys().max().copied().unwrap_or(0))
        }

        async fn get_transaction_receipt(
            &self,
            _hash: B256,
        ) -> Result<Option<TransactionReceipt>, RpcError> {
            Ok(None)
        }
    }

    fn raw_block(height: u64, hash: u8, parent: u8) -> RawBlock {
        RawBlock {
            height,
            hash: B256::repeat_byte(hash),
            parent_hash: B256::repeat_byte(parent),
            miner: Address::ZERO,
            gas_used: U256::ZERO,
            gas_limit: U256::from(30_000_000u64),
            timestamp: height,
            transactions: Vec::<RawTransaction>::new(),
        }
    }

    #[tokio::test]
    async fn smooth_append_advances_head_and_publishes() {
        let store = InMemoryStore::new();
        store.insert_block(&crate::parser::parse_block(raw_block(100, 100, 99))).await.unwrap();

        let mut blocks = std::collections::HashMap::new();
        blocks.insert(101, raw_block(101, 101, 100));
        let node = ScriptedNode { blocks: std::sync::Arc::new(StdMutex::new(blocks)) };
        let hub = Hub::new();

        let config = LiveTailConfig {
            poll_interval: std::time::Duration::from_millis(1),
            genesis_height: 0,
            reorg_max_depth: 6,
        };

        tick(&node, &store, &hub, &config, &CancellationToken::new()).await.unwrap();

        let head = store.get_latest_canonical_block().await.unwrap();
        assert_eq!(head.height, 101);
    }

    #[tokio::test]
    async fn parent_hash_mismatch_delegates_to_reorg_handler() {
        let store = InMemoryStore::new();
        for h in 1..=10u64 {
            store.insert_block(&crate::parser::parse_block(raw_block(h, h as u8, h.saturating_sub(1) as u8))).await.unwrap();
        }

        let mut blocks = std::collections::HashMap::new();
        for h in 1..=8u64 {
            blocks.insert(h, raw_block(h, h as u8, h.saturating_sub(1) as u8));
        }
        blocks.insert(9, raw_block(9, 90, 8));
        blocks.insert(10, raw_block(10, 100, 90));
        blocks.insert(11, raw_block(11, 110, 100));
        let node = ScriptedNode { blocks: std::sync::Arc::new(StdMutex::new(blocks)) };
        let hub = Hub::new();

        let config = LiveTailConfig {
            poll_interval: std::time::Duration::from_millis(1),
            genesis_height: 0,
            reorg_max_depth: 6,
        };

        tick(&node, &store, &hub, &config, &CancellationToken::new()).await.unwrap();

        let nine = store.get_block_by_height(9).await.unwrap();
        let ten = store.get_block_by_height(10).await.unwrap();
        assert!(nine.orphaned);
        assert!(ten.orphaned);
    }
}
