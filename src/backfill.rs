/// Backfill Coordinator - bounded parallel worker pool over a closed height
/// range, batched persistence.
///
/// Producer enqueues heights onto a bounded job channel; W workers fetch and
/// parse in parallel, sending results to a single collector that batches up
/// to B blocks per store call. The first permanent RPC error trips a
/// single-shot halt latch observed by every worker on their next job.
use crate::errors::BackfillError;
use crate::metrics;
use crate::parser::parse_block;
use crate::rpc::Node;
use crate::store::Storage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct BackfillConfig {
    pub start: u64,
    pub end: u64,
    pub workers: usize,
    pub batch_size: usize,
}

struct HaltLatch {
    tripped: AtomicBool,
    notify: Notify,
}

impl HaltLatch {
    fn new() -> Self {
        Self { tripped: AtomicBool::new(false), notify: Notify::new() }
    }

    fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

/// Index `[config.start, config.end]`. Returns the total number of blocks
/// collected on success, or the first fatal error encountered.
pub async fn run_backfill<N, S>(
    node: N,
    store: S,
    config: BackfillConfig,
    cancel_token: CancellationToken,
) -> Result<u64, BackfillError>
where
    N: Node,
    S: Storage,
{
    if config.start > config.end {
        return Err(BackfillError::InvalidRange { start: config.start, end: config.end });
    }

    let job_capacity = (config.workers * 2).max(1);
    let (job_tx, job_rx) = mpsc::channel::<u64>(job_capacity);
    let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::channel(job_capacity);

    let halt = Arc::new(HaltLatch::new());

    let producer = {
        let job_tx = job_tx.clone();
        let cancel_token = cancel_token.clone();
        let halt = halt.clone();
        let range = config.start..=config.end;
        tokio::spawn(async move {
            for height in range {
                if halt.is_tripped() || cancel_token.is_cancelled() {
                    break;
                }
                tokio::select! {
                    send = job_tx.send(height) => {
                        if send.is_err() {
                            break;
                        }
                    }
                    _ = cancel_token.cancelled() => break,
                }
            }
        })
    };
    drop(job_tx);

    let mut workers = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        let node = node.clone();
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let halt = halt.clone();
        let cancel_token = cancel_token.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let height = {
                    let mut rx = job_rx.lock().await;
                    rx.recv().await
                };
                let height = match height {
                    Some(h) => h,
                    None => break,
                };

                if halt.is_tripped() || cancel_token.is_cancelled() {
                    continue;
                }

                debug!(worker_id, height, "fetching block");
                match node.get_block_by_number(height).await {
                    Ok(raw) => {
                        let block = parse_block(raw);
                        if result_tx.send(Ok(block)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        // The RPC layer already exhausted its own retry budget
                        // (`with_retry`) before surfacing this error, retryable
                        // or not, so there is nothing left to gain by retrying
                        // again here. Range completeness requires treating
                        // every error that reaches a worker as fatal rather
                        // than silently skipping the height.
                        error!(worker_id, height, error = %err, "rpc call exhausted retries, halting backfill");
                        halt.trip();
                        let _ = result_tx
                            .send(Err(BackfillError::Permanent { height, worker_id, source: err }))
                            .await;
                    }
                }
            }
        }));
    }
    drop(result_tx);

    let collector = tokio::spawn(async move {
        let mut batch = Vec::with_capacity(config.batch_size);
        let mut total: u64 = 0;
        let mut fatal: Option<BackfillError> = None;

        while let Some(item) = result_rx.recv().await {
            match item {
                Ok(block) => {
                    batch.push(block);
                    if batch.len() >= config.batch_size {
                        total += flush_batch(&store, &mut batch).await?;
                    }
                }
                Err(err) => {
                    fatal = Some(err);
                }
            }
        }

        if !batch.is_empty() {
            total += flush_batch(&store, &mut batch).await?;
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok(total),
        }
    });

    producer.await.ok();
    for worker in workers {
        worker.await.ok();
    }

    if cancel_token.is_cancelled() {
        return Err(BackfillError::Canceled);
    }

    match collector.await {
        Ok(result) => {
            let total = result?;
            info!(total, "backfill complete");
            Ok(total)
        }
        Err(join_err) => {
            error!(error = %join_err, "collector task panicked");
            Err(BackfillError::Canceled)
        }
    }
}

async fn flush_batch<S: Storage>(
    store: &S,
    batch: &mut Vec<crate::domain::Block>,
) -> Result<u64, BackfillError> {
    let timer = metrics::Timer::new();
    let count = batch.len() as u64;
    store.bulk_insert_blocks(batch).await?;
    metrics::observe_backfill_batch_duration(timer.elapsed_secs());
    metrics::increment_blocks_indexed(count);
    batch.clear();
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Block;
    use crate::errors::RpcError;
    use crate::rpc::{RawBlock, RawTransaction, TransactionReceipt};
    use crate::store::memory::InMemoryStore;
    use alloy_primitives::{Address, B256, U256};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone)]
    struct ScriptedNode {
        permanent_fail_height: Option<u64>,
        transient_fail_once: Arc<StdMutex<HashSet<u64>>>,
    }

    fn raw_block(height: u64) -> RawBlock {
        RawBlock {
            height,
            hash: B256::from(alloy_primitives::U256::from(height).to_be_bytes()),
            parent_hash: B256::from(alloy_primitives::U256::from(height.saturating_sub(1)).to_be_bytes()),
            miner: Address::ZERO,
            gas_used: U256::ZERO,
            gas_limit: U256::from(30_000_000u64),
            timestamp: height,
            transactions: vec![tx(0), tx(1)],
        }
    }

    fn tx(index: u32) -> RawTransaction {
        RawTransaction {
            hash: B256::repeat_byte(index as u8 + 1),
            tx_index: index,
            to_addr: Some(Address::repeat_byte(9)),
            value_wei: U256::from(1u64),
            gas_limit: U256::from(21_000u64),
            gas_price: U256::from(1u64),
            nonce: index as u64,
            raw_rlp: Vec::new(),
        }
    }

    impl Node for ScriptedNode {
        async fn get_block_by_number(&self, height: u64) -> Result<RawBlock, RpcError> {
            if Some(height) == self.permanent_fail_height {
                return Err(RpcError::Permanent(format!("bad height {height}")));
            }
            if self.transient_fail_once.lock().unwrap().remove(&height) {
                return Err(RpcError::Transient("flaky".into()));
            }
            Ok(raw_block(height))
        }

        async fn get_chain_head(&self) -> Result<u64, RpcError> {
            Ok(1_000)
        }

        async fn get_transaction_receipt(
            &self,
            _hash: B256,
        ) -> Result<Option<TransactionReceipt>, RpcError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn happy_path_backfill_indexes_every_block_in_range() {
        let node = ScriptedNode {
            permanent_fail_height: None,
            transient_fail_once: Arc::new(StdMutex::new(HashSet::new())),
        };
        let store = InMemoryStore::new();
        let config = BackfillConfig { start: 100, end: 109, workers: 4, batch_size: 5 };

        let total = run_backfill(node, store.clone(), config, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(total, 10);
        for height in 100..=109u64 {
            let block: Block = store.get_block_by_height(height).await.unwrap();
            assert_eq!(block.transactions.len(), 2);
        }
    }

    #[tokio::test]
    async fn start_greater_than_end_is_rejected_before_any_rpc_call() {
        let node = ScriptedNode {
            permanent_fail_height: None,
            transient_fail_once: Arc::new(StdMutex::new(HashSet::new())),
        };
        let store = InMemoryStore::new();
        let config = BackfillConfig { start: 10, end: 5, workers: 2, batch_size: 5 };

        let result = run_backfill(node, store, config, CancellationToken::new()).await;
        assert!(matches!(result, Err(BackfillError::InvalidRange { start: 10, end: 5 })));
    }

    #[tokio::test]
    async fn permanent_error_halts_and_names_the_height() {
        let node = ScriptedNode {
            permanent_fail_height: Some(42),
            transient_fail_once: Arc::new(StdMutex::new(HashSet::new())),
        };
        let store = InMemoryStore::new();
        let config = BackfillConfig { start: 0, end: 99, workers: 4, batch_size: 10 };

        let result = run_backfill(node, store, config, CancellationToken::new()).await;
        match result {
            Err(BackfillError::Permanent { height, .. }) => assert_eq!(height, 42),
            other => panic!("expected Permanent error, got {other:?}"),
        }
    }
}
