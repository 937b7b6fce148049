/// Store contract consumed by the ingestion engine.
pub mod memory;
pub mod postgres;

use crate::domain::Block;
use crate::errors::StoreError;

/// Persistence operations the backfill coordinator, live-tail coordinator,
/// and reorg handler depend on. `PostgresStore` is the production
/// implementation; `InMemoryStore` backs unit and coordinator tests.
#[trait_variant::make(Send)]
pub trait Storage
where
    Self: Clone + Send + Sync + 'static,
{
    /// The canonical block with the maximum height, or `StoreError::NotFound`
    /// if the store is empty.
    async fn get_latest_canonical_block(&self) -> Result<Block, StoreError>;

    /// Any block at `height` (canonical or orphaned), or
    /// `StoreError::NotFound`.
    async fn get_block_by_height(&self, height: u64) -> Result<Block, StoreError>;

    /// Atomically insert one block and all its transactions and logs with
    /// `orphaned = false`. Idempotent: upsert by height, skip-on-conflict
    /// for transactions by hash.
    async fn insert_block(&self, block: &Block) -> Result<(), StoreError>;

    /// As `insert_block`, for a batch. The atomicity unit per block is
    /// preserved even though the implementation may parallelize within the
    /// batch.
    async fn bulk_insert_blocks(&self, blocks: &[Block]) -> Result<(), StoreError>;

    /// Atomically set `orphaned = true` on every block with
    /// `lo <= height <= hi`. Idempotent.
    async fn mark_blocks_orphaned(&self, lo: u64, hi: u64) -> Result<u64, StoreError>;
}
