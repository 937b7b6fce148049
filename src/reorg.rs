/// Reorg Handler - fork-point discovery and soft-invalidation.
///
/// Invoked synchronously by the live-tail coordinator when a freshly fetched
/// block's `parent_hash` does not match the stored head. Walks backwards
/// from the stored head comparing RPC and store hashes until it finds the
/// common ancestor, then marks the abandoned canonical range orphaned in a
/// single atomic store call.
use crate::domain::Block;
use crate::errors::ReorgError;
use crate::metrics;
use crate::rpc::Node;
use crate::store::Storage;
use tracing::{info, warn};

/// Outcome of a successful reorg: the range invalidated and the new head.
#[derive(Debug, Clone)]
pub struct ReorgOutcome {
    pub fork_point: u64,
    pub orphaned_count: u64,
}

/// Handle a reorg observed by live-tail. `nb` is the newly fetched block
/// whose `parent_hash` failed to match `db_head`; `max_depth` is the
/// configured fatal threshold.
pub async fn handle_reorg<N: Node, S: Storage>(
    node: &N,
    store: &S,
    nb: &Block,
    db_head: &Block,
    max_depth: u64,
) -> Result<ReorgOutcome, ReorgError> {
    metrics::increment_reorg_detected();

    let depth_estimate = nb.height.saturating_sub(db_head.height);
    if depth_estimate > max_depth {
        return Err(ReorgError::DepthExceeded { actual: depth_estimate, max: max_depth });
    }

    warn!(height = db_head.height, hash = %db_head.hash, "reorg detected, searching for fork point");

    let fork_point = find_fork_point(node, store, db_head.height, max_depth).await?;

    let actual_depth = db_head.height - fork_point;
    if actual_depth > max_depth {
        return Err(ReorgError::DepthExceeded { actual: actual_depth, max: max_depth });
    }

    let orphaned_count = if fork_point < db_head.height {
        store
            .mark_blocks_orphaned(fork_point + 1, db_head.height)
            .await?
    } else {
        0
    };

    metrics::record_reorg_resolved(actual_depth, orphaned_count);
    info!(
        fork_point,
        orphaned_count,
        depth = actual_depth,
        "reorg resolved"
    );

    Ok(ReorgOutcome { fork_point, orphaned_count })
}

/// Walk backwards from `start_height`, comparing the RPC chain's hash at
/// each height against the store's, until they agree or genesis is reached.
/// Genesis always matches, so the only way to exhaust `max_depth` steps
/// without a match is a reorg deeper than the configured maximum; that is
/// reported as `DepthExceeded`, the same error the entry-point fast-fail
/// check above uses, so callers only ever see one fatal-depth variant.
async fn find_fork_point<N: Node, S: Storage>(
    node: &N,
    store: &S,
    start_height: u64,
    max_depth: u64,
) -> Result<u64, ReorgError> {
    let mut height = start_height;
    let mut steps = 0u64;

    loop {
        let stored = store.get_block_by_height(height).await?;
        let remote = node.get_block_by_number(height).await?;

        info!(height, stored_hash = %stored.hash, remote_hash = %remote.hash, "fork search step");

        if stored.hash == remote.hash {
            return Ok(height);
        }

        if height == 0 {
            return Ok(0);
        }

        steps += 1;
        if steps > max_depth {
            return Err(ReorgError::DepthExceeded { actual: steps, max: max_depth });
        }

        height -= 1;
    }
}
