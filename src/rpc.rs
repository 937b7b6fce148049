/// RPC Client - retrying, error-classifying access to the remote chain node.
///
/// Exposed through the [`Node`] capability-set trait so coordinators never
/// depend on the concrete transport; [`AlloyNode`] is the production
/// implementation, backed by `alloy`'s JSON-RPC HTTP transport.
use crate::errors::RpcError;
use crate::metrics;
use crate::telemetry::truncate_hex;
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, B256, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types_eth::{Block as RpcBlock, BlockNumberOrTag, BlockTransactions};
use alloy_transport::{RpcError as TransportRpcError, TransportErrorKind};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Number of leading hex characters kept when truncating a hash for logging.
const LOG_HASH_PREFIX_LEN: usize = 16;

/// A minimal receipt projection; not consumed by the ingestion path but part
/// of the contract for a future receipt-enriched parser mode.
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub status: bool,
}

/// Capability set the ingestion engine depends on.
#[trait_variant::make(Send)]
pub trait Node
where
    Self: Clone + Send + Sync + 'static,
{
    async fn get_block_by_number(&self, height: u64) -> Result<RawBlock, RpcError>;
    async fn get_chain_head(&self) -> Result<u64, RpcError>;
    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError>;
}

/// The RPC block shape the parser consumes, already detached from
/// `alloy`'s wire types so the parser module has no transport dependency.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub height: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub miner: Address,
    pub gas_used: U256,
    pub gas_limit: U256,
    pub timestamp: u64,
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Clone)]
pub struct RawTransaction {
    pub hash: B256,
    pub tx_index: u32,
    pub to_addr: Option<Address>,
    pub value_wei: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub nonce: u64,
    /// RLP-encoded signed transaction payload, used by the parser to
    /// recover the sender address.
    pub raw_rlp: Vec<u8>,
}

/// Classify a transport-level error per the taxonomy in the RPC client
/// contract. Substring matching is a fallback for JSON-RPC error messages
/// that don't carry a structured code; the default for anything
/// unrecognized is `Transient`, never `Permanent`.
pub fn classify(err: &TransportRpcError<TransportErrorKind>) -> RpcError {
    let message = err.to_string();
    let lower = message.to_lowercase();

    if lower.contains("deadline") || lower.contains("cancel") {
        return RpcError::Timeout(message);
    }
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        return RpcError::RateLimited(message);
    }
    if lower.contains("timeout") || lower.contains("temporary") {
        return RpcError::Timeout(message);
    }
    if lower.contains("connection refused") {
        return RpcError::Transient(message);
    }
    if lower.contains("invalid")
        || lower.contains("method not found")
        || lower.contains("not found")
        || lower.contains("bad request")
    {
        return RpcError::Permanent(message);
    }
    RpcError::Transient(message)
}

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub per_request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_secs(1),
            per_request_timeout: Duration::from_secs(30),
        }
    }
}

/// Run `op` under the retry protocol: up to `policy.max_retries` attempts,
/// delay `base * 2^k` between attempt k and k+1, cancellable via
/// `cancel_token`, and bounded overall by `policy.per_request_timeout`.
///
/// `params` is a pre-formatted, already-redacted description of the call's
/// arguments (a height or a truncated hash) — logged alongside `method`,
/// outcome, and duration per the RPC client's observability contract.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel_token: &tokio_util::sync::CancellationToken,
    method: &str,
    params: &str,
    mut op: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RpcError>>,
{
    let started = Instant::now();

    let call = async {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    metrics::increment_rpc_errors(err.metric_label());
                    if !err.is_retryable() || attempt >= policy.max_retries {
                        warn!(method, params, attempt, error = %err, "rpc call failed, not retrying");
                        return Err(err);
                    }
                    let backoff = policy.base_backoff * 2u32.pow(attempt);
                    debug!(method, params, attempt, backoff_ms = backoff.as_millis() as u64, "retrying rpc call");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel_token.cancelled() => return Err(RpcError::Canceled),
                    }
                    attempt += 1;
                }
            }
        }
    };

    let result = match timeout(policy.per_request_timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(format!(
            "{method} exceeded per-request budget of {:?}",
            policy.per_request_timeout
        ))),
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => debug!(method, params, duration_ms, outcome = "ok", "rpc call completed"),
        Err(err) => debug!(method, params, duration_ms, outcome = "err", error = %err, "rpc call completed"),
    }

    result
}

/// Production [`Node`] implementation over `alloy`'s HTTP JSON-RPC
/// transport.
#[derive(Clone)]
pub struct AlloyNode {
    provider: alloy_provider::RootProvider<alloy_transport_http::Http<reqwest::Client>>,
    policy: RetryPolicy,
    cancel_token: tokio_util::sync::CancellationToken,
}

impl AlloyNode {
    /// `connect_timeout` bounds the initial TCP/TLS handshake only; the
    /// tighter per-request budget in `policy` is enforced separately by
    /// [`with_retry`].
    pub fn new(
        rpc_url: &str,
        connect_timeout: Duration,
        policy: RetryPolicy,
        cancel_token: tokio_util::sync::CancellationToken,
    ) -> Result<Self, RpcError> {
        let url = rpc_url
            .parse()
            .map_err(|e| RpcError::Permanent(format!("invalid RPC_URL: {e}")))?;
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RpcError::Permanent(format!("failed to build http client: {e}")))?;
        let transport = alloy_transport_http::Http::with_client(http_client, url);
        let provider = ProviderBuilder::new().on_client(alloy_rpc_client::RpcClient::new(transport, false));
        Ok(Self { provider, policy, cancel_token })
    }

    fn raw_block_from(height: u64, rpc_block: RpcBlock) -> Result<RawBlock, RpcError> {
        let header = rpc_block.header;
        let transactions = match rpc_block.transactions {
            BlockTransactions::Full(txs) => txs
                .into_iter()
                .enumerate()
                .map(|(index, tx)| RawTransaction {
                    hash: tx.inner.tx_hash(),
                    tx_index: index as u32,
                    to_addr: tx.to(),
                    value_wei: tx.value(),
                    gas_limit: U256::from(tx.gas_limit()),
                    gas_price: U256::from(tx.gas_price().unwrap_or_default()),
                    nonce: tx.nonce(),
                    raw_rlp: tx.inner.encoded_2718(),
                })
                .collect(),
            BlockTransactions::Hashes(_) | BlockTransactions::Uncle => Vec::new(),
        };

        Ok(RawBlock {
            height,
            hash: header.hash,
            parent_hash: header.parent_hash,
            miner: header.beneficiary,
            gas_used: U256::from(header.gas_used),
            gas_limit: U256::from(header.gas_limit),
            timestamp: header.timestamp,
            transactions,
        })
    }
}

impl Node for AlloyNode {
    async fn get_block_by_number(&self, height: u64) -> Result<RawBlock, RpcError> {
        let params = format!("height={height}");
        with_retry(&self.policy, &self.cancel_token, "eth_getBlockByNumber", &params, || async {
            let result = self
                .provider
                .get_block_by_number(BlockNumberOrTag::Number(height), true.into())
                .await
                .map_err(|e| classify(&e));
            match result {
                Ok(Some(block)) => Self::raw_block_from(height, block),
                Ok(None) => Err(RpcError::Transient(format!("block {height} not yet available"))),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn get_chain_head(&self) -> Result<u64, RpcError> {
        with_retry(&self.policy, &self.cancel_token, "eth_blockNumber", "", || async {
            self.provider
                .get_block_number()
                .await
                .map_err(|e| classify(&e))
        })
        .await
    }

    async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, RpcError> {
        let params = format!("hash={}", truncate_hex(&hash.to_string(), LOG_HASH_PREFIX_LEN));
        with_retry(&self.policy, &self.cancel_token, "eth_getTransactionReceipt", &params, || async {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| classify(&e))?;
            Ok(receipt.map(|r| TransactionReceipt {
                transaction_hash: hash,
                status: r.status(),
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(1),
            per_request_timeout: Duration::from_secs(5),
        };
        let token = tokio_util::sync::CancellationToken::new();

        let attempts_clone = attempts.clone();
        let result: Result<u64, RpcError> = with_retry(&policy, &token, "test", "", move || {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(RpcError::Transient("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_skip_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let token = tokio_util::sync::CancellationToken::new();

        let attempts_clone = attempts.clone();
        let result: Result<u64, RpcError> = with_retry(&policy, &token, "test", "", move || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(RpcError::Permanent("bad request".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(RpcError::Permanent(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classification_defaults_to_transient() {
        let err = TransportRpcError::local_usage_str("something odd happened");
        assert!(matches!(classify(&err), RpcError::Transient(_)));
    }

    #[test]
    fn classification_detects_permanent_messages() {
        let err = TransportRpcError::local_usage_str("method not found");
        assert!(matches!(classify(&err), RpcError::Permanent(_)));
    }
}
