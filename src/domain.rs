/// Internal domain model the parser produces and the store persists.
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub log_index: u32,
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
}

impl Log {
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
    pub fn topic1(&self) -> Option<B256> {
        self.topics.get(1).copied()
    }
    pub fn topic2(&self) -> Option<B256> {
        self.topics.get(2).copied()
    }
    pub fn topic3(&self) -> Option<B256> {
        self.topics.get(3).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: B256,
    pub tx_index: u32,
    pub from_addr: Address,
    pub to_addr: Option<Address>,
    pub value_wei: U256,
    pub fee_wei: U256,
    pub gas_used: U256,
    pub gas_price: U256,
    pub nonce: u64,
    pub success: bool,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub miner: Address,
    pub gas_used: U256,
    pub gas_limit: U256,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub orphaned: bool,
}

impl Block {
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    /// The zero address substituted for `from_addr` when ECDSA recovery
    /// fails; the row is kept rather than dropped.
    pub fn zero_address() -> Address {
        Address::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(index: u32) -> Transaction {
        Transaction {
            hash: B256::repeat_byte(index as u8 + 1),
            tx_index: index,
            from_addr: Address::repeat_byte(1),
            to_addr: Some(Address::repeat_byte(2)),
            value_wei: U256::from(1000u64),
            fee_wei: U256::from(21u64),
            gas_used: U256::from(21000u64),
            gas_price: U256::from(1u64),
            nonce: index as u64,
            success: true,
            logs: Vec::new(),
        }
    }

    #[test]
    fn tx_count_matches_parsed_transactions() {
        let block = Block {
            height: 1,
            hash: B256::repeat_byte(9),
            parent_hash: B256::ZERO,
            miner: Address::ZERO,
            gas_used: U256::ZERO,
            gas_limit: U256::from(30_000_000u64),
            timestamp: 0,
            transactions: vec![sample_tx(0), sample_tx(1)],
            orphaned: false,
        };
        assert_eq!(block.tx_count(), 2);
    }
}
