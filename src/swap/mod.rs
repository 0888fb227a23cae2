pub mod cache;
pub mod pricing;
pub mod service;

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use crate::chain::network::ChainNetwork;
use crate::chain::script::SwapAddress;
use crate::swap::pricing::SwapPrice;

/// A swap awaiting its chain deposit, as kept in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub network: ChainNetwork,
    pub invoice: String,
    pub payment_hash: String,
    pub redeem_script_hex: String,
    pub timeout_block_height: u32,
    pub total_tokens: u64,
}

/// What a swap requester needs to fund a swap.
#[derive(Debug, Clone, Serialize)]
pub struct SwapOffer {
    pub network: ChainNetwork,
    pub payment_hash: String,
    pub redeem_script_hex: String,
    /// Chain height when the swap was created. Deposits can only appear after it.
    pub created_height: u32,
    pub timeout_block_height: u32,
    pub address: SwapAddress,
    pub price: SwapPrice,
}

/// A deposit into a swap address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapDeposit {
    pub transaction_id: Txid,
    pub vout: u32,
    pub value: u64,
    /// Zero while the deposit is in the mempool.
    pub confirmations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapCompletion {
    pub claim_txid: String,
    pub claim_fee: u64,
    pub destination_address: String,
}
