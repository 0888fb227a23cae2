pub mod invoice;
pub mod ldk;

use std::future::Future;

use crate::error::Result;

/// The Lightning node a swap pays through.
pub trait LightningClient: Send + Sync {
    /// Pays `invoice` and returns the payment preimage once it settles.
    fn pay(&self, invoice: &str) -> impl Future<Output = Result<[u8; 32]>> + Send;

    /// A fresh on-chain address owned by the node.
    fn create_address(&self) -> impl Future<Output = Result<String>> + Send;
}
