use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::chain::network::ChainNetwork;
use crate::chain::query::{BlockHeaderInfo, ChainQuery};
use crate::chain::rpc::{HttpTransport, RpcTransport};
use crate::error::{Error, Result};

/// Tips older than this mark the backend as stalled.
pub const MAX_TIP_AGE: Duration = Duration::from_secs(6 * 60 * 60);

/// Detects a chain backend that is reachable but no longer following the chain.
pub struct BackendMonitor<T = HttpTransport> {
    query: ChainQuery<T>,
    max_tip_age: Duration,
}

impl<T: RpcTransport> BackendMonitor<T> {
    pub fn new(query: ChainQuery<T>) -> Self {
        Self {
            query,
            max_tip_age: MAX_TIP_AGE,
        }
    }

    pub async fn confirm_backend_live(&self, network: ChainNetwork) -> Result<BlockHeaderInfo> {
        self.confirm_backend_live_at(network, SystemTime::now()).await
    }

    /// Returns the tip header when its timestamp is within [`MAX_TIP_AGE`] of `now`.
    pub async fn confirm_backend_live_at(
        &self,
        network: ChainNetwork,
        now: SystemTime,
    ) -> Result<BlockHeaderInfo> {
        let tip = self.query.get_current_hash(network).await?;
        let header = self.query.get_block_header(network, &tip).await?;

        let block_time = UNIX_EPOCH + Duration::from_secs(header.time);
        let age = now.duration_since(block_time).unwrap_or_default();
        if age > self.max_tip_age {
            tracing::warn!(
                %network,
                tip = %header.hash,
                height = header.height,
                age_secs = age.as_secs(),
                "chain backend is stale"
            );
            return Err(Error::StaleBackend(age));
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::chain::rpc::test_utils::{Scripted, ScriptedTransport, client};

    const HASH: &str = "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206";
    const BLOCK_TIME: u64 = 1_700_000_000;

    fn monitor(tip: Value) -> (BackendMonitor<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::new([
            Scripted::result(tip),
            Scripted::result(json!({
                "hash": HASH,
                "height": 812,
                "time": BLOCK_TIME,
                "confirmations": 1,
            })),
        ]);
        let monitor = BackendMonitor::new(ChainQuery::new(client(transport.clone())));
        (monitor, transport)
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn recent_tip_is_live() {
        let (monitor, transport) = monitor(json!(HASH));
        let header = monitor
            .confirm_backend_live_at(ChainNetwork::Regtest, at(BLOCK_TIME + 600))
            .await
            .unwrap();
        assert_eq!(header.height, 812);

        let requests = transport.requests();
        assert_eq!(requests[0]["method"], "getbestblockhash");
        assert_eq!(requests[1]["method"], "getblockheader");
        assert_eq!(requests[1]["params"][0], HASH);
    }

    #[tokio::test]
    async fn tip_at_the_limit_is_still_live() {
        let (monitor, _) = monitor(json!(HASH));
        let now = at(BLOCK_TIME + MAX_TIP_AGE.as_secs());
        assert!(monitor.confirm_backend_live_at(ChainNetwork::Regtest, now).await.is_ok());
    }

    #[tokio::test]
    async fn old_tip_is_stale() {
        let (monitor, _) = monitor(json!(HASH));
        let now = at(BLOCK_TIME + MAX_TIP_AGE.as_secs() + 1);
        let err = monitor
            .confirm_backend_live_at(ChainNetwork::Regtest, now)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleBackend(age) if age.as_secs() == MAX_TIP_AGE.as_secs() + 1));
    }

    #[tokio::test]
    async fn missing_tip_is_reported() {
        let (monitor, transport) = monitor(Value::Null);
        let err = monitor
            .confirm_backend_live_at(ChainNetwork::Regtest, at(BLOCK_TIME))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoChainTip));
        assert_eq!(transport.calls(), 1);
    }
}
