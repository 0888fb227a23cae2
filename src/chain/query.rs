use std::str::FromStr as _;

use bitcoin::{Amount, BlockHash, Txid};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::chain::network::ChainNetwork;
use crate::chain::rpc::{HttpTransport, RpcClient, RpcCommand, RpcTransport};
use crate::error::{Error, Result};

/// Confirmation target of fee estimates, in blocks.
pub const FEE_RATE_TARGET_BLOCKS: u32 = 6;

/// Header fields of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeaderInfo {
    pub hash: String,
    pub height: u32,
    /// Block timestamp, seconds since the unix epoch.
    pub time: u64,
    pub previous_block_hash: Option<String>,
    pub confirmations: i64,
}

/// An unspent output as seen by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainUtxo {
    pub value: u64,
    pub confirmations: u32,
    pub script_pub_key: String,
}

/// Response data from `getblockheader` with verbose output.
#[derive(Deserialize)]
struct GetHeaderResponse {
    hash: String,
    height: u32,
    time: u64,
    #[serde(default)]
    previousblockhash: Option<String>,
    #[serde(default)]
    confirmations: i64,
}

/// Response data from `estimatesmartfee`.
#[derive(Deserialize)]
struct EstimateSmartFeeResponse {
    #[serde(default)]
    feerate: Option<f64>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct ScriptPubKey {
    hex: String,
}

/// Response data from `gettxout`.
#[derive(Deserialize)]
struct GetTxOutResponse {
    value: f64,
    #[serde(default)]
    confirmations: u32,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: ScriptPubKey,
}

/// Typed chain operations on top of [`RpcClient`].
pub struct ChainQuery<T = HttpTransport> {
    rpc: RpcClient<T>,
}

impl<T: Clone> Clone for ChainQuery<T> {
    fn clone(&self) -> Self {
        Self {
            rpc: self.rpc.clone(),
        }
    }
}

impl<T: RpcTransport> ChainQuery<T> {
    pub fn new(rpc: RpcClient<T>) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &RpcClient<T> {
        &self.rpc
    }

    pub async fn get_current_hash(&self, network: ChainNetwork) -> Result<String> {
        let value = self
            .rpc
            .call(RpcCommand::BestBlockHash, network, vec![])
            .await?;
        match value {
            Value::String(hash) if !hash.is_empty() => Ok(hash),
            Value::Null => Err(Error::NoChainTip),
            Value::String(_) => Err(Error::NoChainTip),
            other => Err(unexpected(RpcCommand::BestBlockHash, other)),
        }
    }

    pub async fn get_current_height(&self, network: ChainNetwork) -> Result<u32> {
        let value = self.rpc.call(RpcCommand::BlockCount, network, vec![]).await?;
        decode(RpcCommand::BlockCount, value)
    }

    pub async fn get_block_header(
        &self,
        network: ChainNetwork,
        block_id: &str,
    ) -> Result<BlockHeaderInfo> {
        require_block_id(block_id)?;
        let value = self
            .rpc
            .call(
                RpcCommand::GetBlockHeader,
                network,
                vec![json!(block_id), json!(true)],
            )
            .await?;
        let header: GetHeaderResponse = decode(RpcCommand::GetBlockHeader, value)?;
        Ok(BlockHeaderInfo {
            hash: header.hash,
            height: header.height,
            time: header.time,
            previous_block_hash: header.previousblockhash,
            confirmations: header.confirmations,
        })
    }

    /// Hash of the main-chain block at `height`.
    pub async fn get_block_hash(&self, network: ChainNetwork, height: u32) -> Result<String> {
        let value = self
            .rpc
            .call(RpcCommand::GetBlockHash, network, vec![json!(height)])
            .await?;
        decode(RpcCommand::GetBlockHash, value)
    }

    /// Raw block, hex encoded.
    pub async fn get_block(&self, network: ChainNetwork, block_id: &str) -> Result<String> {
        require_block_id(block_id)?;
        let value = self
            .rpc
            .call(RpcCommand::GetBlock, network, vec![json!(block_id), json!(0)])
            .await?;
        decode(RpcCommand::GetBlock, value)
    }

    /// Fee rate for confirmation within [`FEE_RATE_TARGET_BLOCKS`], in tokens per vbyte.
    pub async fn get_fee_rate(&self, network: ChainNetwork) -> Result<u64> {
        let value = self
            .rpc
            .call(
                RpcCommand::EstimateSmartFee,
                network,
                vec![json!(FEE_RATE_TARGET_BLOCKS)],
            )
            .await?;
        let estimate: EstimateSmartFeeResponse = decode(RpcCommand::EstimateSmartFee, value)?;
        let Some(per_kvbyte) = estimate.feerate else {
            return Err(Error::UnexpectedResponse(format!(
                "no fee estimate available: {}",
                estimate.errors.join("; ")
            )));
        };
        tokens_per_vbyte(per_kvbyte)
    }

    /// Raw transaction, hex encoded.
    pub async fn get_transaction(&self, network: ChainNetwork, txid: &str) -> Result<String> {
        require_txid("transaction_id", txid)?;
        let value = self
            .rpc
            .call(RpcCommand::GetRawTransaction, network, vec![json!(txid)])
            .await?;
        decode(RpcCommand::GetRawTransaction, value)
    }

    /// The output `txid:vout` if it is still unspent, mempool included.
    pub async fn get_utxo(
        &self,
        network: ChainNetwork,
        txid: &str,
        vout: u32,
    ) -> Result<Option<ChainUtxo>> {
        require_txid("transaction_id", txid)?;
        let value = self
            .rpc
            .call(
                RpcCommand::GetTxOut,
                network,
                vec![json!(txid), json!(vout), json!(true)],
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }

        let out: GetTxOutResponse = decode(RpcCommand::GetTxOut, value)?;
        let value = Amount::from_btc(out.value)
            .map_err(|e| Error::UnexpectedResponse(format!("gettxout value: {e}")))?;
        Ok(Some(ChainUtxo {
            value: value.to_sat(),
            confirmations: out.confirmations,
            script_pub_key: out.script_pub_key.hex,
        }))
    }

    /// Transaction ids currently in the mempool.
    pub async fn get_mempool(&self, network: ChainNetwork) -> Result<Vec<String>> {
        let value = self
            .rpc
            .call(RpcCommand::GetRawMempool, network, vec![])
            .await?;
        decode(RpcCommand::GetRawMempool, value)
    }

    /// Submits a serialized transaction, returning its id.
    pub async fn broadcast(&self, network: ChainNetwork, transaction_hex: &str) -> Result<String> {
        if transaction_hex.is_empty() || hex::decode(transaction_hex).is_err() {
            return Err(Error::invalid_input("transaction", "expected hex encoded transaction"));
        }
        let value = self
            .rpc
            .call(
                RpcCommand::SendRawTransaction,
                network,
                vec![json!(transaction_hex)],
            )
            .await?;
        let txid: String = decode(RpcCommand::SendRawTransaction, value)?;
        tracing::info!(%network, %txid, "broadcast transaction");
        Ok(txid)
    }

    /// Mines `count` blocks to the daemon wallet. Regtest only.
    pub async fn generate(&self, network: ChainNetwork, count: u32) -> Result<Vec<String>> {
        require_regtest(network)?;
        let value = self
            .rpc
            .call(RpcCommand::Generate, network, vec![json!(count)])
            .await?;
        decode(RpcCommand::Generate, value)
    }

    /// Mines `count` blocks paying to `address`. Regtest only.
    pub async fn generate_to_address(
        &self,
        network: ChainNetwork,
        count: u32,
        address: &str,
    ) -> Result<Vec<String>> {
        require_regtest(network)?;
        if address.is_empty() {
            return Err(Error::invalid_input("address", "required"));
        }
        let value = self
            .rpc
            .call(
                RpcCommand::GenerateToAddress,
                network,
                vec![json!(count), json!(address)],
            )
            .await?;
        decode(RpcCommand::GenerateToAddress, value)
    }

    pub async fn stop(&self, network: ChainNetwork) -> Result<()> {
        self.rpc.call(RpcCommand::Stop, network, vec![]).await?;
        Ok(())
    }

    /// A fresh receive address from the daemon wallet.
    pub async fn create_new_address(&self, network: ChainNetwork) -> Result<String> {
        let value = self
            .rpc
            .call(RpcCommand::CreateNewAddress, network, vec![])
            .await?;
        decode(RpcCommand::CreateNewAddress, value)
    }
}

/// Converts a big-unit-per-kilovbyte rate to whole tokens per vbyte, rounding up.
pub fn tokens_per_vbyte(per_kvbyte: f64) -> Result<u64> {
    let per_kvbyte = Amount::from_btc(per_kvbyte)
        .map_err(|e| Error::UnexpectedResponse(format!("fee rate {per_kvbyte}: {e}")))?;
    Ok(per_kvbyte.to_sat().div_ceil(1_000).max(1))
}

fn decode<D: DeserializeOwned>(command: RpcCommand, value: Value) -> Result<D> {
    serde_json::from_value(value).map_err(|e| unexpected_err(command, e))
}

fn unexpected(command: RpcCommand, value: Value) -> Error {
    Error::UnexpectedResponse(format!("{}: unexpected result {value}", command.method()))
}

fn unexpected_err(command: RpcCommand, err: serde_json::Error) -> Error {
    Error::UnexpectedResponse(format!("{}: {err}", command.method()))
}

fn require_block_id(block_id: &str) -> Result<()> {
    BlockHash::from_str(block_id)
        .map(|_| ())
        .map_err(|e| Error::invalid_input("block_id", e.to_string()))
}

fn require_txid(field: &'static str, txid: &str) -> Result<()> {
    Txid::from_str(txid)
        .map(|_| ())
        .map_err(|e| Error::invalid_input(field, e.to_string()))
}

fn require_regtest(network: ChainNetwork) -> Result<()> {
    if network.is_regtest() {
        Ok(())
    } else {
        Err(Error::invalid_input(
            "network",
            format!("block generation is only available on regtest, not {network}"),
        ))
    }
}
