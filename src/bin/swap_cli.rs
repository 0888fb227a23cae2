use std::str::FromStr as _;
use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::{ScriptBuf, Txid};
use clap::{Parser as _, Subcommand};
use ln_chain_swap::chain::health::BackendMonitor;
use ln_chain_swap::chain::network::ChainNetwork;
use ln_chain_swap::chain::query::ChainQuery;
use ln_chain_swap::chain::rpc::RpcClient;
use ln_chain_swap::chain::script::{RefundIdentity, compose_redeem_script, derive_addresses};
use ln_chain_swap::chain::tx::{SpendParams, UtxoRef, build_claim, build_refund, build_sweep};
use ln_chain_swap::config::{CredentialTable, RpcClientConfig};
use ln_chain_swap::lightning::ldk::LdkLightningClient;
use ln_chain_swap::swap::cache::MemoryCache;
use ln_chain_swap::swap::pricing::price_swap;
use ln_chain_swap::swap::service::{SwapConfig, SwapService};
use ln_chain_swap::swap::{SwapDeposit, SwapOffer};
use serde_json::json;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "regtest")]
    network: ChainNetwork,

    #[arg(long, default_value_t = 500)]
    rpc_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compose a swap redeem script and its addresses.
    Script {
        #[arg(long)]
        payment_hash: String,

        #[arg(long)]
        destination_public_key: String,

        #[arg(long)]
        timeout_block_height: u32,

        #[arg(long, conflicts_with = "refund_public_key_hash")]
        refund_public_key: Option<String>,

        #[arg(long)]
        refund_public_key_hash: Option<String>,
    },
    /// Price a swap.
    Price {
        #[arg(long, default_value_t = 0)]
        base_rate: u64,

        #[arg(long)]
        fee_rate: u64,

        #[arg(long, default_value_t = 1.0)]
        rate_source: f64,

        #[arg(long, default_value_t = 1.0)]
        rate_destination: f64,

        #[arg(long)]
        send_tokens: u64,

        #[arg(long, default_value_t = 0)]
        swap_rate_ppm: u64,
    },
    /// Spend deposits through the hash-lock branch.
    Claim {
        #[arg(long)]
        preimage: String,

        #[command(flatten)]
        spend: SpendArgs,
    },
    /// Spend deposits through the time-lock branch.
    Refund {
        #[command(flatten)]
        spend: SpendArgs,
    },
    /// Move deposits to a new destination through the hash-lock branch.
    Sweep {
        #[arg(long)]
        preimage: String,

        #[command(flatten)]
        spend: SpendArgs,
    },
    /// Offer a swap for an invoice, wait for the deposit, then pay and claim.
    Swap {
        #[arg(long)]
        invoice: String,

        #[arg(long, conflicts_with = "refund_public_key_hash")]
        refund_public_key: Option<String>,

        #[arg(long)]
        refund_public_key_hash: Option<String>,

        /// ldk-server REST address, e.g. `127.0.0.1:3002`.
        #[arg(long)]
        ldk_server: String,

        /// Key of the claim branch, WIF or 64 hex characters.
        #[arg(long)]
        claim_private_key: String,

        #[arg(long, default_value_t = 1_000)]
        base_rate: u64,

        #[arg(long, default_value_t = 5_000)]
        swap_rate_ppm: u64,

        #[arg(long, default_value_t = 144)]
        timeout_blocks: u32,

        /// Confirmations a deposit needs before the invoice is paid.
        #[arg(long, default_value_t = 1)]
        min_confirmations: u32,

        #[arg(long, default_value_t = 3_600)]
        deposit_timeout_secs: u64,
    },
    /// Current fee rate, tokens per vbyte.
    FeeRate,
    /// Check that the chain backend follows the chain tip.
    Health,
    /// Submit a raw transaction.
    Broadcast {
        #[arg(long)]
        transaction: String,
    },
}

#[derive(Debug, clap::Args)]
struct SpendArgs {
    /// Deposit to spend, as `txid:vout:value`. Repeatable.
    #[arg(long = "utxo", required = true)]
    utxos: Vec<String>,

    #[arg(long)]
    redeem_script: String,

    #[arg(long)]
    destination_address: String,

    /// WIF or 64 hex characters.
    #[arg(long)]
    private_key: String,

    /// Tokens per vbyte. Queried from the chain daemon when omitted.
    #[arg(long)]
    fee_rate: Option<u64>,

    /// Queried from the chain daemon when omitted.
    #[arg(long)]
    current_height: Option<u32>,

    #[arg(long, default_value_t = false)]
    broadcast: bool,
}

enum Spend {
    Claim([u8; 32]),
    Refund,
    Sweep([u8; 32]),
}

#[tokio::main]
async fn main() -> Result<()> {
    ln_chain_swap::logging::init().ok();
    let args = Args::parse();
    let network = args.network;
    let rpc_timeout = Duration::from_millis(args.rpc_timeout_ms);

    let out = match args.command {
        Command::Script {
            payment_hash,
            destination_public_key,
            timeout_block_height,
            refund_public_key,
            refund_public_key_hash,
        } => {
            let payment_hash = hex::decode(payment_hash).context("decode payment_hash")?;
            let destination_public_key =
                hex::decode(destination_public_key).context("decode destination_public_key")?;
            let refund = refund_identity(refund_public_key, refund_public_key_hash)?;

            let redeem_script = compose_redeem_script(
                &payment_hash,
                &destination_public_key,
                timeout_block_height,
                refund,
            )?;
            let address = derive_addresses(&redeem_script, network)?;

            json!({
              "redeem_script": hex::encode(redeem_script.as_bytes()),
              "witness_program": address.witness_program,
              "witness_address": address.witness_address,
              "nested_address": address.nested_address,
              "p2sh_address": address.p2sh_address,
            })
        }
        Command::Price {
            base_rate,
            fee_rate,
            rate_source,
            rate_destination,
            send_tokens,
            swap_rate_ppm,
        } => {
            let price = price_swap(
                base_rate,
                fee_rate,
                rate_source,
                rate_destination,
                send_tokens,
                swap_rate_ppm,
            )?;
            serde_json::to_value(price)?
        }
        Command::Claim { preimage, spend } => {
            let preimage = decode_preimage(&preimage)?;
            spend_json(network, rpc_timeout, spend, Spend::Claim(preimage)).await?
        }
        Command::Refund { spend } => spend_json(network, rpc_timeout, spend, Spend::Refund).await?,
        Command::Sweep { preimage, spend } => {
            let preimage = decode_preimage(&preimage)?;
            spend_json(network, rpc_timeout, spend, Spend::Sweep(preimage)).await?
        }
        Command::Swap {
            invoice,
            refund_public_key,
            refund_public_key_hash,
            ldk_server,
            claim_private_key,
            base_rate,
            swap_rate_ppm,
            timeout_blocks,
            min_confirmations,
            deposit_timeout_secs,
        } => {
            let refund = refund_identity(refund_public_key, refund_public_key_hash)?;
            let cfg = SwapConfig {
                base_rate,
                swap_rate_ppm,
                timeout_blocks,
                min_confirmations,
                ..SwapConfig::new(claim_private_key)
            };
            let service = SwapService::new(
                cfg,
                chain_query(rpc_timeout)?,
                LdkLightningClient::new(ldk_server),
                MemoryCache::new(),
            )?;

            let offer = service
                .create_swap(&invoice, refund)
                .await
                .context("create swap")?;
            println!("{}", serde_json::to_string_pretty(&offer)?);

            let deposits = wait_for_deposits(
                &service,
                &offer,
                min_confirmations,
                Duration::from_secs(deposit_timeout_secs),
            )
            .await?;
            let completion = service
                .complete_swap(&offer.address.witness_address, &deposits)
                .await
                .context("complete swap")?;
            serde_json::to_value(completion)?
        }
        Command::FeeRate => {
            let fee_rate = chain_query(rpc_timeout)?
                .get_fee_rate(network)
                .await
                .context("get fee rate")?;
            json!({ "network": network, "fee_tokens_per_vbyte": fee_rate })
        }
        Command::Health => {
            let monitor = BackendMonitor::new(chain_query(rpc_timeout)?);
            let tip = monitor
                .confirm_backend_live(network)
                .await
                .context("confirm backend live")?;
            json!({
              "network": network,
              "tip_hash": tip.hash,
              "tip_height": tip.height,
              "tip_time": tip.time,
            })
        }
        Command::Broadcast { transaction } => {
            let txid = chain_query(rpc_timeout)?
                .broadcast(network, &transaction)
                .await
                .context("broadcast transaction")?;
            json!({ "transaction_id": txid })
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn refund_identity(
    public_key: Option<String>,
    public_key_hash: Option<String>,
) -> Result<RefundIdentity> {
    let public_key = public_key
        .map(hex::decode)
        .transpose()
        .context("decode refund_public_key")?;
    let public_key_hash = public_key_hash
        .map(hex::decode)
        .transpose()
        .context("decode refund_public_key_hash")?;
    Ok(RefundIdentity::from_parts(
        public_key.as_deref(),
        public_key_hash.as_deref(),
    )?)
}

/// Polls the chain until confirmed deposits cover the swap price.
async fn wait_for_deposits(
    service: &SwapService<LdkLightningClient, MemoryCache>,
    offer: &SwapOffer,
    min_confirmations: u32,
    timeout: Duration,
) -> Result<Vec<SwapDeposit>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match service.find_deposits(offer).await {
            Ok(deposits) => {
                let deposits: Vec<SwapDeposit> = deposits
                    .into_iter()
                    .filter(|d| d.confirmations >= min_confirmations)
                    .collect();
                let deposited: u64 = deposits.iter().map(|d| d.value).sum();
                if deposited >= offer.price.total_tokens {
                    tracing::info!(deposited, count = deposits.len(), "swap funded");
                    return Ok(deposits);
                }
            }
            Err(err) => tracing::warn!(error = %err, "scan for deposits failed"),
        }

        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "timeout waiting for deposit to {}",
                offer.address.witness_address
            );
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

fn chain_query(rpc_timeout: Duration) -> Result<ChainQuery> {
    let credentials = CredentialTable::from_env().context("load rpc credentials")?;
    let config = RpcClientConfig {
        timeout: rpc_timeout,
        ..RpcClientConfig::default()
    };
    Ok(ChainQuery::new(RpcClient::new(credentials, config)))
}

async fn spend_json(
    network: ChainNetwork,
    rpc_timeout: Duration,
    args: SpendArgs,
    spend: Spend,
) -> Result<serde_json::Value> {
    let redeem_script = hex::decode(&args.redeem_script)
        .map(ScriptBuf::from_bytes)
        .context("decode redeem_script")?;
    let utxos = args
        .utxos
        .iter()
        .map(|utxo| parse_utxo(utxo, &redeem_script))
        .collect::<Result<Vec<_>>>()?;

    let query = chain_query(rpc_timeout)?;
    let fee_rate = match args.fee_rate {
        Some(fee_rate) => fee_rate,
        None => query.get_fee_rate(network).await.context("get fee rate")?,
    };
    let current_height = match args.current_height {
        Some(height) => height,
        None => query
            .get_current_height(network)
            .await
            .context("get current height")?,
    };

    let params = SpendParams {
        utxos: &utxos,
        destination_address: &args.destination_address,
        network,
        fee_rate,
        private_key: &args.private_key,
        current_height,
    };
    let signed = match spend {
        Spend::Claim(preimage) => build_claim(params, preimage)?,
        Spend::Refund => build_refund(params)?,
        Spend::Sweep(preimage) => build_sweep(params, preimage)?,
    };

    let broadcast_txid = if args.broadcast {
        Some(
            query
                .broadcast(network, &signed.hex())
                .await
                .context("broadcast transaction")?,
        )
    } else {
        None
    };

    Ok(json!({
      "transaction_id": signed.txid().to_string(),
      "transaction": signed.hex(),
      "fee": signed.fee,
      "anticipated_vsize": signed.anticipated_vsize,
      "broadcast_txid": broadcast_txid,
    }))
}

fn parse_utxo(utxo: &str, redeem_script: &ScriptBuf) -> Result<UtxoRef> {
    let mut parts = utxo.split(':');
    let (Some(txid), Some(vout), Some(value), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("utxo must be txid:vout:value, got {utxo}");
    };

    Ok(UtxoRef {
        transaction_id: Txid::from_str(txid).with_context(|| format!("parse txid {txid}"))?,
        vout: vout.parse().with_context(|| format!("parse vout {vout}"))?,
        value: value.parse().with_context(|| format!("parse value {value}"))?,
        redeem_script: redeem_script.clone(),
    })
}

fn decode_preimage(preimage: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(preimage).context("decode preimage hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("preimage must be 32 bytes"))
}
