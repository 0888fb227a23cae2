use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::{Block, Script, ScriptBuf, Transaction, Txid};

use crate::chain::keys::{parse_private_key, public_key};
use crate::chain::query::ChainQuery;
use crate::chain::rpc::{HttpTransport, RpcTransport};
use crate::chain::script::{
    RefundIdentity, SwapScript, derive_addresses, sha256_preimage, witness_program,
};
use crate::chain::tx::{SpendParams, UtxoRef, build_claim};
use crate::error::{Error, Result};
use crate::lightning::LightningClient;
use crate::lightning::invoice::parse_invoice;
use crate::swap::cache::{SwapCache, scoped_key};
use crate::swap::pricing::price_swap;
use crate::swap::{SwapCompletion, SwapDeposit, SwapOffer, SwapRecord};

const SWAP_KEY: &str = "swap";
const PAYMENT_KEY: &str = "payment";

#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// Flat fee per swap, in chain tokens.
    pub base_rate: u64,
    pub swap_rate_ppm: u64,
    pub rate_source: f64,
    pub rate_destination: f64,
    /// Blocks until the requester may refund.
    pub timeout_blocks: u32,
    /// How long an unfunded swap is remembered.
    pub swap_ttl: Duration,
    /// Confirmations a deposit needs before the invoice is paid.
    pub min_confirmations: u32,
    /// Key of the script's claim branch, WIF or hex.
    pub claim_private_key: String,
}

impl SwapConfig {
    pub fn new(claim_private_key: String) -> Self {
        Self {
            base_rate: 1_000,
            swap_rate_ppm: 5_000,
            rate_source: 1.0,
            rate_destination: 1.0,
            timeout_blocks: 144,
            swap_ttl: Duration::from_secs(24 * 60 * 60),
            min_confirmations: 1,
            claim_private_key,
        }
    }
}

/// Creates chain-to-Lightning swaps and completes them once funded.
pub struct SwapService<L, C, T = HttpTransport> {
    cfg: SwapConfig,
    claim_public_key: PublicKey,
    query: ChainQuery<T>,
    lightning: L,
    cache: C,
}

impl<L, C, T> SwapService<L, C, T>
where
    L: LightningClient,
    C: SwapCache,
    T: RpcTransport,
{
    pub fn new(cfg: SwapConfig, query: ChainQuery<T>, lightning: L, cache: C) -> Result<Self> {
        let secret_key = parse_private_key(&cfg.claim_private_key)?;
        let claim_public_key = public_key(&Secp256k1::signing_only(), &secret_key);
        Ok(Self {
            cfg,
            claim_public_key,
            query,
            lightning,
            cache,
        })
    }

    /// Prices `invoice` and locks a swap output to its payment hash.
    pub async fn create_swap(
        &self,
        invoice: &str,
        refund_identity: RefundIdentity,
    ) -> Result<SwapOffer> {
        let parsed = parse_invoice(invoice)?;
        let network = parsed.network;
        let tokens = parsed
            .tokens
            .filter(|tokens| *tokens > 0)
            .ok_or_else(|| Error::invalid_input("invoice", "amount is required"))?;

        let height = self.query.get_current_height(network).await?;
        let fee_rate = self.query.get_fee_rate(network).await?;
        let price = price_swap(
            self.cfg.base_rate,
            fee_rate,
            self.cfg.rate_source,
            self.cfg.rate_destination,
            tokens,
            self.cfg.swap_rate_ppm,
        )?;

        let timeout_block_height = height
            .checked_add(self.cfg.timeout_blocks)
            .ok_or_else(|| Error::invalid_input("timeout_blocks", "overflows block height"))?;
        let swap = SwapScript::new(
            &parsed.payment_hash,
            self.claim_public_key,
            timeout_block_height,
            refund_identity,
        )?;
        let redeem_script = swap.redeem_script()?;
        let address = derive_addresses(&redeem_script, network)?;

        let payment_hash = hex::encode(parsed.payment_hash);
        let record = SwapRecord {
            network,
            invoice: invoice.trim().to_string(),
            payment_hash: payment_hash.clone(),
            redeem_script_hex: hex::encode(redeem_script.as_bytes()),
            timeout_block_height,
            total_tokens: price.total_tokens,
        };
        let encoded = serde_json::to_string(&record)
            .map_err(|e| Error::invalid_input("swap", format!("encode swap record: {e}")))?;
        self.cache.set(
            &scoped_key(SWAP_KEY, &address.witness_address),
            encoded,
            self.cfg.swap_ttl,
        );
        self.cache.add(
            &scoped_key(PAYMENT_KEY, &payment_hash),
            &address.witness_address,
            address.witness_address.clone(),
            self.cfg.swap_ttl,
        );

        tracing::info!(
            %network,
            address = %address.witness_address,
            %payment_hash,
            timeout_block_height,
            total_tokens = price.total_tokens,
            "swap created"
        );

        Ok(SwapOffer {
            network,
            payment_hash,
            redeem_script_hex: record.redeem_script_hex,
            created_height: height,
            timeout_block_height,
            address,
            price,
        })
    }

    /// Swap addresses created for a payment hash.
    pub fn swaps_for_payment(&self, payment_hash: &str) -> Vec<String> {
        self.cache.members(&scoped_key(PAYMENT_KEY, payment_hash))
    }

    /// Unspent outputs paying to the swap address of `offer`.
    ///
    /// Blocks mined since the swap was created are scanned first, then the
    /// mempool. Mempool transactions that can no longer be fetched are skipped.
    pub async fn find_deposits(&self, offer: &SwapOffer) -> Result<Vec<SwapDeposit>> {
        let network = offer.network;
        let script_pubkey = ScriptBuf::from_hex(&offer.address.witness_program)
            .map_err(|e| Error::invalid_input("witness_program", e.to_string()))?;
        let mut candidates = BTreeSet::new();

        let tip = self.query.get_current_height(network).await?;
        for height in offer.created_height.saturating_add(1)..=tip {
            let hash = self.query.get_block_hash(network, height).await?;
            let raw = self.query.get_block(network, &hash).await?;
            let block: Block = deserialize_hex(&raw)
                .map_err(|e| Error::UnexpectedResponse(format!("decode block {hash}: {e}")))?;
            for tx in &block.txdata {
                collect_outputs(tx, &script_pubkey, &mut candidates);
            }
        }

        for txid in self.query.get_mempool(network).await? {
            let tx = self
                .query
                .get_transaction(network, &txid)
                .await
                .and_then(|raw| {
                    deserialize_hex::<Transaction>(&raw).map_err(|e| {
                        Error::UnexpectedResponse(format!("decode transaction {txid}: {e}"))
                    })
                });
            match tx {
                Ok(tx) => collect_outputs(&tx, &script_pubkey, &mut candidates),
                Err(err) => {
                    tracing::debug!(%network, %txid, error = %err, "skipping mempool transaction");
                }
            }
        }

        let mut deposits = Vec::with_capacity(candidates.len());
        for (transaction_id, vout) in candidates {
            let utxo = self
                .query
                .get_utxo(network, &transaction_id.to_string(), vout)
                .await?;
            if let Some(utxo) = utxo
                && utxo.script_pub_key == offer.address.witness_program
            {
                deposits.push(SwapDeposit {
                    transaction_id,
                    vout,
                    value: utxo.value,
                    confirmations: utxo.confirmations,
                });
            }
        }
        Ok(deposits)
    }

    /// Pays the swap invoice and claims `deposits` to a fresh Lightning node address.
    ///
    /// Only the outpoints of `deposits` are taken from the caller. Values and
    /// confirmations are read back from the daemon before anything is paid.
    pub async fn complete_swap(
        &self,
        address: &str,
        deposits: &[SwapDeposit],
    ) -> Result<SwapCompletion> {
        let key = scoped_key(SWAP_KEY, address);
        // Taking the record claims the swap; concurrent completions find nothing.
        let encoded = self
            .cache
            .take(&key)
            .ok_or_else(|| Error::invalid_input("address", "no pending swap for address"))?;
        let record: SwapRecord = serde_json::from_str(&encoded)
            .map_err(|e| Error::invalid_input("address", format!("decode swap record: {e}")))?;
        let redeem_script = hex::decode(&record.redeem_script_hex)
            .map(ScriptBuf::from_bytes)
            .map_err(|e| Error::invalid_input("redeem_script", e.to_string()))?;
        let network = record.network;

        let utxos = match self.verify_deposits(&record, &redeem_script, deposits).await {
            Ok(utxos) => utxos,
            Err(err) => {
                // Nothing was paid: the swap stays open.
                self.cache.set(&key, encoded, self.cfg.swap_ttl);
                return Err(err);
            }
        };

        let preimage = self.lightning.pay(&record.invoice).await?;
        if hex::encode(sha256_preimage(&preimage)) != record.payment_hash {
            return Err(Error::PreimageMismatch);
        }

        let fee_rate = self.query.get_fee_rate(network).await?;
        let current_height = self.query.get_current_height(network).await?;
        let destination_address = self.lightning.create_address().await?;

        let claim = build_claim(
            SpendParams {
                utxos: &utxos,
                destination_address: &destination_address,
                network,
                fee_rate,
                private_key: &self.cfg.claim_private_key,
                current_height,
            },
            preimage,
        )?;

        let claim_txid = self.query.broadcast(network, &claim.hex()).await?;
        tracing::info!(%network, %address, %claim_txid, fee = claim.fee, "swap claimed");

        Ok(SwapCompletion {
            claim_txid,
            claim_fee: claim.fee,
            destination_address,
        })
    }

    /// Resolves `deposits` against the daemon's UTXO set into claimable inputs.
    async fn verify_deposits(
        &self,
        record: &SwapRecord,
        redeem_script: &Script,
        deposits: &[SwapDeposit],
    ) -> Result<Vec<UtxoRef>> {
        if deposits.is_empty() {
            return Err(Error::NoInputs);
        }
        let expected_script = hex::encode(witness_program(redeem_script));

        let mut seen = HashSet::new();
        let mut utxos = Vec::with_capacity(deposits.len());
        let mut deposited = 0u64;
        for deposit in deposits {
            let outpoint = format!("{}:{}", deposit.transaction_id, deposit.vout);
            if !seen.insert((deposit.transaction_id, deposit.vout)) {
                return Err(Error::invalid_input("deposits", format!("{outpoint} listed twice")));
            }

            let utxo = self
                .query
                .get_utxo(record.network, &deposit.transaction_id.to_string(), deposit.vout)
                .await?
                .ok_or_else(|| {
                    Error::invalid_input("deposits", format!("{outpoint} is not an unspent output"))
                })?;
            if utxo.script_pub_key != expected_script {
                return Err(Error::invalid_input(
                    "deposits",
                    format!("{outpoint} does not pay to the swap script"),
                ));
            }
            if utxo.confirmations < self.cfg.min_confirmations {
                return Err(Error::invalid_input(
                    "deposits",
                    format!(
                        "{outpoint} has {} confirmations, {} required",
                        utxo.confirmations, self.cfg.min_confirmations
                    ),
                ));
            }

            deposited = deposited
                .checked_add(utxo.value)
                .ok_or_else(|| Error::invalid_input("deposits", "value overflow"))?;
            utxos.push(UtxoRef {
                transaction_id: deposit.transaction_id,
                vout: deposit.vout,
                value: utxo.value,
                redeem_script: redeem_script.to_owned(),
            });
        }

        if deposited < record.total_tokens {
            return Err(Error::invalid_input(
                "deposits",
                format!("deposited {deposited}, swap costs {}", record.total_tokens),
            ));
        }
        Ok(utxos)
    }
}

fn collect_outputs(tx: &Transaction, script_pubkey: &Script, into: &mut BTreeSet<(Txid, u32)>) {
    let txid = tx.compute_txid();
    for (vout, output) in tx.output.iter().enumerate() {
        if output.script_pubkey.as_script() == script_pubkey {
            into.insert((txid, vout as u32));
        }
    }
}
