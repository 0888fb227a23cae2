use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::Hash as _;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use crate::chain::keys::{parse_private_key, public_key};
use crate::chain::network::ChainNetwork;
use crate::chain::script::{RefundIdentity, SwapScript, decode_address, sha256_preimage};
use crate::error::{Error, Result};

/// Weight units per virtual byte.
const WITNESS_SCALE_FACTOR: u64 = 4;
const SHORT_PUSHDATA_LEN: u64 = 1;
/// DER signature plus sighash flag.
const MAX_SIGNATURE_LEN: u64 = 72;
const PREIMAGE_LEN: u64 = 32;
const PUBLIC_KEY_LEN: u64 = 33;
const SEQUENCE_LEN: u64 = 4;

/// A swap deposit observed on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoRef {
    pub transaction_id: Txid,
    pub vout: u32,
    pub value: u64,
    pub redeem_script: ScriptBuf,
}

impl UtxoRef {
    fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.transaction_id,
            vout: self.vout,
        }
    }
}

/// Fully signed transaction, ready for broadcast.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub fee: u64,
    /// Virtual size the fee was priced against.
    pub anticipated_vsize: u64,
}

impl SignedTransaction {
    pub fn txid(&self) -> Txid {
        self.transaction.compute_txid()
    }

    pub fn hex(&self) -> String {
        serialize_hex(&self.transaction)
    }
}

/// Inputs shared by every spend of swap deposits.
#[derive(Debug, Clone, Copy)]
pub struct SpendParams<'a> {
    pub utxos: &'a [UtxoRef],
    pub destination_address: &'a str,
    pub network: ChainNetwork,
    /// Tokens per vbyte.
    pub fee_rate: u64,
    pub private_key: &'a str,
    pub current_height: u32,
}

#[derive(Debug, Clone, Copy)]
enum SpendPath {
    Claim([u8; 32]),
    Refund,
}

/// Spends swap deposits through the hash-lock branch by revealing `preimage`.
pub fn build_claim(params: SpendParams<'_>, preimage: [u8; 32]) -> Result<SignedTransaction> {
    build_spend(params, SpendPath::Claim(preimage))
}

/// Spends swap deposits through the time-lock branch.
pub fn build_refund(params: SpendParams<'_>) -> Result<SignedTransaction> {
    build_spend(params, SpendPath::Refund)
}

/// Moves swap deposits to a new destination through the hash-lock branch.
/// Same witness as [`build_claim`].
pub fn build_sweep(params: SpendParams<'_>, preimage: [u8; 32]) -> Result<SignedTransaction> {
    build_spend(params, SpendPath::Claim(preimage))
}

fn build_spend(params: SpendParams<'_>, path: SpendPath) -> Result<SignedTransaction> {
    if params.utxos.is_empty() {
        return Err(Error::NoInputs);
    }
    if params.fee_rate == 0 {
        return Err(Error::invalid_input("fee_rate", "must be non-zero"));
    }

    let secp = Secp256k1::new();
    let secret_key = parse_private_key(params.private_key)?;
    let signer_key = public_key(&secp, &secret_key);

    let destination = decode_address(params.destination_address, params.network)?;

    let mut dummy_lens = Vec::with_capacity(params.utxos.len());
    for utxo in params.utxos {
        let swap = SwapScript::parse(&utxo.redeem_script)?;
        let dummy_len = match path {
            SpendPath::Claim(preimage) => {
                if sha256_preimage(&preimage) != swap.payment_hash {
                    return Err(Error::invalid_input(
                        "preimage",
                        "does not hash to the swap payment hash",
                    ));
                }
                if swap.destination_public_key != signer_key {
                    return Err(Error::InvalidPrivateKey(
                        "key does not match swap destination key".to_string(),
                    ));
                }
                PREIMAGE_LEN
            }
            SpendPath::Refund => {
                if !swap.refund.matches(&signer_key) {
                    return Err(Error::InvalidPrivateKey(
                        "key does not match swap refund identity".to_string(),
                    ));
                }
                if params.current_height < swap.timeout_block_height {
                    return Err(Error::invalid_input(
                        "current_height",
                        format!(
                            "refund locked until height {}, chain is at {}",
                            swap.timeout_block_height, params.current_height
                        ),
                    ));
                }
                match swap.refund {
                    RefundIdentity::PublicKey(_) => 0,
                    RefundIdentity::PublicKeyHash(_) => PUBLIC_KEY_LEN,
                }
            }
        };
        dummy_lens.push(dummy_len);
    }

    let lock_time = LockTime::from_height(params.current_height)
        .map_err(|e| Error::invalid_input("current_height", e.to_string()))?;
    let sequence = match path {
        SpendPath::Claim(_) => Sequence::MAX,
        SpendPath::Refund => Sequence::ENABLE_LOCKTIME_NO_RBF,
    };

    let total = params
        .utxos
        .iter()
        .try_fold(0u64, |sum, utxo| sum.checked_add(utxo.value))
        .ok_or_else(|| Error::invalid_input("utxos", "input values overflow"))?;

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time,
        input: params
            .utxos
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value: Amount::from_sat(total),
            script_pubkey: destination,
        }],
    };

    let witness_weight: u64 = params
        .utxos
        .iter()
        .zip(&dummy_lens)
        .map(|(utxo, dummy_len)| {
            SHORT_PUSHDATA_LEN
                + SHORT_PUSHDATA_LEN
                + MAX_SIGNATURE_LEN
                + SHORT_PUSHDATA_LEN
                + dummy_len
                + SEQUENCE_LEN
                + SHORT_PUSHDATA_LEN
                + utxo.redeem_script.len() as u64
        })
        .sum();
    let anticipated_weight = tx.weight().to_wu() + witness_weight;
    let anticipated_vsize = anticipated_weight.div_ceil(WITNESS_SCALE_FACTOR);

    let fee = params
        .fee_rate
        .checked_mul(anticipated_vsize)
        .ok_or_else(|| Error::invalid_input("fee_rate", "fee overflows"))?;
    if fee >= total {
        return Err(Error::FeeExceedsValue { fee, value: total });
    }
    tx.output[0].value = Amount::from_sat(total - fee);

    let sighash_type = EcdsaSighashType::All;
    let mut witnesses = Vec::with_capacity(tx.input.len());
    {
        let mut cache = SighashCache::new(&tx);
        for (index, utxo) in params.utxos.iter().enumerate() {
            let signature = segwit_v0_sign(
                &secp,
                &mut cache,
                index,
                &utxo.redeem_script,
                utxo.value,
                &secret_key,
                sighash_type,
            )?;

            let middle = match path {
                SpendPath::Claim(preimage) => preimage.to_vec(),
                SpendPath::Refund if dummy_lens[index] == PUBLIC_KEY_LEN => {
                    signer_key.serialize().to_vec()
                }
                SpendPath::Refund => Vec::new(),
            };
            witnesses.push(Witness::from_slice(&[
                signature,
                middle,
                utxo.redeem_script.to_bytes(),
            ]));
        }
    }
    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }

    let signed = SignedTransaction {
        transaction: tx,
        fee,
        anticipated_vsize,
    };
    tracing::debug!(
        txid = %signed.txid(),
        inputs = params.utxos.len(),
        fee,
        anticipated_vsize,
        refund = matches!(path, SpendPath::Refund),
        "signed swap spend"
    );
    Ok(signed)
}

fn segwit_v0_sign(
    secp: &Secp256k1<All>,
    cache: &mut SighashCache<&Transaction>,
    input_index: usize,
    witness_script: &Script,
    value: u64,
    secret_key: &SecretKey,
    sighash_type: EcdsaSighashType,
) -> Result<Vec<u8>> {
    let sighash = cache
        .p2wsh_signature_hash(
            input_index,
            witness_script,
            Amount::from_sat(value),
            sighash_type,
        )
        .map_err(|e| Error::invalid_input("utxos", format!("sighash input {input_index}: {e}")))?;

    let msg = Message::from_digest(sighash.to_byte_array());
    let sig = secp.sign_ecdsa(&msg, secret_key);
    let mut sig_bytes = sig.serialize_der().to_vec();
    sig_bytes.push(sighash_type.to_u32() as u8);
    Ok(sig_bytes)
}
