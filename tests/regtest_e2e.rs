mod support;

use std::str::FromStr as _;
use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::Txid;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use ln_chain_swap::Error;
use ln_chain_swap::chain::health::BackendMonitor;
use ln_chain_swap::chain::network::ChainNetwork;
use ln_chain_swap::chain::query::ChainQuery;
use ln_chain_swap::chain::rpc::RpcClient;
use ln_chain_swap::chain::script::{
    RefundIdentity, SwapAddress, SwapScript, derive_addresses, sha256_preimage,
};
use ln_chain_swap::chain::tx::{SpendParams, UtxoRef, build_claim, build_refund};
use ln_chain_swap::config::RpcClientConfig;

use support::bitcoind::BitcoindProcess;
use support::wait::wait_for;

const NET: ChainNetwork = ChainNetwork::Regtest;
const DEPOSIT: u64 = 100_000;

async fn fund(
    bitcoind: &BitcoindProcess,
    query: &ChainQuery,
    address: &SwapAddress,
    redeem_script: &bitcoin::ScriptBuf,
) -> Result<UtxoRef> {
    let funding_txid = bitcoind
        .send_to_address(&address.witness_address, DEPOSIT)
        .context("fund swap address")?
        .to_string();
    bitcoind.mine_blocks(1).context("confirm funding")?;

    for vout in 0..2 {
        if let Some(utxo) = query.get_utxo(NET, &funding_txid, vout).await?
            && utxo.script_pub_key == address.witness_program
        {
            assert_eq!(utxo.value, DEPOSIT);
            assert!(utxo.confirmations >= 1);
            return Ok(UtxoRef {
                transaction_id: Txid::from_str(&funding_txid)?,
                vout,
                value: utxo.value,
                redeem_script: redeem_script.clone(),
            });
        }
    }
    anyhow::bail!("funding output not found in {funding_txid}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires `bitcoind` binary"]
async fn regtest_claim_and_refund() -> Result<()> {
    let _ = ln_chain_swap::logging::init();

    let bitcoind = BitcoindProcess::start().context("start bitcoind")?;
    bitcoind.mine_blocks(101).context("mine initial blocks")?;

    let query = ChainQuery::new(RpcClient::new(
        bitcoind.credentials(),
        RpcClientConfig {
            timeout: Duration::from_secs(5),
            ..RpcClientConfig::default()
        },
    ));
    let height = query.get_current_height(NET).await?;
    assert_eq!(height, 101);
    let tip = BackendMonitor::new(query.clone())
        .confirm_backend_live(NET)
        .await
        .context("backend live")?;
    assert_eq!(tip.height, height);

    let secp = Secp256k1::new();
    let claim_key = SecretKey::from_slice(&[1u8; 32])?;
    let refund_key = SecretKey::from_slice(&[2u8; 32])?;
    let refund = RefundIdentity::PublicKey(refund_key.public_key(&secp));
    let destination = query.create_new_address(NET).await?;

    // Claim: reveal the preimage.
    let preimage = [5u8; 32];
    let redeem_script = SwapScript::new(
        &sha256_preimage(&preimage),
        claim_key.public_key(&secp),
        height + 10,
        refund,
    )?
    .redeem_script()?;
    let address = derive_addresses(&redeem_script, NET)?;
    let deposit = fund(&bitcoind, &query, &address, &redeem_script).await?;

    let current_height = query.get_current_height(NET).await?;
    let claim_key_hex = hex::encode(claim_key.secret_bytes());
    let utxos = [deposit];
    let claim = build_claim(
        SpendParams {
            utxos: &utxos,
            destination_address: &destination,
            network: NET,
            fee_rate: 2,
            private_key: &claim_key_hex,
            current_height,
        },
        preimage,
    )?;
    let claim_txid = query.broadcast(NET, &claim.hex()).await?;
    assert_eq!(claim_txid, claim.txid().to_string());
    assert!(query.get_mempool(NET).await?.contains(&claim_txid));

    query.generate_to_address(NET, 1, &destination).await?;
    let (query_ref, claim_txid_ref) = (&query, &claim_txid);
    let claimed = wait_for("claim confirmation", Duration::from_secs(10), move || async move {
        Ok(query_ref.get_utxo(NET, claim_txid_ref, 0).await?)
    })
    .await?;
    assert_eq!(claimed.value, DEPOSIT - claim.fee);

    // Refund: wait out the timeout.
    let current_height = query.get_current_height(NET).await?;
    let timeout = current_height + 5;
    let redeem_script = SwapScript::new(
        &sha256_preimage(&[6u8; 32]),
        claim_key.public_key(&secp),
        timeout,
        refund,
    )?
    .redeem_script()?;
    let address = derive_addresses(&redeem_script, NET)?;
    let deposit = fund(&bitcoind, &query, &address, &redeem_script).await?;
    let utxos = [deposit];
    let refund_key_hex = hex::encode(refund_key.secret_bytes());

    let early_height = query.get_current_height(NET).await?;
    let err = build_refund(SpendParams {
        utxos: &utxos,
        destination_address: &destination,
        network: NET,
        fee_rate: 2,
        private_key: &refund_key_hex,
        current_height: early_height,
    })
    .unwrap_err();
    assert!(matches!(err, Error::InvalidInput { field: "current_height", .. }));

    bitcoind.mine_blocks(u64::from(timeout - early_height))?;
    let current_height = query.get_current_height(NET).await?;
    assert_eq!(current_height, timeout);

    let refund_tx = build_refund(SpendParams {
        utxos: &utxos,
        destination_address: &destination,
        network: NET,
        fee_rate: 2,
        private_key: &refund_key_hex,
        current_height,
    })?;
    let refund_txid = query.broadcast(NET, &refund_tx.hex()).await?;
    assert_eq!(refund_txid, refund_tx.txid().to_string());

    let raw = query.get_transaction(NET, &refund_txid).await?;
    assert_eq!(raw, refund_tx.hex());

    Ok(())
}
