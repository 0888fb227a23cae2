use std::fs;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use bitcoincore_rpc::bitcoin::address::NetworkUnchecked;
use bitcoincore_rpc::bitcoin::{Address, Amount, Network, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi as _};
use ln_chain_swap::chain::network::ChainNetwork;
use ln_chain_swap::config::{CredentialTable, RpcCredentials};
use tempfile::TempDir;

use super::port::free_port;

const RPC_USER: &str = "swap";
const RPC_PASSWORD: &str = "swap";
const WALLET: &str = "miner";
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// A throwaway regtest `bitcoind` with one funded-on-demand wallet.
pub struct BitcoindProcess {
    datadir: Option<TempDir>,
    rpc_port: u16,
    child: Child,
    wallet: Client,
}

impl BitcoindProcess {
    pub fn start() -> Result<Self> {
        let datadir = tempfile::tempdir().context("create bitcoind datadir")?;
        let rpc_port = free_port().context("pick rpc port")?;
        let p2p_port = free_port().context("pick p2p port")?;

        let conf = format!(
            "regtest=1\nserver=1\ntxindex=1\nrpcuser={RPC_USER}\nrpcpassword={RPC_PASSWORD}\n\
             [regtest]\nfallbackfee=0.0001\nrpcbind=127.0.0.1\nrpcallowip=127.0.0.1\n\
             rpcport={rpc_port}\nport={p2p_port}\n"
        );
        let conf_path = datadir.path().join("bitcoin.conf");
        fs::write(&conf_path, conf).context("write bitcoin.conf")?;
        let log = fs::File::create(datadir.path().join("bitcoind.log")).context("create log")?;

        let mut child = Command::new("bitcoind")
            .arg(format!("-datadir={}", datadir.path().display()))
            .arg(format!("-conf={}", conf_path.display()))
            .arg("-printtoconsole=1")
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()
            .context("spawn bitcoind")?;

        let node = rpc_client(rpc_port, "")?;
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        while node.get_blockchain_info().is_err() {
            if let Some(status) = child.try_wait()? {
                anyhow::bail!("bitcoind exited with {status}, see {}", keep(datadir));
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                anyhow::bail!("bitcoind rpc not ready, see {}", keep(datadir));
            }
            std::thread::sleep(Duration::from_millis(200));
        }

        node.create_wallet(WALLET, None, None, None, None)
            .context("create miner wallet")?;
        let wallet = rpc_client(rpc_port, &format!("/wallet/{WALLET}"))?;

        Ok(Self {
            datadir: Some(datadir),
            rpc_port,
            child,
            wallet,
        })
    }

    /// Credentials pointing the swap rpc client at this daemon.
    pub fn credentials(&self) -> CredentialTable {
        let mut table = CredentialTable::new();
        table.insert(
            ChainNetwork::Regtest,
            RpcCredentials {
                host: "127.0.0.1".to_string(),
                port: Some(self.rpc_port),
                user: RPC_USER.to_string(),
                password: RPC_PASSWORD.to_string(),
            },
        );
        table
    }

    /// Mines `blocks` to the miner wallet.
    pub fn mine_blocks(&self, blocks: u64) -> Result<()> {
        let address = self
            .wallet
            .get_new_address(None, None)
            .context("get mining address")?
            .require_network(Network::Regtest)?;
        self.wallet
            .generate_to_address(blocks, &address)
            .context("generate blocks")?;
        Ok(())
    }

    pub fn send_to_address(&self, address: &str, sats: u64) -> Result<Txid> {
        let address = address
            .parse::<Address<NetworkUnchecked>>()
            .with_context(|| format!("parse address {address}"))?
            .require_network(Network::Regtest)?;
        self.wallet
            .send_to_address(
                &address,
                Amount::from_sat(sats),
                None,
                None,
                None,
                None,
                None,
                None,
            )
            .context("send to address")
    }
}

impl Drop for BitcoindProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if std::thread::panicking()
            && let Some(datadir) = self.datadir.take()
        {
            eprintln!("bitcoind datadir kept at {}", keep(datadir));
        }
    }
}

fn rpc_client(port: u16, path: &str) -> Result<Client> {
    let auth = Auth::UserPass(RPC_USER.to_string(), RPC_PASSWORD.to_string());
    Client::new(&format!("http://127.0.0.1:{port}{path}"), auth).context("create bitcoind client")
}

/// Persists the datadir when `KEEP_SWAP_E2E_ARTIFACTS` is set; returns its path.
fn keep(datadir: TempDir) -> String {
    let path = datadir.path().display().to_string();
    if std::env::var_os("KEEP_SWAP_E2E_ARTIFACTS").is_some() {
        let _ = datadir.keep();
    }
    path
}
