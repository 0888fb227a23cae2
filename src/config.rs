use std::collections::HashMap;
use std::time::Duration;

use crate::chain::network::ChainNetwork;
use crate::error::{Error, Result};

const DEFAULT_RPC_HOST: &str = "127.0.0.1";

/// Connection details of one chain daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcCredentials {
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: String,
}

/// A resolved daemon endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl RpcEndpoint {
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Per-network daemon credentials.
#[derive(Debug, Clone, Default)]
pub struct CredentialTable {
    entries: HashMap<ChainNetwork, RpcCredentials>,
}

impl CredentialTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Static defaults for every known network: local host, the chain's
    /// default RPC port, empty credentials.
    pub fn with_defaults() -> Self {
        let entries = ChainNetwork::ALL
            .into_iter()
            .map(|network| {
                (
                    network,
                    RpcCredentials {
                        host: DEFAULT_RPC_HOST.to_string(),
                        port: Some(network.params().default_rpc_port),
                        user: String::new(),
                        password: String::new(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Defaults overridden by `SWAP_<NETWORK>_RPC_{HOST,PORT,USER,PASSWORD}`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut table = Self::with_defaults();
        for (network, creds) in table.entries.iter_mut() {
            let prefix = format!("SWAP_{}_RPC", network.as_str().to_ascii_uppercase());

            if let Some(host) = lookup(&format!("{prefix}_HOST")) {
                creds.host = host;
            }
            if let Some(port) = lookup(&format!("{prefix}_PORT")) {
                creds.port = if port.trim().is_empty() {
                    None
                } else {
                    Some(port.trim().parse().map_err(|e| {
                        Error::invalid_input("port", format!("{prefix}_PORT={port}: {e}"))
                    })?)
                };
            }
            if let Some(user) = lookup(&format!("{prefix}_USER")) {
                creds.user = user;
            }
            if let Some(password) = lookup(&format!("{prefix}_PASSWORD")) {
                creds.password = password;
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, network: ChainNetwork, credentials: RpcCredentials) {
        self.entries.insert(network, credentials);
    }

    pub fn resolve(&self, network: ChainNetwork) -> Result<RpcEndpoint> {
        let creds = self
            .entries
            .get(&network)
            .ok_or_else(|| Error::UnknownNetwork(network.to_string()))?;
        let port = creds
            .port
            .ok_or_else(|| Error::MissingPort(network.to_string()))?;

        Ok(RpcEndpoint {
            host: creds.host.clone(),
            port,
            user: creds.user.clone(),
            password: creds.password.clone(),
        })
    }
}

/// Tuning of the chain RPC client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub max_in_flight: usize,
    pub pause: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            max_in_flight: 2,
            pause: Duration::from_secs(3),
        }
    }
}
