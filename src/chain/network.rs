use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Base chains a swap can settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainNetwork {
    Bitcoin,
    Testnet,
    Regtest,
    Ltc,
    LtcTestnet,
    LtcRegtest,
}

/// Address encoding parameters of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    pub p2pkh_version: u8,
    pub p2sh_version: u8,
    pub bech32_hrp: &'static str,
    pub default_rpc_port: u16,
}

impl ChainNetwork {
    pub const ALL: [ChainNetwork; 6] = [
        ChainNetwork::Bitcoin,
        ChainNetwork::Testnet,
        ChainNetwork::Regtest,
        ChainNetwork::Ltc,
        ChainNetwork::LtcTestnet,
        ChainNetwork::LtcRegtest,
    ];

    pub fn params(self) -> NetworkParams {
        match self {
            ChainNetwork::Bitcoin => NetworkParams {
                p2pkh_version: 0x00,
                p2sh_version: 0x05,
                bech32_hrp: "bc",
                default_rpc_port: 8332,
            },
            ChainNetwork::Testnet => NetworkParams {
                p2pkh_version: 0x6f,
                p2sh_version: 0xc4,
                bech32_hrp: "tb",
                default_rpc_port: 18332,
            },
            ChainNetwork::Regtest => NetworkParams {
                p2pkh_version: 0x6f,
                p2sh_version: 0xc4,
                bech32_hrp: "bcrt",
                default_rpc_port: 18443,
            },
            ChainNetwork::Ltc => NetworkParams {
                p2pkh_version: 0x30,
                p2sh_version: 0x32,
                bech32_hrp: "ltc",
                default_rpc_port: 9332,
            },
            ChainNetwork::LtcTestnet => NetworkParams {
                p2pkh_version: 0x6f,
                p2sh_version: 0x3a,
                bech32_hrp: "tltc",
                default_rpc_port: 19332,
            },
            ChainNetwork::LtcRegtest => NetworkParams {
                p2pkh_version: 0x6f,
                p2sh_version: 0x3a,
                bech32_hrp: "rltc",
                default_rpc_port: 19443,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChainNetwork::Bitcoin => "bitcoin",
            ChainNetwork::Testnet => "testnet",
            ChainNetwork::Regtest => "regtest",
            ChainNetwork::Ltc => "ltc",
            ChainNetwork::LtcTestnet => "ltctestnet",
            ChainNetwork::LtcRegtest => "ltcregtest",
        }
    }

    /// Regtest chains accept block generation commands.
    pub fn is_regtest(self) -> bool {
        matches!(self, ChainNetwork::Regtest | ChainNetwork::LtcRegtest)
    }
}

impl fmt::Display for ChainNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainNetwork {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainNetwork::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| Error::UnknownNetwork(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_identifiers_round_trip() {
        for network in ChainNetwork::ALL {
            assert_eq!(network.as_str().parse::<ChainNetwork>().unwrap(), network);
        }
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        let err = "dogecoin".parse::<ChainNetwork>().unwrap_err();
        assert!(matches!(err, Error::UnknownNetwork(n) if n == "dogecoin"));
    }

    #[test]
    fn regtest_shares_testnet_versions_but_not_hrp() {
        let testnet = ChainNetwork::Testnet.params();
        let regtest = ChainNetwork::Regtest.params();
        assert_eq!(testnet.p2sh_version, regtest.p2sh_version);
        assert_ne!(testnet.bech32_hrp, regtest.bech32_hrp);
    }
}
