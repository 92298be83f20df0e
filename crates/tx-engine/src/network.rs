use std::str::FromStr;

use bitcoin::{FeeRate, Network};
use serde::{Deserialize, Serialize};

use crate::error::BtcError;

/// Minimum relay fee used by the dust policy when none is configured (sat/vB).
pub const DEFAULT_MIN_RELAY_FEE_SAT_VB: u32 = 1;

/// Supported Bitcoin networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork {
    #[default]
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl BtcNetwork {
    /// Convert to the `bitcoin` crate's `Network` type.
    pub fn to_bitcoin_network(self) -> Network {
        match self {
            BtcNetwork::Mainnet => Network::Bitcoin,
            BtcNetwork::Testnet => Network::Testnet,
            BtcNetwork::Signet => Network::Signet,
            BtcNetwork::Regtest => Network::Regtest,
        }
    }

    /// Whether nodes on this network relay non-standard transactions by default.
    ///
    /// When set, the dust policy accepts any output value.
    pub fn relay_non_standard(self) -> bool {
        match self {
            BtcNetwork::Mainnet | BtcNetwork::Signet => false,
            BtcNetwork::Testnet | BtcNetwork::Regtest => true,
        }
    }
}

impl FromStr for BtcNetwork {
    type Err = BtcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(BtcNetwork::Mainnet),
            "testnet" | "testnet3" => Ok(BtcNetwork::Testnet),
            "signet" => Ok(BtcNetwork::Signet),
            "regtest" => Ok(BtcNetwork::Regtest),
            other => Err(BtcError::InvalidNetwork(format!("unknown network {other:?}"))),
        }
    }
}

impl std::fmt::Display for BtcNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BtcNetwork::Mainnet => write!(f, "mainnet"),
            BtcNetwork::Testnet => write!(f, "testnet"),
            BtcNetwork::Signet => write!(f, "signet"),
            BtcNetwork::Regtest => write!(f, "regtest"),
        }
    }
}

/// Policy parameters of the active network, consulted by the dust policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkParams {
    pub network: BtcNetwork,
    /// Minimum relay fee the dust threshold is derived from.
    pub min_relay_fee: FeeRate,
    /// Accept non-standard (including dust) outputs.
    pub relay_non_standard: bool,
}

impl NetworkParams {
    /// Parameters with the network's default relay policy.
    pub fn new(network: BtcNetwork) -> Self {
        Self {
            network,
            min_relay_fee: FeeRate::from_sat_per_vb_u32(DEFAULT_MIN_RELAY_FEE_SAT_VB),
            relay_non_standard: network.relay_non_standard(),
        }
    }

    pub fn with_min_relay_fee(mut self, fee_rate: FeeRate) -> Self {
        self.min_relay_fee = fee_rate;
        self
    }

    pub fn with_relay_non_standard(mut self, allow: bool) -> Self {
        self.relay_non_standard = allow;
        self
    }
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self::new(BtcNetwork::Mainnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_converts_to_bitcoin_network() {
        assert_eq!(BtcNetwork::Mainnet.to_bitcoin_network(), Network::Bitcoin);
    }

    #[test]
    fn regtest_converts_to_bitcoin_network() {
        assert_eq!(BtcNetwork::Regtest.to_bitcoin_network(), Network::Regtest);
    }

    #[test]
    fn parse_known_names() {
        assert_eq!("mainnet".parse::<BtcNetwork>().unwrap(), BtcNetwork::Mainnet);
        assert_eq!("Bitcoin".parse::<BtcNetwork>().unwrap(), BtcNetwork::Mainnet);
        assert_eq!("testnet3".parse::<BtcNetwork>().unwrap(), BtcNetwork::Testnet);
        assert_eq!("signet".parse::<BtcNetwork>().unwrap(), BtcNetwork::Signet);
        assert_eq!("REGTEST".parse::<BtcNetwork>().unwrap(), BtcNetwork::Regtest);
    }

    #[test]
    fn unknown_network_is_recoverable_error() {
        let err = "simnet".parse::<BtcNetwork>().unwrap_err();
        assert!(matches!(err, BtcError::InvalidNetwork(_)));
        assert!(err.to_string().contains("simnet"));
    }

    #[test]
    fn display_names() {
        assert_eq!(BtcNetwork::Mainnet.to_string(), "mainnet");
        assert_eq!(BtcNetwork::Testnet.to_string(), "testnet");
        assert_eq!(BtcNetwork::Signet.to_string(), "signet");
        assert_eq!(BtcNetwork::Regtest.to_string(), "regtest");
    }

    #[test]
    fn relay_policy_defaults() {
        assert!(!NetworkParams::new(BtcNetwork::Mainnet).relay_non_standard);
        assert!(!NetworkParams::new(BtcNetwork::Signet).relay_non_standard);
        assert!(NetworkParams::new(BtcNetwork::Testnet).relay_non_standard);
        assert!(NetworkParams::new(BtcNetwork::Regtest).relay_non_standard);
    }

    #[test]
    fn builder_overrides() {
        let params = NetworkParams::new(BtcNetwork::Regtest)
            .with_relay_non_standard(false)
            .with_min_relay_fee(FeeRate::from_sat_per_vb_u32(3));
        assert!(!params.relay_non_standard);
        assert_eq!(params.min_relay_fee.to_sat_per_vb_floor(), 3);
    }
}
