//! Engine configuration.
//!
//! All types derive Serde traits so an embedding application can keep the
//! engine settings next to its own configuration.

use bitcoin::FeeRate;
use serde::{Deserialize, Serialize};

use crate::error::BtcError;
use crate::network::{BtcNetwork, NetworkParams, DEFAULT_MIN_RELAY_FEE_SAT_VB};

/// Root configuration for the transaction engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Network the engine builds transactions for.
    pub network: BtcNetwork,

    /// Minimum relay fee (sat/vB) used to derive dust thresholds.
    pub min_relay_fee_sat_vb: u64,

    /// Override the network's default non-standard relay policy.
    pub relay_non_standard: Option<bool>,

    /// Signal replace-by-fee on every input.
    pub enable_rbf: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: BtcNetwork::Mainnet,
            min_relay_fee_sat_vb: u64::from(DEFAULT_MIN_RELAY_FEE_SAT_VB),
            relay_non_standard: None,
            enable_rbf: true,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, BtcError> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| BtcError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BtcError> {
        if self.min_relay_fee_sat_vb == 0 {
            return Err(BtcError::InvalidConfig(
                "min_relay_fee_sat_vb must be greater than zero".into(),
            ));
        }
        FeeRate::from_sat_per_vb(self.min_relay_fee_sat_vb).ok_or_else(|| {
            BtcError::InvalidConfig(format!(
                "min_relay_fee_sat_vb {} overflows",
                self.min_relay_fee_sat_vb
            ))
        })?;
        Ok(())
    }

    /// Resolve the relay policy the dust checks run against.
    pub fn network_params(&self) -> Result<NetworkParams, BtcError> {
        self.validate()?;
        let min_relay_fee = FeeRate::from_sat_per_vb(self.min_relay_fee_sat_vb).ok_or_else(|| {
            BtcError::InvalidConfig("min_relay_fee_sat_vb overflows".into())
        })?;
        let params = NetworkParams::new(self.network).with_min_relay_fee(min_relay_fee);
        Ok(match self.relay_non_standard {
            Some(allow) => params.with_relay_non_standard(allow),
            None => params,
        })
    }
}
