use thiserror::Error;

use crate::script_class::ScriptClass;

/// Transaction construction, signing, and collaborator errors.
#[derive(Debug, Error)]
pub enum BtcError {
    #[error("insufficient funds: have {available} sat, need at least {required} sat")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("output {index} is dust: {value} sat is below the {threshold} sat threshold")]
    DustOutput {
        index: usize,
        value: u64,
        threshold: u64,
    },

    #[error("invalid script: {0}")]
    InvalidScript(String),

    #[error("input {index} has unsupported script class {class}")]
    UnsupportedScriptClass { index: usize, class: ScriptClass },

    #[error("signing failed for input {index}: {reason}")]
    SigningFailure { index: usize, reason: String },

    #[error("finalization failed for input {index}: {reason}")]
    FinalizationFailure { index: usize, reason: String },

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),

    #[error("psbt error: {0}")]
    Psbt(String),

    #[error("utxo repository error: {0}")]
    Repository(String),

    #[error("fee oracle error: {0}")]
    FeeOracle(String),

    #[error("broadcast error: {0}")]
    Broadcast(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let err = BtcError::InsufficientFunds {
            available: 5_000,
            required: 11_100,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: have 5000 sat, need at least 11100 sat"
        );
    }

    #[test]
    fn display_dust_output() {
        let err = BtcError::DustOutput {
            index: 1,
            value: 100,
            threshold: 294,
        };
        assert_eq!(
            err.to_string(),
            "output 1 is dust: 100 sat is below the 294 sat threshold"
        );
    }

    #[test]
    fn display_unsupported_script_class() {
        let err = BtcError::UnsupportedScriptClass {
            index: 2,
            class: ScriptClass::LegacyPubKeyHash,
        };
        assert_eq!(
            err.to_string(),
            "input 2 has unsupported script class legacy-p2pkh"
        );
    }

    #[test]
    fn display_signing_failure() {
        let err = BtcError::SigningFailure {
            index: 0,
            reason: "sighash failed".into(),
        };
        assert_eq!(err.to_string(), "signing failed for input 0: sighash failed");
    }

    #[test]
    fn display_finalization_failure() {
        let err = BtcError::FinalizationFailure {
            index: 3,
            reason: "missing signature".into(),
        };
        assert_eq!(
            err.to_string(),
            "finalization failed for input 3: missing signature"
        );
    }

    #[test]
    fn display_invalid_network() {
        let err = BtcError::InvalidNetwork("simnet".into());
        assert_eq!(err.to_string(), "invalid network: simnet");
    }

    #[test]
    fn error_trait_is_implemented() {
        let err: Box<dyn std::error::Error> = Box::new(BtcError::InvalidScript("empty".into()));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn debug_format_works() {
        let err = BtcError::Broadcast("rejected".into());
        let debug = format!("{:?}", err);
        assert!(debug.contains("Broadcast"));
    }
}
