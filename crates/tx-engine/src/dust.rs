use bitcoin::{Amount, Script, TxOut};

use crate::error::BtcError;
use crate::network::NetworkParams;
use crate::script_class::ScriptClass;

/// Relay fee multiple an output must be worth to not count as dust.
pub const DUST_RELAY_MULTIPLIER: u64 = 3;

/// Outpoint, empty scriptSig length and sequence of any input.
const INPUT_BASE_SIZE: u64 = 32 + 4 + 1 + 4;

/// Signature and public key pushes of a pubkey-hash spend.
const PUBKEY_HASH_SPEND_SIZE: u64 = 107;

/// Scripts above this size can never be spent.
const MAX_SCRIPT_SIZE: usize = 10_000;

/// Decides whether outputs are too small to be economical to spend.
#[derive(Debug, Clone, Copy)]
pub struct DustPolicy {
    params: NetworkParams,
}

impl DustPolicy {
    pub fn new(params: NetworkParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Smallest value an output paying to `script` may carry.
    ///
    /// Derived from the size of the output plus the size of the input that
    /// will later spend it, priced at three times the minimum relay fee.
    pub fn threshold(&self, script: &Script) -> Amount {
        let output_size = bitcoin::consensus::serialize(&TxOut {
            value: Amount::ZERO,
            script_pubkey: script.to_owned(),
        })
        .len() as u64;
        let total = output_size + spend_size(script);
        self.params
            .min_relay_fee
            .fee_vb(total * DUST_RELAY_MULTIPLIER)
            .unwrap_or(Amount::MAX)
    }

    pub fn is_dust(&self, output: &TxOut) -> bool {
        if self.params.relay_non_standard || is_unspendable(&output.script_pubkey) {
            return false;
        }
        output.value < self.threshold(&output.script_pubkey)
    }

    /// Reject the first output that is dust.
    pub fn check_outputs(&self, outputs: &[TxOut]) -> Result<(), BtcError> {
        match outputs.iter().position(|output| self.is_dust(output)) {
            Some(index) => {
                let output = &outputs[index];
                Err(BtcError::DustOutput {
                    index,
                    value: output.value.to_sat(),
                    threshold: self.threshold(&output.script_pubkey).to_sat(),
                })
            }
            None => Ok(()),
        }
    }
}

/// Size in vbytes of the input that will spend an output locked by `script`.
fn spend_size(script: &Script) -> u64 {
    let witness_spend = match ScriptClass::classify(script) {
        ScriptClass::TaprootKeySpend | ScriptClass::SegwitV0PubKeyHash => true,
        ScriptClass::NestedSegwit | ScriptClass::LegacyPubKeyHash => false,
        ScriptClass::Other => script.is_witness_program(),
    };
    if witness_spend {
        INPUT_BASE_SIZE + PUBKEY_HASH_SPEND_SIZE / 4
    } else {
        INPUT_BASE_SIZE + PUBKEY_HASH_SPEND_SIZE
    }
}

/// Data carrier or oversized scripts that no input can ever spend.
pub fn is_unspendable(script: &Script) -> bool {
    script.is_op_return() || script.len() > MAX_SCRIPT_SIZE
}
