//! Virtual-size estimation for transactions that are not yet signed.
//!
//! Inputs without signature data get placeholder witness and scriptSig
//! bytes sized to what the final spend of their script class will carry.
//! Inputs that are already signed keep their real data, so a fully signed
//! transaction yields its exact vsize.

use bitcoin::{Amount, FeeRate, ScriptBuf, Transaction, TxOut, Witness};

use crate::error::BtcError;
use crate::script_class::ScriptClass;

/// Schnorr signature with the default sighash type.
pub const TAPROOT_SIGNATURE_SIZE: usize = 64;

/// Upper bound of a DER encoded ECDSA signature plus sighash byte.
pub const ECDSA_SIGNATURE_SIZE: usize = 72;

pub const COMPRESSED_PUBKEY_SIZE: usize = 33;

/// Push of a 22-byte P2WPKH redeem script.
pub const NESTED_SEGWIT_SCRIPT_SIG_SIZE: usize = 23;

/// Signature push plus compressed public key push of a P2PKH spend.
pub const LEGACY_SCRIPT_SIG_SIZE: usize = 107;

/// Witness stack a spend of `class` is expected to carry.
pub fn placeholder_witness(class: ScriptClass) -> Witness {
    match class {
        ScriptClass::TaprootKeySpend => Witness::from_slice(&[vec![0u8; TAPROOT_SIGNATURE_SIZE]]),
        ScriptClass::SegwitV0PubKeyHash | ScriptClass::NestedSegwit => Witness::from_slice(&[
            vec![0u8; ECDSA_SIGNATURE_SIZE],
            vec![0u8; COMPRESSED_PUBKEY_SIZE],
        ]),
        ScriptClass::LegacyPubKeyHash | ScriptClass::Other => Witness::new(),
    }
}

/// scriptSig a spend of `class` is expected to carry.
pub fn placeholder_script_sig(class: ScriptClass) -> ScriptBuf {
    match class {
        ScriptClass::NestedSegwit => {
            ScriptBuf::from_bytes(vec![0u8; NESTED_SEGWIT_SCRIPT_SIG_SIZE])
        }
        ScriptClass::LegacyPubKeyHash => ScriptBuf::from_bytes(vec![0u8; LEGACY_SCRIPT_SIG_SIZE]),
        ScriptClass::TaprootKeySpend | ScriptClass::SegwitV0PubKeyHash | ScriptClass::Other => {
            ScriptBuf::new()
        }
    }
}

fn is_signed(input: &bitcoin::TxIn) -> bool {
    !input.witness.is_empty() || !input.script_sig.is_empty()
}

/// Estimate the vsize `tx` will have once every input is signed.
///
/// `prevouts[i]` is the output spent by input `i`. The caller's transaction
/// is never modified; placeholders are written to a disposable copy.
pub fn estimate_vsize(tx: &Transaction, prevouts: &[TxOut]) -> Result<usize, BtcError> {
    if prevouts.len() != tx.input.len() {
        return Err(BtcError::TransactionBuildError(format!(
            "{} prevouts supplied for {} inputs",
            prevouts.len(),
            tx.input.len()
        )));
    }

    let mut sized = tx.clone();
    for (input, prevout) in sized.input.iter_mut().zip(prevouts) {
        if is_signed(input) {
            continue;
        }
        let class = ScriptClass::classify(&prevout.script_pubkey);
        input.witness = placeholder_witness(class);
        input.script_sig = placeholder_script_sig(class);
    }

    Ok(sized.vsize())
}

/// Exact vsize of a transaction whose inputs all carry their final data.
pub fn signed_vsize(tx: &Transaction) -> Result<usize, BtcError> {
    if let Some(index) = tx.input.iter().position(|input| !is_signed(input)) {
        return Err(BtcError::TransactionBuildError(format!(
            "input {index} has no signature data"
        )));
    }
    Ok(tx.vsize())
}

/// Fee owed for `vsize` virtual bytes at `fee_rate`.
pub fn fee_for_vsize(vsize: usize, fee_rate: FeeRate) -> Result<Amount, BtcError> {
    fee_rate.fee_vb(vsize as u64).ok_or_else(|| {
        BtcError::TransactionBuildError(format!(
            "fee overflow for {vsize} vbytes at {} sat/kwu",
            fee_rate.to_sat_per_kwu()
        ))
    })
}

/// Estimated fee of `tx` once signed.
pub fn estimate_fee(
    tx: &Transaction,
    prevouts: &[TxOut],
    fee_rate: FeeRate,
) -> Result<Amount, BtcError> {
    fee_for_vsize(estimate_vsize(tx, prevouts)?, fee_rate)
}
