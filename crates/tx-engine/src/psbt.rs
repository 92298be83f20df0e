//! Partially signed transactions (BIP-174).
//!
//! A [`PartialTransaction`] moves from unsigned, through partially signed,
//! to finalized. Signing never leaves it half-modified: every signing call
//! works on a copy and only replaces the stored PSBT once all requested
//! inputs are signed. On a [`BtcError::SigningFailure`] the structure is
//! exactly as it was before the call.

use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::key::{TapTweak, TweakedPublicKey};
use bitcoin::psbt::{Input, Psbt, PsbtSighashType};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{All, Keypair, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot;
use bitcoin::{
    CompressedPublicKey, OutPoint, ScriptBuf, TapSighash, Transaction, TxOut, Witness,
};
use zeroize::Zeroizing;

use crate::error::BtcError;
use crate::script_class::ScriptClass;
use crate::transaction::UnsignedBtcTx;

/// Where a partial transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsbtState {
    /// No input carries a signature.
    Unsigned,
    /// Some inputs are signed or finalized, but not all are finalized.
    PartiallySigned,
    /// Every input has its final scriptSig/witness.
    Finalized,
}

/// An unsigned transaction plus the per-input data needed to sign it.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialTransaction {
    psbt: Psbt,
    prevouts: Vec<TxOut>,
}

impl PartialTransaction {
    /// Wrap an assembled transaction.
    ///
    /// Segwit and taproot inputs get `witness_utxo`. Legacy inputs need
    /// the full previous transaction, see
    /// [`PartialTransaction::attach_previous_transaction`].
    pub fn from_unsigned(unsigned: &UnsignedBtcTx) -> Result<Self, BtcError> {
        Self::new(unsigned.tx.clone(), unsigned.prevouts.clone())
    }

    pub fn new(tx: Transaction, prevouts: Vec<TxOut>) -> Result<Self, BtcError> {
        if prevouts.len() != tx.input.len() {
            return Err(BtcError::Psbt(format!(
                "{} prevouts supplied for {} inputs",
                prevouts.len(),
                tx.input.len()
            )));
        }
        let mut psbt = Psbt::from_unsigned_tx(tx)
            .map_err(|e| BtcError::Psbt(format!("failed to create psbt: {e}")))?;

        for (input, prevout) in psbt.inputs.iter_mut().zip(&prevouts) {
            let class = ScriptClass::classify(&prevout.script_pubkey);
            if class.is_segwit() {
                input.witness_utxo = Some(prevout.clone());
            }
            input.sighash_type = match class {
                ScriptClass::TaprootKeySpend => {
                    Some(PsbtSighashType::from(TapSighashType::Default))
                }
                ScriptClass::SegwitV0PubKeyHash
                | ScriptClass::NestedSegwit
                | ScriptClass::LegacyPubKeyHash => {
                    Some(PsbtSighashType::from(EcdsaSighashType::All))
                }
                ScriptClass::Other => None,
            };
        }

        Ok(Self { psbt, prevouts })
    }

    /// Parse a serialized PSBT. Every input must carry its spent output.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, BtcError> {
        let psbt = Psbt::deserialize(bytes)
            .map_err(|e| BtcError::Psbt(format!("failed to parse psbt: {e}")))?;
        let prevouts = psbt
            .inputs
            .iter()
            .zip(&psbt.unsigned_tx.input)
            .enumerate()
            .map(|(index, (input, txin))| spent_output(input, index, txin.previous_output))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { psbt, prevouts })
    }

    /// BIP-174 binary encoding.
    pub fn serialize(&self) -> Vec<u8> {
        self.psbt.serialize()
    }

    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    pub fn unsigned_tx(&self) -> &Transaction {
        &self.psbt.unsigned_tx
    }

    pub fn prevouts(&self) -> &[TxOut] {
        &self.prevouts
    }

    pub fn prevout(&self, index: usize) -> Result<&TxOut, BtcError> {
        self.prevouts
            .get(index)
            .ok_or_else(|| BtcError::Psbt(format!("input {index} out of range")))
    }

    pub fn script_class(&self, index: usize) -> Result<ScriptClass, BtcError> {
        Ok(ScriptClass::classify(&self.prevout(index)?.script_pubkey))
    }

    /// Attach the full transaction that created the output spent by input `index`.
    pub fn attach_previous_transaction(
        &mut self,
        index: usize,
        prev_tx: Transaction,
    ) -> Result<(), BtcError> {
        let outpoint = self
            .psbt
            .unsigned_tx
            .input
            .get(index)
            .ok_or_else(|| BtcError::Psbt(format!("input {index} out of range")))?
            .previous_output;
        if prev_tx.compute_txid() != outpoint.txid {
            return Err(BtcError::Psbt(format!(
                "previous transaction {} does not match input {index} ({})",
                prev_tx.compute_txid(),
                outpoint.txid
            )));
        }
        let spent = prev_tx
            .output
            .get(outpoint.vout as usize)
            .ok_or_else(|| {
                BtcError::Psbt(format!(
                    "previous transaction has no output {}",
                    outpoint.vout
                ))
            })?;
        if spent != &self.prevouts[index] {
            return Err(BtcError::Psbt(format!(
                "previous transaction output {} differs from the recorded prevout",
                outpoint.vout
            )));
        }
        self.psbt.inputs[index].non_witness_utxo = Some(prev_tx);
        Ok(())
    }

    pub fn state(&self) -> PsbtState {
        let finalized = self.psbt.inputs.iter().filter(|input| is_finalized(input)).count();
        if finalized == self.psbt.inputs.len() && finalized > 0 {
            PsbtState::Finalized
        } else if finalized > 0 || self.psbt.inputs.iter().any(has_signature) {
            PsbtState::PartiallySigned
        } else {
            PsbtState::Unsigned
        }
    }

    /// BIP-341 key-spend sighash of input `index`, committing to every prevout.
    pub fn taproot_sighash(&self, index: usize) -> Result<TapSighash, BtcError> {
        let sighash_type = self.tap_sighash_type(index)?;
        SighashCache::new(&self.psbt.unsigned_tx)
            .taproot_key_spend_signature_hash(index, &Prevouts::All(&self.prevouts), sighash_type)
            .map_err(|e| signing_failure(index, format!("taproot sighash failed: {e}")))
    }

    /// Sign the inputs at `indices` with one private key.
    ///
    /// The signing strategy follows each input's script class. Either every
    /// requested input is signed or the partial transaction is left untouched.
    pub fn sign(&mut self, indices: &[usize], private_key: &[u8; 32]) -> Result<(), BtcError> {
        let key_bytes = Zeroizing::new(*private_key);
        let mut secret_key = SecretKey::from_slice(&key_bytes[..])
            .map_err(|e| BtcError::InvalidPrivateKey(format!("invalid secret key: {e}")))?;

        let secp = Secp256k1::new();
        let mut working = self.clone();
        let result = indices
            .iter()
            .try_for_each(|&index| working.sign_input(&secp, index, &secret_key));
        secret_key.non_secure_erase();
        result?;

        *self = working;
        tracing::debug!(inputs = indices.len(), "signed inputs");
        Ok(())
    }

    /// Sign every input with one private key.
    pub fn sign_all(&mut self, private_key: &[u8; 32]) -> Result<(), BtcError> {
        let indices: Vec<usize> = (0..self.psbt.inputs.len()).collect();
        self.sign(&indices, private_key)
    }

    fn sign_input(
        &mut self,
        secp: &Secp256k1<All>,
        index: usize,
        secret_key: &SecretKey,
    ) -> Result<(), BtcError> {
        if index >= self.psbt.inputs.len() {
            return Err(signing_failure(index, "input out of range"));
        }
        match self.script_class(index)? {
            ScriptClass::TaprootKeySpend => self.sign_taproot_input(secp, index, secret_key),
            ScriptClass::SegwitV0PubKeyHash => {
                self.sign_p2wpkh_input(secp, index, secret_key, false)
            }
            ScriptClass::NestedSegwit => self.sign_p2wpkh_input(secp, index, secret_key, true),
            ScriptClass::LegacyPubKeyHash => self.sign_p2pkh_input(secp, index, secret_key),
            class @ ScriptClass::Other => Err(BtcError::UnsupportedScriptClass { index, class }),
        }
    }

    fn sign_taproot_input(
        &mut self,
        secp: &Secp256k1<All>,
        index: usize,
        secret_key: &SecretKey,
    ) -> Result<(), BtcError> {
        let keypair = Keypair::from_secret_key(secp, secret_key);
        // BIP-86: key-path spends commit to an empty script tree.
        let tweaked = keypair.tap_tweak(secp, None).to_keypair();
        let (output_key, _parity) = tweaked.x_only_public_key();
        let expected =
            ScriptBuf::new_p2tr_tweaked(TweakedPublicKey::dangerous_assume_tweaked(output_key));
        if self.prevouts[index].script_pubkey != expected {
            return Err(signing_failure(index, "key does not match taproot output"));
        }

        let sighash_type = self.tap_sighash_type(index)?;
        let sighash = self.taproot_sighash(index)?;
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_schnorr_no_aux_rand(&msg, &tweaked);

        self.psbt.inputs[index].tap_key_sig = Some(taproot::Signature {
            signature,
            sighash_type,
        });
        tracing::debug!(index, "taproot key-spend signature added");
        Ok(())
    }

    fn sign_p2wpkh_input(
        &mut self,
        secp: &Secp256k1<All>,
        index: usize,
        secret_key: &SecretKey,
        nested: bool,
    ) -> Result<(), BtcError> {
        let public_key = PublicKey::from_secret_key(secp, secret_key);
        let witness_program =
            ScriptBuf::new_p2wpkh(&CompressedPublicKey(public_key).wpubkey_hash());
        let prevout = &self.prevouts[index];
        let expected = if nested {
            ScriptBuf::new_p2sh(&witness_program.script_hash())
        } else {
            witness_program.clone()
        };
        if prevout.script_pubkey != expected {
            return Err(signing_failure(index, "key does not match p2wpkh output"));
        }

        let sighash_type = self.ecdsa_sighash_type(index)?;
        let sighash = SighashCache::new(&self.psbt.unsigned_tx)
            .p2wpkh_signature_hash(index, &witness_program, prevout.value, sighash_type)
            .map_err(|e| signing_failure(index, format!("sighash computation failed: {e}")))?;
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_ecdsa_low_r(&msg, secret_key);

        let input = &mut self.psbt.inputs[index];
        if nested {
            input.redeem_script = Some(witness_program);
        }
        input.partial_sigs.insert(
            bitcoin::PublicKey::new(public_key),
            ecdsa::Signature {
                signature,
                sighash_type,
            },
        );
        tracing::debug!(index, nested, "p2wpkh signature added");
        Ok(())
    }

    fn sign_p2pkh_input(
        &mut self,
        secp: &Secp256k1<All>,
        index: usize,
        secret_key: &SecretKey,
    ) -> Result<(), BtcError> {
        if self.psbt.inputs[index].non_witness_utxo.is_none() {
            return Err(signing_failure(index, "legacy input requires non_witness_utxo"));
        }
        let public_key = bitcoin::PublicKey::new(PublicKey::from_secret_key(secp, secret_key));
        let prevout = &self.prevouts[index];
        if prevout.script_pubkey != ScriptBuf::new_p2pkh(&public_key.pubkey_hash()) {
            return Err(signing_failure(index, "key does not match p2pkh output"));
        }

        let sighash_type = self.ecdsa_sighash_type(index)?;
        let sighash = SighashCache::new(&self.psbt.unsigned_tx)
            .legacy_signature_hash(index, &prevout.script_pubkey, sighash_type.to_u32())
            .map_err(|e| signing_failure(index, format!("sighash computation failed: {e}")))?;
        let msg = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_ecdsa_low_r(&msg, secret_key);

        self.psbt.inputs[index].partial_sigs.insert(
            public_key,
            ecdsa::Signature {
                signature,
                sighash_type,
            },
        );
        tracing::debug!(index, "p2pkh signature added");
        Ok(())
    }

    fn tap_sighash_type(&self, index: usize) -> Result<TapSighashType, BtcError> {
        match self.psbt.inputs.get(index).and_then(|input| input.sighash_type) {
            Some(sighash_type) => sighash_type
                .taproot_hash_ty()
                .map_err(|e| signing_failure(index, format!("invalid taproot sighash type: {e}"))),
            None => Ok(TapSighashType::Default),
        }
    }

    fn ecdsa_sighash_type(&self, index: usize) -> Result<EcdsaSighashType, BtcError> {
        match self.psbt.inputs.get(index).and_then(|input| input.sighash_type) {
            Some(sighash_type) => sighash_type
                .ecdsa_hash_ty()
                .map_err(|e| signing_failure(index, format!("invalid ecdsa sighash type: {e}"))),
            None => Ok(EcdsaSighashType::All),
        }
    }

    /// Move the signature of input `index` into its final scriptSig/witness
    /// and clear the signing metadata.
    pub fn finalize_input(&mut self, index: usize) -> Result<(), BtcError> {
        let class = self.script_class(index)?;
        let input = &mut self.psbt.inputs[index];
        if is_finalized(input) {
            return Ok(());
        }

        match class {
            ScriptClass::TaprootKeySpend => {
                let signature = input
                    .tap_key_sig
                    .ok_or_else(|| finalization_failure(index, "missing taproot signature"))?;
                input.final_script_witness = Some(Witness::from_slice(&[signature.to_vec()]));
            }
            ScriptClass::SegwitV0PubKeyHash | ScriptClass::NestedSegwit => {
                let (public_key, signature) = single_partial_sig(input, index)?;
                if class == ScriptClass::NestedSegwit {
                    let redeem_script = input
                        .redeem_script
                        .as_ref()
                        .ok_or_else(|| finalization_failure(index, "missing redeem script"))?;
                    let push = PushBytesBuf::try_from(redeem_script.to_bytes())
                        .map_err(|e| {
                            finalization_failure(index, format!("redeem script too large: {e}"))
                        })?;
                    input.final_script_sig = Some(Builder::new().push_slice(push).into_script());
                }
                let mut witness = Witness::new();
                witness.push(signature.to_vec());
                witness.push(public_key.to_bytes());
                input.final_script_witness = Some(witness);
            }
            ScriptClass::LegacyPubKeyHash => {
                let (public_key, signature) = single_partial_sig(input, index)?;
                let push = PushBytesBuf::try_from(signature.to_vec())
                    .map_err(|e| finalization_failure(index, format!("signature too large: {e}")))?;
                input.final_script_sig = Some(
                    Builder::new()
                        .push_slice(push)
                        .push_key(&public_key)
                        .into_script(),
                );
            }
            class @ ScriptClass::Other => {
                return Err(BtcError::UnsupportedScriptClass { index, class });
            }
        }

        input.partial_sigs.clear();
        input.sighash_type = None;
        input.redeem_script = None;
        input.witness_script = None;
        input.bip32_derivation.clear();
        input.tap_key_sig = None;
        input.tap_internal_key = None;
        input.tap_key_origins.clear();
        Ok(())
    }

    /// Finalize every input, stopping at the first one that lacks a signature.
    pub fn finalize(&mut self) -> Result<(), BtcError> {
        (0..self.psbt.inputs.len()).try_for_each(|index| self.finalize_input(index))
    }

    /// Extract the fully signed transaction.
    pub fn extract(self) -> Result<Transaction, BtcError> {
        if let Some(index) = self.psbt.inputs.iter().position(|input| !is_finalized(input)) {
            return Err(finalization_failure(index, "input is not finalized"));
        }
        self.psbt
            .extract_tx()
            .map_err(|e| BtcError::Psbt(format!("failed to extract transaction: {e}")))
    }
}

/// Output spent by input `index`, taken from `witness_utxo` or else from
/// `non_witness_utxo`. An attached previous transaction must be the one
/// `outpoint` refers to.
fn spent_output(input: &Input, index: usize, outpoint: OutPoint) -> Result<TxOut, BtcError> {
    if let Some(prev_tx) = &input.non_witness_utxo {
        let txid = prev_tx.compute_txid();
        if txid != outpoint.txid {
            return Err(BtcError::Psbt(format!(
                "input {index} non_witness_utxo {txid} does not match spent txid {}",
                outpoint.txid
            )));
        }
    }
    if let Some(witness_utxo) = &input.witness_utxo {
        return Ok(witness_utxo.clone());
    }
    match &input.non_witness_utxo {
        Some(prev_tx) => prev_tx.output.get(outpoint.vout as usize).cloned().ok_or_else(|| {
            BtcError::Psbt(format!(
                "input {index} non_witness_utxo has no output {}",
                outpoint.vout
            ))
        }),
        None => Err(BtcError::Psbt(format!(
            "input {index} has neither witness_utxo nor non_witness_utxo"
        ))),
    }
}

fn is_finalized(input: &Input) -> bool {
    input.final_script_witness.is_some() || input.final_script_sig.is_some()
}

fn has_signature(input: &Input) -> bool {
    input.tap_key_sig.is_some() || !input.partial_sigs.is_empty()
}

fn single_partial_sig(
    input: &Input,
    index: usize,
) -> Result<(bitcoin::PublicKey, ecdsa::Signature), BtcError> {
    let mut sigs = input.partial_sigs.iter();
    match (sigs.next(), sigs.next()) {
        (Some((public_key, signature)), None) => Ok((*public_key, *signature)),
        (None, _) => Err(finalization_failure(index, "missing signature")),
        (Some(_), Some(_)) => Err(finalization_failure(index, "more than one signature")),
    }
}

fn signing_failure(index: usize, reason: impl Into<String>) -> BtcError {
    BtcError::SigningFailure {
        index,
        reason: reason.into(),
    }
}

fn finalization_failure(index: usize, reason: impl Into<String>) -> BtcError {
    BtcError::FinalizationFailure {
        index,
        reason: reason.into(),
    }
}
