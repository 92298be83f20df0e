//! Collaborators outside the engine and the payment pipeline that drives them.
//!
//! The engine never retries. A failure from any collaborator ends the
//! attempt, and nothing is broadcast unless every input was signed and
//! finalized.
//!
//! Two payments drawing from overlapping UTXO pools can both build and
//! sign successfully and then double-spend at broadcast. Callers must
//! serialize payments per funding address or reconcile in the repository.

use bitcoin::{Amount, FeeRate, Transaction, Txid};

use crate::error::BtcError;
use crate::psbt::PartialTransaction;
use crate::script_class::ScriptClass;
use crate::transaction::TxAssembler;
use crate::utxo::{parse_address, RequiredOutput, Utxo, UtxoSet};

/// Source of spendable outputs.
pub trait UtxoRepository {
    fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>, BtcError>;

    /// Full transaction with id `txid`, needed to sign legacy inputs.
    fn previous_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, BtcError> {
        let _ = txid;
        Ok(None)
    }
}

pub trait FeeOracle {
    fn recommended_fee_rate(&self) -> Result<FeeRate, BtcError>;
}

pub trait Broadcaster {
    /// Submit a finalized, consensus-encoded transaction.
    fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, BtcError>;
}

/// A payment that reached the network.
#[derive(Debug, Clone)]
pub struct SentPayment {
    pub txid: Txid,
    pub tx: Transaction,
    pub fee: Amount,
}

/// Wires the assembler, signer and the three collaborators together.
pub struct PaymentPipeline<R, F, B> {
    assembler: TxAssembler,
    repository: R,
    fee_oracle: F,
    broadcaster: B,
}

impl<R, F, B> PaymentPipeline<R, F, B>
where
    R: UtxoRepository,
    F: FeeOracle,
    B: Broadcaster,
{
    pub fn new(assembler: TxAssembler, repository: R, fee_oracle: F, broadcaster: B) -> Self {
        Self {
            assembler,
            repository,
            fee_oracle,
            broadcaster,
        }
    }

    /// Fund `required` from the outputs of `from_address`, sign every input
    /// with `private_key`, and broadcast. Change returns to `from_address`.
    pub fn send_payment(
        &self,
        from_address: &str,
        required: &[RequiredOutput],
        private_key: &[u8; 32],
    ) -> Result<SentPayment, BtcError> {
        let network = self.assembler.params().network;
        let change_script = parse_address(from_address, network)?.script_pubkey();

        let utxos: UtxoSet = self.repository.list_unspent(from_address)?.into();
        let fee_rate = self.fee_rate()?;
        tracing::debug!(
            utxos = utxos.len(),
            sat_per_vb = fee_rate.to_sat_per_vb_floor(),
            "funding payment"
        );

        let unsigned = self.assembler.build(required, &utxos, &change_script, fee_rate)?;
        let fee = unsigned.fee;

        let mut partial = PartialTransaction::from_unsigned(&unsigned)?;
        for (index, utxo) in unsigned.selected.iter().enumerate() {
            if utxo.script_class() != ScriptClass::LegacyPubKeyHash {
                continue;
            }
            let txid = utxo.outpoint.txid;
            match self.repository.previous_transaction(&txid)? {
                Some(prev_tx) => partial.attach_previous_transaction(index, prev_tx)?,
                None => tracing::warn!(%txid, "previous transaction unavailable for legacy input"),
            }
        }
        partial.sign_all(private_key)?;
        partial.finalize()?;
        let tx = partial.extract()?;

        let raw_tx = bitcoin::consensus::serialize(&tx);
        let txid = self.broadcaster.broadcast(&raw_tx)?;
        if txid != tx.compute_txid() {
            tracing::warn!(
                %txid,
                expected = %tx.compute_txid(),
                "broadcaster returned unexpected txid"
            );
        }
        tracing::info!(%txid, fee = fee.to_sat(), "payment broadcast");

        Ok(SentPayment { txid, tx, fee })
    }

    /// Oracle rate, raised to the relay minimum when it falls below it.
    fn fee_rate(&self) -> Result<FeeRate, BtcError> {
        let rate = self.fee_oracle.recommended_fee_rate()?;
        let floor = self.assembler.params().min_relay_fee;
        if rate < floor {
            tracing::warn!(
                oracle = rate.to_sat_per_vb_floor(),
                minimum = floor.to_sat_per_vb_floor(),
                "fee rate below relay minimum"
            );
            return Ok(floor);
        }
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{TxIn, TxOut};

    use super::*;
    use crate::address::address_for_key;
    use crate::network::{BtcNetwork, NetworkParams};

    const KEY: [u8; 32] = [0x42; 32];
    const RECIPIENT_KEY: [u8; 32] = [0x24; 32];

    #[derive(Default)]
    struct MemoryRepository {
        utxos: HashMap<String, Vec<Utxo>>,
        transactions: HashMap<Txid, Transaction>,
    }

    impl MemoryRepository {
        /// Fund `address` with one output per value, each from its own transaction.
        fn fund(&mut self, address: &str, values: &[u64]) {
            let script_pubkey = parse_address(address, BtcNetwork::Regtest)
                .unwrap()
                .script_pubkey();
            for (i, value) in values.iter().enumerate() {
                let tx = Transaction {
                    version: Version::TWO,
                    lock_time: LockTime::from_consensus(i as u32),
                    input: vec![TxIn::default()],
                    output: vec![TxOut {
                        value: Amount::from_sat(*value),
                        script_pubkey: script_pubkey.clone(),
                    }],
                };
                let txid = tx.compute_txid();
                self.utxos.entry(address.to_string()).or_default().push(Utxo {
                    outpoint: bitcoin::OutPoint::new(txid, 0),
                    value: Amount::from_sat(*value),
                    script_pubkey: script_pubkey.clone(),
                });
                self.transactions.insert(txid, tx);
            }
        }
    }

    impl UtxoRepository for MemoryRepository {
        fn list_unspent(&self, address: &str) -> Result<Vec<Utxo>, BtcError> {
            Ok(self.utxos.get(address).cloned().unwrap_or_default())
        }

        fn previous_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, BtcError> {
            Ok(self.transactions.get(txid).cloned())
        }
    }

    struct FailingRepository;

    impl UtxoRepository for FailingRepository {
        fn list_unspent(&self, _address: &str) -> Result<Vec<Utxo>, BtcError> {
            Err(BtcError::Repository("connection refused".into()))
        }
    }

    struct FixedFee(u32);

    impl FeeOracle for FixedFee {
        fn recommended_fee_rate(&self) -> Result<FeeRate, BtcError> {
            Ok(FeeRate::from_sat_per_vb_u32(self.0))
        }
    }

    #[derive(Default)]
    struct RecordingBroadcaster {
        sent: RefCell<Vec<Vec<u8>>>,
    }

    impl Broadcaster for &RecordingBroadcaster {
        fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, BtcError> {
            self.sent.borrow_mut().push(raw_tx.to_vec());
            let tx: Transaction = bitcoin::consensus::deserialize(raw_tx)
                .map_err(|e| BtcError::Broadcast(e.to_string()))?;
            Ok(tx.compute_txid())
        }
    }

    fn regtest() -> TxAssembler {
        // Regtest relays dust by default; enforce it so change handling matches mainnet.
        TxAssembler::new(NetworkParams::new(BtcNetwork::Regtest).with_relay_non_standard(false))
    }

    fn payment(value: u64) -> Vec<RequiredOutput> {
        let recipient = address_for_key(
            &RECIPIENT_KEY,
            ScriptClass::SegwitV0PubKeyHash,
            BtcNetwork::Regtest,
        )
        .unwrap();
        vec![RequiredOutput::new(Amount::from_sat(value), recipient.script_pubkey())]
    }

    #[test]
    fn send_payment_signs_and_broadcasts_each_class() {
        for class in [
            ScriptClass::TaprootKeySpend,
            ScriptClass::SegwitV0PubKeyHash,
            ScriptClass::NestedSegwit,
            ScriptClass::LegacyPubKeyHash,
        ] {
            let from = address_for_key(&KEY, class, BtcNetwork::Regtest).unwrap().to_string();
            let mut repository = MemoryRepository::default();
            repository.fund(&from, &[60_000, 40_000]);
            let broadcaster = RecordingBroadcaster::default();

            let pipeline = PaymentPipeline::new(regtest(), repository, FixedFee(2), &broadcaster);
            let sent = pipeline.send_payment(&from, &payment(80_000), &KEY).unwrap();

            assert_eq!(sent.tx.input.len(), 2, "{class}");
            assert_eq!(sent.txid, sent.tx.compute_txid());
            assert_eq!(broadcaster.sent.borrow().len(), 1);
            assert_eq!(sent.tx.output[0].value.to_sat(), 80_000);
            let outputs: Amount = sent.tx.output.iter().map(|o| o.value).sum();
            assert_eq!(Amount::from_sat(100_000) - outputs, sent.fee);
        }
    }

    #[test]
    fn repository_failure_aborts_before_broadcast() {
        let from = address_for_key(&KEY, ScriptClass::SegwitV0PubKeyHash, BtcNetwork::Regtest)
            .unwrap()
            .to_string();
        let broadcaster = RecordingBroadcaster::default();
        let pipeline =
            PaymentPipeline::new(regtest(), FailingRepository, FixedFee(1), &broadcaster);

        let err = pipeline.send_payment(&from, &payment(10_000), &KEY).unwrap_err();
        assert!(matches!(err, BtcError::Repository(_)));
        assert!(broadcaster.sent.borrow().is_empty());
    }

    #[test]
    fn insufficient_funds_is_not_broadcast() {
        let from = address_for_key(&KEY, ScriptClass::TaprootKeySpend, BtcNetwork::Regtest)
            .unwrap()
            .to_string();
        let mut repository = MemoryRepository::default();
        repository.fund(&from, &[5_000]);
        let broadcaster = RecordingBroadcaster::default();
        let pipeline = PaymentPipeline::new(regtest(), repository, FixedFee(1), &broadcaster);

        let err = pipeline.send_payment(&from, &payment(10_000), &KEY).unwrap_err();
        assert!(matches!(err, BtcError::InsufficientFunds { .. }));
        assert!(broadcaster.sent.borrow().is_empty());
    }

    #[test]
    fn wrong_key_fails_signing_without_broadcast() {
        let from = address_for_key(&KEY, ScriptClass::SegwitV0PubKeyHash, BtcNetwork::Regtest)
            .unwrap()
            .to_string();
        let mut repository = MemoryRepository::default();
        repository.fund(&from, &[50_000]);
        let broadcaster = RecordingBroadcaster::default();
        let pipeline = PaymentPipeline::new(regtest(), repository, FixedFee(1), &broadcaster);

        let err = pipeline.send_payment(&from, &payment(10_000), &[0x07; 32]).unwrap_err();
        assert!(matches!(err, BtcError::SigningFailure { index: 0, .. }));
        assert!(broadcaster.sent.borrow().is_empty());
    }

    #[test]
    fn fee_rate_is_raised_to_relay_minimum() {
        let from = address_for_key(&KEY, ScriptClass::SegwitV0PubKeyHash, BtcNetwork::Regtest)
            .unwrap()
            .to_string();
        let mut repository = MemoryRepository::default();
        repository.fund(&from, &[50_000]);
        let broadcaster = RecordingBroadcaster::default();
        let pipeline = PaymentPipeline::new(regtest(), repository, FixedFee(0), &broadcaster);

        let sent = pipeline.send_payment(&from, &payment(10_000), &KEY).unwrap();
        // One P2WPKH input, two P2WPKH outputs at 1 sat/vB.
        assert_eq!(sent.fee.to_sat(), 141);
    }
}
