use std::collections::HashSet;

use bitcoin::address::{Address, NetworkUnchecked};
use bitcoin::{Amount, OutPoint, ScriptBuf, TxOut, Txid};
use serde::{Deserialize, Serialize};

use crate::error::BtcError;
use crate::network::BtcNetwork;
use crate::script_class::ScriptClass;

/// A single unspent transaction output (UTXO).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction hash and output index.
    pub outpoint: OutPoint,
    /// Value in satoshis.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub value: Amount,
    /// The locking script (scriptPubKey).
    pub script_pubkey: ScriptBuf,
}

impl Utxo {
    /// Build a UTXO from a display-order txid hex string and raw script bytes.
    pub fn new(
        txid: &str,
        vout: u32,
        amount_sat: u64,
        script_pubkey: Vec<u8>,
    ) -> Result<Self, BtcError> {
        let txid: Txid = txid
            .parse()
            .map_err(|e| BtcError::TransactionBuildError(format!("invalid txid: {e}")))?;
        Ok(Self {
            outpoint: OutPoint::new(txid, vout),
            value: Amount::from_sat(amount_sat),
            script_pubkey: ScriptBuf::from_bytes(script_pubkey),
        })
    }

    pub fn script_class(&self) -> ScriptClass {
        ScriptClass::classify(&self.script_pubkey)
    }

    /// The output this UTXO refers to, as needed for sighash computation.
    pub fn txout(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// Ordered collection of UTXOs available to fund a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    utxos: Vec<Utxo>,
}

impl UtxoSet {
    pub fn new(utxos: Vec<Utxo>) -> Self {
        Self { utxos }
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.iter()
    }

    pub fn as_slice(&self) -> &[Utxo] {
        &self.utxos
    }

    /// Aggregate value of every UTXO in the set.
    pub fn total_value(&self) -> Result<Amount, BtcError> {
        self.utxos.iter().try_fold(Amount::ZERO, |acc, utxo| {
            acc.checked_add(utxo.value)
                .ok_or_else(|| BtcError::TransactionBuildError("utxo value overflow".into()))
        })
    }

    /// Candidates sorted by value, largest first.
    ///
    /// The sort is stable, so equal values keep their pool order. Repeated
    /// outpoints are kept only at their first occurrence.
    pub fn largest_first(&self) -> Vec<&Utxo> {
        let mut seen = HashSet::with_capacity(self.utxos.len());
        let mut sorted: Vec<&Utxo> = Vec::with_capacity(self.utxos.len());
        for utxo in &self.utxos {
            if seen.insert(utxo.outpoint) {
                sorted.push(utxo);
            } else {
                tracing::warn!(
                    outpoint = %utxo.outpoint,
                    "skipping duplicate utxo in candidate pool"
                );
            }
        }
        sorted.sort_by(|a, b| b.value.cmp(&a.value));
        sorted
    }
}

impl From<Vec<Utxo>> for UtxoSet {
    fn from(utxos: Vec<Utxo>) -> Self {
        Self::new(utxos)
    }
}

impl FromIterator<Utxo> for UtxoSet {
    fn from_iter<I: IntoIterator<Item = Utxo>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A payment the caller wants the transaction to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredOutput {
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
}

impl RequiredOutput {
    pub fn new(value: Amount, script_pubkey: ScriptBuf) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// Pay `amount_sat` to an address, which must belong to `network`.
    pub fn to_address(
        address: &str,
        amount_sat: u64,
        network: BtcNetwork,
    ) -> Result<Self, BtcError> {
        let script_pubkey = parse_address(address, network)?.script_pubkey();
        Ok(Self::new(Amount::from_sat(amount_sat), script_pubkey))
    }

    pub fn txout(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }
}

/// Parse an address string and check it belongs to `network`.
pub fn parse_address(address: &str, network: BtcNetwork) -> Result<Address, BtcError> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("failed to parse address: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| BtcError::InvalidAddress(format!("address wrong network: {e}")))
}
