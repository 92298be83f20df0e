use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, FeeRate, ScriptBuf, Sequence, Transaction, TxOut};

use crate::config::EngineConfig;
use crate::dust::DustPolicy;
use crate::error::BtcError;
use crate::network::NetworkParams;
use crate::selection::CoinSelector;
use crate::utxo::{parse_address, RequiredOutput, Utxo, UtxoSet};
use crate::vsize;

/// An unsigned Bitcoin transaction ready for signing.
#[derive(Debug, Clone)]
pub struct UnsignedBtcTx {
    /// The bitcoin transaction with empty witnesses.
    pub tx: Transaction,
    /// The outputs being spent (in the same order as the transaction inputs).
    /// Needed for computing sighashes during signing.
    pub prevouts: Vec<TxOut>,
    /// The UTXOs consumed from the candidate pool.
    pub selected: Vec<Utxo>,
    /// Index of the change output, if one was added.
    pub change_index: Option<usize>,
    /// Inputs minus outputs.
    pub fee: Amount,
}

impl UnsignedBtcTx {
    /// Size the transaction is expected to have once signed.
    pub fn estimated_vsize(&self) -> Result<usize, BtcError> {
        vsize::estimate_vsize(&self.tx, &self.prevouts)
    }

    /// The change output, or `None` if there is none or `tx` no longer holds it.
    pub fn change(&self) -> Option<&TxOut> {
        self.change_index.and_then(|index| self.tx.output.get(index))
    }

    pub fn input_value(&self) -> Amount {
        self.prevouts.iter().map(|prevout| prevout.value).sum()
    }

    pub fn output_value(&self) -> Amount {
        self.tx.output.iter().map(|output| output.value).sum()
    }
}

/// Turns payment requests into funded, unsigned transactions.
#[derive(Debug, Clone, Copy)]
pub struct TxAssembler {
    params: NetworkParams,
    sequence: Sequence,
}

impl TxAssembler {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            params,
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, BtcError> {
        let sequence = if config.enable_rbf {
            Sequence::ENABLE_RBF_NO_LOCKTIME
        } else {
            Sequence::MAX
        };
        Ok(Self {
            params: config.network_params()?,
            sequence,
        })
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn dust_policy(&self) -> DustPolicy {
        DustPolicy::new(self.params)
    }

    /// Build an unsigned transaction paying `required`, funded from `candidates`.
    ///
    /// Every requested output must pass the dust policy. Leftover value goes
    /// to a change output paying `change_script` unless it would be dust.
    pub fn build(
        &self,
        required: &[RequiredOutput],
        candidates: &UtxoSet,
        change_script: &ScriptBuf,
        fee_rate: FeeRate,
    ) -> Result<UnsignedBtcTx, BtcError> {
        if required.is_empty() {
            return Err(BtcError::TransactionBuildError("no outputs requested".into()));
        }

        let outputs: Vec<TxOut> = required.iter().map(RequiredOutput::txout).collect();
        let dust = self.dust_policy();
        dust.check_outputs(&outputs)?;

        let total_out = outputs
            .iter()
            .try_fold(Amount::ZERO, |acc, output| acc.checked_add(output.value))
            .ok_or_else(|| BtcError::TransactionBuildError("output value overflow".into()))?;
        let in_out_difference = i64::try_from(total_out.to_sat())
            .map(|sat| -sat)
            .map_err(|_| BtcError::TransactionBuildError("output value out of range".into()))?;

        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: outputs,
        };

        let selection = CoinSelector::new(fee_rate, dust)
            .with_sequence(self.sequence)
            .select(&tx, &[], candidates, in_out_difference, change_script)?;

        tracing::info!(
            inputs = selection.tx.input.len(),
            outputs = selection.tx.output.len(),
            fee = selection.fee.to_sat(),
            "built unsigned transaction"
        );

        Ok(UnsignedBtcTx {
            tx: selection.tx,
            prevouts: selection.prevouts,
            selected: selection.selected,
            change_index: selection.change_index,
            fee: selection.fee,
        })
    }

    /// Build a single-recipient payment from address strings.
    ///
    /// Both addresses must belong to the configured network.
    pub fn build_payment(
        &self,
        utxos: &UtxoSet,
        recipient: &str,
        amount_sat: u64,
        change_address: &str,
        fee_rate: FeeRate,
    ) -> Result<UnsignedBtcTx, BtcError> {
        let network = self.params.network;
        let payment = RequiredOutput::to_address(recipient, amount_sat, network)
            .map_err(|e| BtcError::InvalidAddress(format!("recipient: {e}")))?;
        let change_script = parse_address(change_address, network)
            .map_err(|e| BtcError::InvalidAddress(format!("change: {e}")))?
            .script_pubkey();

        self.build(&[payment], utxos, &change_script, fee_rate)
    }
}
