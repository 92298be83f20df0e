//! Greedy largest-first coin selection.
//!
//! The fee depends on the final size, the size depends on which inputs and
//! whether a change output are present, and whether change is worth adding
//! depends on the fee. Selection resolves this by adding candidates one at
//! a time (largest first) and re-estimating after each, trying the shape
//! with change before falling back to the shape without it. At most one
//! iteration per candidate is needed.

use bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::dust::DustPolicy;
use crate::error::BtcError;
use crate::utxo::{Utxo, UtxoSet};
use crate::vsize;

/// Outcome of a successful selection.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Transaction with the selected inputs and, if any, the change output last.
    pub tx: Transaction,
    /// Outputs spent by `tx`, in input order.
    pub prevouts: Vec<TxOut>,
    /// The candidates that were consumed, in input order after any
    /// inputs the transaction already had.
    pub selected: Vec<Utxo>,
    /// Index of the change output in `tx.output`.
    pub change_index: Option<usize>,
    /// Total input value minus total output value.
    pub fee: Amount,
}

impl Selection {
    /// The change output, or `None` if there is none or `tx` no longer holds it.
    pub fn change(&self) -> Option<&TxOut> {
        self.change_index.and_then(|index| self.tx.output.get(index))
    }
}

/// Transaction under construction, owned by one selection call.
///
/// The caller's transaction is cloned into it up front and only handed back
/// inside a [`Selection`] once selection succeeds.
struct BuildContext {
    tx: Transaction,
    prevouts: Vec<TxOut>,
    selected: Vec<Utxo>,
    sequence: Sequence,
}

impl BuildContext {
    fn new(tx: &Transaction, prevouts: &[TxOut], sequence: Sequence) -> Self {
        Self {
            tx: tx.clone(),
            prevouts: prevouts.to_vec(),
            selected: Vec::new(),
            sequence,
        }
    }

    fn push_input(&mut self, utxo: &Utxo) {
        self.tx.input.push(TxIn {
            previous_output: utxo.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: self.sequence,
            witness: Witness::default(),
        });
        self.prevouts.push(utxo.txout());
        self.selected.push(utxo.clone());
    }

    fn estimated_fee(&self, fee_rate: FeeRate) -> Result<i64, BtcError> {
        to_signed(vsize::estimate_fee(&self.tx, &self.prevouts, fee_rate)?)
    }

    fn finish(self, change_index: Option<usize>, fee: i64) -> Result<Selection, BtcError> {
        let fee = u64::try_from(fee)
            .map(Amount::from_sat)
            .map_err(|_| BtcError::TransactionBuildError(format!("negative fee {fee}")))?;
        tracing::debug!(
            inputs = self.selected.len(),
            fee = fee.to_sat(),
            change = change_index.is_some(),
            "coin selection complete"
        );
        Ok(Selection {
            tx: self.tx,
            prevouts: self.prevouts,
            selected: self.selected,
            change_index,
            fee,
        })
    }
}

fn to_signed(amount: Amount) -> Result<i64, BtcError> {
    i64::try_from(amount.to_sat())
        .map_err(|_| BtcError::TransactionBuildError(format!("amount {amount} out of range")))
}

fn overflow() -> BtcError {
    BtcError::TransactionBuildError("amount arithmetic overflow".into())
}

/// Largest-first coin selector for one fee rate and relay policy.
#[derive(Debug, Clone, Copy)]
pub struct CoinSelector {
    fee_rate: FeeRate,
    dust: DustPolicy,
    sequence: Sequence,
}

impl CoinSelector {
    pub fn new(fee_rate: FeeRate, dust: DustPolicy) -> Self {
        Self {
            fee_rate,
            dust,
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        }
    }

    /// nSequence given to every selected input.
    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    /// Fund `tx` from `pool`.
    ///
    /// `prevouts` are the outputs spent by inputs `tx` already has.
    /// `in_out_difference` is the value those inputs bring in minus the value
    /// of the outputs already on `tx`; it is negative when the transaction
    /// still has to be funded. A change output paying to `change_script` is
    /// added when the leftover is not dust, otherwise the leftover goes to fee.
    pub fn select(
        &self,
        tx: &Transaction,
        prevouts: &[TxOut],
        pool: &UtxoSet,
        in_out_difference: i64,
        change_script: &ScriptBuf,
    ) -> Result<Selection, BtcError> {
        let spent: Vec<OutPoint> = tx.input.iter().map(|input| input.previous_output).collect();
        let candidates: Vec<&Utxo> = pool
            .largest_first()
            .into_iter()
            .filter(|utxo| !spent.contains(&utxo.outpoint))
            .collect();
        let pool_value = candidates
            .iter()
            .try_fold(Amount::ZERO, |acc, utxo| acc.checked_add(utxo.value))
            .ok_or_else(overflow)?;

        let mut ctx = BuildContext::new(tx, prevouts, self.sequence);
        let change_template = TxOut {
            value: Amount::ZERO,
            script_pubkey: change_script.clone(),
        };
        ctx.tx.output.push(change_template.clone());
        let change_index = ctx.tx.output.len() - 1;

        let mut accumulated: i64 = 0;
        let mut required = in_out_difference.saturating_neg().max(0);

        for utxo in candidates {
            ctx.push_input(utxo);
            accumulated = accumulated.checked_add(to_signed(utxo.value)?).ok_or_else(overflow)?;
            let available = accumulated.checked_add(in_out_difference).ok_or_else(overflow)?;

            let fee = ctx.estimated_fee(self.fee_rate)?;
            let change_value = available - fee;
            tracing::debug!(
                inputs = ctx.selected.len(),
                accumulated,
                fee,
                change_value,
                "evaluating candidate"
            );

            if change_value > 0 {
                ctx.tx.output[change_index].value = Amount::from_sat(change_value as u64);
                if self.dust.is_dust(&ctx.tx.output[change_index]) {
                    tracing::warn!(
                        change_value,
                        "dropping dust change output, leftover goes to fee"
                    );
                    ctx.tx.output.truncate(change_index);
                    return ctx.finish(None, available);
                }
                return ctx.finish(Some(change_index), fee);
            }

            ctx.tx.output.truncate(change_index);
            if change_value == 0 {
                return ctx.finish(None, available);
            }

            let fee_without_change = ctx.estimated_fee(self.fee_rate)?;
            if available - fee_without_change >= 0 {
                return ctx.finish(None, available);
            }
            required = fee_without_change.saturating_sub(in_out_difference);
            ctx.tx.output.push(change_template.clone());
        }

        Err(BtcError::InsufficientFunds {
            available: pool_value.to_sat(),
            required: required.max(0) as u64,
        })
    }
}
