use bitcoin::Script;

/// Spending class of an output script.
///
/// The set is closed: it decides which placeholder witness the vsize
/// estimator inserts, what a later spend costs for the dust policy, and
/// which signing strategy the PSBT signer applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptClass {
    /// P2TR, spent through the key path with a single Schnorr signature.
    TaprootKeySpend,
    /// P2WPKH.
    SegwitV0PubKeyHash,
    /// P2SH, assumed to wrap a P2WPKH redeem script.
    NestedSegwit,
    /// P2PKH.
    LegacyPubKeyHash,
    Other,
}

impl ScriptClass {
    /// Classify a scriptPubKey. Total: unknown scripts map to [`ScriptClass::Other`].
    pub fn classify(script: &Script) -> Self {
        if script.is_p2tr() {
            ScriptClass::TaprootKeySpend
        } else if script.is_p2wpkh() {
            ScriptClass::SegwitV0PubKeyHash
        } else if script.is_p2sh() {
            ScriptClass::NestedSegwit
        } else if script.is_p2pkh() {
            ScriptClass::LegacyPubKeyHash
        } else {
            ScriptClass::Other
        }
    }

    /// Whether a spend of this class carries witness data.
    pub fn is_segwit(self) -> bool {
        matches!(
            self,
            ScriptClass::TaprootKeySpend
                | ScriptClass::SegwitV0PubKeyHash
                | ScriptClass::NestedSegwit
        )
    }
}

impl std::fmt::Display for ScriptClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptClass::TaprootKeySpend => write!(f, "p2tr"),
            ScriptClass::SegwitV0PubKeyHash => write!(f, "p2wpkh"),
            ScriptClass::NestedSegwit => write!(f, "p2sh-p2wpkh"),
            ScriptClass::LegacyPubKeyHash => write!(f, "legacy-p2pkh"),
            ScriptClass::Other => write!(f, "other"),
        }
    }
}
