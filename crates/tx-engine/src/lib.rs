//! Bitcoin transaction construction.
//!
//! Funds payments from a UTXO pool with largest-first coin selection,
//! estimates the signed size of P2TR, P2WPKH, P2SH-P2WPKH and P2PKH spends
//! before any signature exists, enforces the dust policy, and signs and
//! finalizes the result through a BIP-174 partially signed transaction.
//!
//! The library emits `tracing` events and never installs a subscriber.

pub mod address;
pub mod config;
pub mod dust;
pub mod error;
pub mod network;
pub mod provider;
pub mod psbt;
pub mod script_class;
pub mod selection;
pub mod transaction;
pub mod utxo;
pub mod vsize;

pub use error::BtcError;
