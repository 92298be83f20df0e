use bitcoin::address::Address;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::CompressedPublicKey;
use zeroize::Zeroizing;

use crate::error::BtcError;
use crate::network::BtcNetwork;
use crate::script_class::ScriptClass;

/// Derive a P2WPKH (native SegWit bech32) address from a compressed public key.
///
/// Takes a 33-byte compressed secp256k1 public key and returns a bech32 address
/// string: `bc1...` for mainnet, `tb1...` for testnet/signet, `bcrt1...` for regtest.
pub fn pubkey_to_p2wpkh_address(
    pubkey_bytes: &[u8; 33],
    network: BtcNetwork,
) -> Result<String, BtcError> {
    let compressed_pk = CompressedPublicKey::from_slice(pubkey_bytes).map_err(|e| {
        BtcError::InvalidPublicKey(format!("failed to parse compressed public key: {e}"))
    })?;
    Ok(address_for_pubkey(compressed_pk, ScriptClass::SegwitV0PubKeyHash, network)?.to_string())
}

/// Derive the single-key address of `class` controlled by `private_key`.
///
/// Taproot addresses commit to the key alone (BIP-86), nested segwit
/// addresses wrap a P2WPKH program in P2SH.
pub fn address_for_key(
    private_key: &[u8; 32],
    class: ScriptClass,
    network: BtcNetwork,
) -> Result<Address, BtcError> {
    let key_bytes = Zeroizing::new(*private_key);
    let mut secret_key = SecretKey::from_slice(&key_bytes[..])
        .map_err(|e| BtcError::InvalidPrivateKey(format!("invalid secret key: {e}")))?;
    let public_key = PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret_key);
    secret_key.non_secure_erase();
    address_for_pubkey(CompressedPublicKey(public_key), class, network)
}

fn address_for_pubkey(
    public_key: CompressedPublicKey,
    class: ScriptClass,
    network: BtcNetwork,
) -> Result<Address, BtcError> {
    let network = network.to_bitcoin_network();
    match class {
        ScriptClass::TaprootKeySpend => {
            let (internal_key, _parity) = public_key.0.x_only_public_key();
            Ok(Address::p2tr(&Secp256k1::verification_only(), internal_key, None, network))
        }
        ScriptClass::SegwitV0PubKeyHash => Ok(Address::p2wpkh(&public_key, network)),
        ScriptClass::NestedSegwit => Ok(Address::p2shwpkh(&public_key, network)),
        ScriptClass::LegacyPubKeyHash => Ok(Address::p2pkh(
            bitcoin::PublicKey::new(public_key.0).pubkey_hash(),
            network,
        )),
        ScriptClass::Other => Err(BtcError::InvalidScript(format!(
            "no single-key address for script class {class}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENERATOR_PUBKEY: &str =
        "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798";

    fn one() -> [u8; 32] {
        let mut key = [0u8; 32];
        key[31] = 1;
        key
    }

    /// Private key 1, whose public key is the curve generator.
    #[test]
    fn p2wpkh_mainnet_test_vector() {
        let pubkey_bytes: [u8; 33] = hex::decode(GENERATOR_PUBKEY).unwrap().try_into().unwrap();

        let address = pubkey_to_p2wpkh_address(&pubkey_bytes, BtcNetwork::Mainnet).unwrap();
        assert_eq!(address, "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");
    }

    #[test]
    fn p2wpkh_testnet_address_starts_with_tb1() {
        let pubkey_bytes: [u8; 33] = hex::decode(GENERATOR_PUBKEY).unwrap().try_into().unwrap();

        let address = pubkey_to_p2wpkh_address(&pubkey_bytes, BtcNetwork::Testnet).unwrap();
        assert!(address.starts_with("tb1"), "expected tb1 prefix, got {address}");
    }

    #[test]
    fn invalid_pubkey_returns_error() {
        let result = pubkey_to_p2wpkh_address(&[0u8; 33], BtcNetwork::Mainnet);
        assert!(matches!(result, Err(BtcError::InvalidPublicKey(_))));
    }

    #[test]
    fn private_key_one_matches_known_addresses() {
        let p2wpkh =
            address_for_key(&one(), ScriptClass::SegwitV0PubKeyHash, BtcNetwork::Mainnet).unwrap();
        assert_eq!(p2wpkh.to_string(), "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4");

        let p2pkh =
            address_for_key(&one(), ScriptClass::LegacyPubKeyHash, BtcNetwork::Mainnet).unwrap();
        assert_eq!(p2pkh.to_string(), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
    }

    #[test]
    fn derived_scripts_classify_as_requested() {
        let key = [0x42; 32];
        for class in [
            ScriptClass::TaprootKeySpend,
            ScriptClass::SegwitV0PubKeyHash,
            ScriptClass::NestedSegwit,
            ScriptClass::LegacyPubKeyHash,
        ] {
            let address = address_for_key(&key, class, BtcNetwork::Regtest).unwrap();
            assert_eq!(ScriptClass::classify(&address.script_pubkey()), class);
        }
    }

    #[test]
    fn other_class_has_no_address() {
        let result = address_for_key(&[0x42; 32], ScriptClass::Other, BtcNetwork::Mainnet);
        assert!(matches!(result, Err(BtcError::InvalidScript(_))));
    }

    #[test]
    fn zero_private_key_is_rejected() {
        let result = address_for_key(&[0u8; 32], ScriptClass::TaprootKeySpend, BtcNetwork::Mainnet);
        assert!(matches!(result, Err(BtcError::InvalidPrivateKey(_))));
    }
}
