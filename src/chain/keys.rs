use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};

use crate::error::{Error, Result};

/// Parses a signing key given as WIF (any chain's version byte) or as 64 hex characters.
pub fn parse_private_key(encoded: &str) -> Result<SecretKey> {
    let encoded = encoded.trim();

    let secret = if encoded.len() == 64 && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(encoded).map_err(|e| Error::InvalidPrivateKey(format!("hex: {e}")))?
    } else {
        let payload = bitcoin::base58::decode_check(encoded)
            .map_err(|e| Error::InvalidPrivateKey(format!("wif: {e}")))?;
        match payload.len() {
            33 => payload[1..].to_vec(),
            34 if payload[33] == 0x01 => payload[1..33].to_vec(),
            len => {
                return Err(Error::InvalidPrivateKey(format!(
                    "wif payload has unexpected length {len}"
                )));
            }
        }
    };

    SecretKey::from_slice(&secret).map_err(|e| Error::InvalidPrivateKey(e.to_string()))
}

pub fn public_key<C: Signing>(secp: &Secp256k1<C>, secret_key: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(secp, secret_key)
}
