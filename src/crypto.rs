//! Integrity and confidentiality helpers for the wire layer: HMAC-SHA256
//! request signatures and the RSA envelope around request bodies.

use hmac::{Hmac, Mac};
use rsa::{
    Pkcs1v15Encrypt,
    RsaPrivateKey, RsaPublicKey,
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::path::Path;

use crate::prelude::*;


type HmacSha256 = Hmac<Sha256>;

/// Name of the request/response header carrying the hex encoded signature.
pub(crate) const HASH_HEADER: &str = "HashSHA256";

/// HMAC-SHA256 of `body` under `key`, hex encoded for the header.
pub(crate) fn sign(key: &Secret<String>, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex signature against `body` in constant time. Returns `false`
/// for malformed hex as well as for a mismatch.
pub(crate) fn verify(key: &Secret<String>, body: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Loads an RSA public key from a PEM file, accepting both the PKCS#1
/// ("RSA PUBLIC KEY") and SPKI ("PUBLIC KEY") encodings.
pub(crate) fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)
        .context(format!("failed to read public key '{}'", path.display()))?;

    RsaPublicKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(&pem))
        .map_err(|e| anyhow!("failed to parse RSA public key '{}': {e}", path.display()))
}

/// Loads an RSA private key from a PEM file (PKCS#1 or PKCS#8).
pub(crate) fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)
        .context(format!("failed to read private key '{}'", path.display()))?;

    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| anyhow!("failed to parse RSA private key '{}': {e}", path.display()))
}

/// PKCS#1 v1.5 encryption of a request body. Only small payloads fit into a
/// single RSA block, which is fine here: the agent encrypts one metric JSON
/// at a time.
pub(crate) fn encrypt(key: &RsaPublicKey, plain: &[u8]) -> Result<Vec<u8>> {
    key.encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, plain)
        .context("RSA encryption failed")
}

pub(crate) fn decrypt(key: &RsaPrivateKey, cipher: &[u8]) -> Result<Vec<u8>> {
    key.decrypt(Pkcs1v15Encrypt, cipher)
        .context("RSA decryption failed")
}


#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Secret<String> {
        Secret::new(s.into())
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let signature = sign(&key("k"), b"hello");
        assert!(verify(&key("k"), b"hello", &signature));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let signature = sign(&key("k"), b"hello");
        assert!(!verify(&key("k"), b"hellp", &signature));
        assert!(!verify(&key("other"), b"hello", &signature));
    }

    #[test]
    fn malformed_hex_fails_verification() {
        assert!(!verify(&key("k"), b"hello", "not-hex"));
        assert!(!verify(&key("k"), b"hello", "abcd"));
    }

    #[test]
    fn rsa_roundtrip() {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let public = RsaPublicKey::from(&private);

        let plain = br#"{"id":"Alloc","type":"gauge","value":1.5}"#;
        let cipher = encrypt(&public, plain).unwrap();
        assert_ne!(&cipher, plain);
        assert_eq!(decrypt(&private, &cipher).unwrap(), plain);
    }
}
