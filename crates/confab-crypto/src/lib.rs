//! Per-user symmetric crypto box for memory blobs.
//!
//! Each user row carries one base64-encoded AES-256-GCM key, generated on
//! first need and never rotated here. Ciphertexts are tagged with a
//! recognizable prefix so callers can discriminate encrypted strings
//! without attempting decryption.
//!
//! Wire format: `enc1:` + base64(nonce[12] || ciphertext+tag).

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

/// Prefix identifying a confab ciphertext. Version suffix allows a future
/// format change without trial decryption.
const ENC_PREFIX: &str = "enc1:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),
}

/// Generate a fresh 256-bit key, URL-safe base64 encoded for storage on the
/// user row.
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    URL_SAFE_NO_PAD.encode(key)
}

fn decode_key(key: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let raw = URL_SAFE_NO_PAD
        .decode(key.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    raw.try_into()
        .map_err(|_| CryptoError::InvalidKey("key must be 32 bytes".to_string()))
}

/// Encrypt plaintext bytes under the given stored key.
pub fn encrypt(key: &str, plaintext: &[u8]) -> Result<String, CryptoError> {
    let key_bytes = decode_key(key)?;
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|_| CryptoError::InvalidKey("key must be 32 bytes".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::InvalidCiphertext(e.to_string()))?;

    let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    packed.extend_from_slice(&nonce_bytes);
    packed.extend_from_slice(&ciphertext);

    Ok(format!("{}{}", ENC_PREFIX, STANDARD.encode(packed)))
}

/// Decrypt a ciphertext string produced by [`encrypt`].
///
/// Fails with `InvalidCiphertext` on MAC failure, malformed input, or a
/// non-matching key. There is no silent-corruption path.
pub fn decrypt(key: &str, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
    let encoded = ciphertext
        .strip_prefix(ENC_PREFIX)
        .ok_or_else(|| CryptoError::InvalidCiphertext("missing prefix".to_string()))?;

    let packed = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidCiphertext(e.to_string()))?;

    if packed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidCiphertext(
            "ciphertext too short".to_string(),
        ));
    }

    let (nonce_bytes, body) = packed.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let key_bytes = decode_key(key)?;
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|_| CryptoError::InvalidKey("key must be 32 bytes".to_string()))?;

    cipher
        .decrypt(nonce, body)
        .map_err(|_| CryptoError::InvalidCiphertext("authentication failed".to_string()))
}

/// Prefix check only — never attempts decryption.
pub fn is_encrypted(s: &str) -> bool {
    s.starts_with(ENC_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_identity() {
        let key = generate_key();
        let plaintext = br#"{"messages":[{"role":"user","content":"Hello"}]}"#;
        let ct = encrypt(&key, plaintext).unwrap();
        assert!(is_encrypted(&ct));
        assert_eq!(decrypt(&key, &ct).unwrap(), plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let key_a = generate_key();
        let key_b = generate_key();
        let ct = encrypt(&key_a, b"secret").unwrap();
        assert!(matches!(
            decrypt(&key_b, &ct),
            Err(CryptoError::InvalidCiphertext(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_key();
        let ct = encrypt(&key, b"secret").unwrap();
        // Flip a character in the base64 body.
        let mut chars: Vec<char> = ct.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();
        assert!(decrypt(&key, &tampered).is_err());
    }

    #[test]
    fn malformed_input_fails() {
        let key = generate_key();
        assert!(decrypt(&key, "not-encrypted").is_err());
        assert!(decrypt(&key, "enc1:!!!not-base64!!!").is_err());
        assert!(decrypt(&key, "enc1:AAAA").is_err());
    }

    #[test]
    fn prefix_detection_is_prefix_only() {
        assert!(is_encrypted("enc1:anything"));
        assert!(!is_encrypted("gAAAAA-legacy-token"));
        assert!(!is_encrypted(""));
    }

    #[test]
    fn ciphertexts_are_nondeterministic() {
        let key = generate_key();
        let a = encrypt(&key, b"same plaintext").unwrap();
        let b = encrypt(&key, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn bad_key_material_rejected() {
        assert!(matches!(
            encrypt("too-short", b"data"),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}
