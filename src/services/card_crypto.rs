//! Card secret handling.
//!
//! This module generates card numbers and CVVs, masks them for display,
//! encrypts them at rest with AES-256-GCM and derives keyed fingerprints
//! for uniqueness checks.
//!
//! # Ciphertext Format
//!
//! `base64(nonce || ciphertext)` with a fresh random 12-byte nonce per value.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;

/// Digits in a generated card number, including the check digit.
pub const PAN_LENGTH: usize = 16;

/// Encrypts, decrypts and fingerprints card secrets with one configured key.
#[derive(Clone)]
pub struct CardVault {
    cipher: Aes256Gcm,
    fingerprint_mac: HmacSha256,
}

impl CardVault {
    /// Build a vault from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Crypto` if the key is not valid base64 or not
    /// exactly 32 bytes.
    pub fn from_base64_key(encoded: &str) -> Result<Self, AppError> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| AppError::Crypto(format!("encryption key is not base64: {}", e)))?;

        if key.len() != 32 {
            return Err(AppError::Crypto(format!(
                "encryption key must be 32 bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| AppError::Crypto(format!("invalid encryption key: {}", e)))?;
        let fingerprint_mac = <HmacSha256 as Mac>::new_from_slice(&key)
            .map_err(|e| AppError::Crypto(format!("invalid fingerprint key: {}", e)))?;

        Ok(Self {
            cipher,
            fingerprint_mac,
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| AppError::Crypto("encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(sealed))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, AppError> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|_| AppError::Crypto("ciphertext is not base64".to_string()))?;

        if sealed.len() <= NONCE_LEN {
            return Err(AppError::Crypto("ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Crypto("decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| AppError::Crypto("decrypted value is not UTF-8".to_string()))
    }

    /// Keyed SHA-256 fingerprint of a secret, hex encoded.
    ///
    /// `label` separates the PAN and CVV domains so equal digit strings do
    /// not share a fingerprint.
    pub fn fingerprint(&self, label: &str, value: &str) -> String {
        let mut mac = self.fingerprint_mac.clone();
        mac.update(label.as_bytes());
        mac.update(b":");
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Luhn check digit for a number body (without the check digit).
pub fn luhn_check_digit(body: &str) -> u32 {
    let sum: u32 = body
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .enumerate()
        .map(|(i, digit)| {
            if i % 2 == 0 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();

    (10 - sum % 10) % 10
}

/// Whether a full card number passes the Luhn check.
pub fn is_luhn_valid(pan: &str) -> bool {
    if pan.len() < 2 || !pan.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let (body, check) = pan.split_at(pan.len() - 1);
    check.parse::<u32>().ok() == Some(luhn_check_digit(body))
}

/// Generate a 16-digit PAN: the issuer prefix, random digits, and a Luhn
/// check digit.
pub fn generate_pan(iin: &str) -> String {
    let mut rng = rand::rng();
    let mut body = String::with_capacity(PAN_LENGTH);
    body.push_str(iin);
    while body.len() < PAN_LENGTH - 1 {
        body.push(char::from(b'0' + rng.random_range(0..10u8)));
    }

    let check = luhn_check_digit(&body);
    body.push_str(&check.to_string());
    body
}

pub fn generate_cvv() -> String {
    format!("{:03}", rand::rng().random_range(0..1000u16))
}

/// First four and last four digits visible, the rest starred.
pub fn mask_pan(pan: &str) -> String {
    if pan.len() <= 8 {
        return pan.to_string();
    }

    let hidden = pan.len() - 8;
    format!("{}{}{}", &pan[..4], "*".repeat(hidden), &pan[pan.len() - 4..])
}

/// `prefix` followed by `len` random alphanumerics.
pub fn random_reference(prefix: &str, len: usize) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();

    format!("{}{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    #[test]
    fn luhn_check_digit_matches_known_values() {
        assert_eq!(luhn_check_digit("7992739871"), 3);
        assert_eq!(luhn_check_digit("453201512345678"), 9);
        assert!(is_luhn_valid("4532015123456789"));
        assert!(!is_luhn_valid("4532015123456788"));
    }

    #[test]
    fn generated_pans_carry_the_iin_and_pass_luhn() {
        for _ in 0..50 {
            let pan = generate_pan("4532015");
            assert_eq!(pan.len(), PAN_LENGTH);
            assert!(pan.starts_with("4532015"));
            assert!(is_luhn_valid(&pan), "{} failed Luhn", pan);
        }
    }

    #[test]
    fn cvv_is_three_digits() {
        for _ in 0..50 {
            let cvv = generate_cvv();
            assert_eq!(cvv.len(), 3);
            assert!(cvv.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn masking_keeps_first_and_last_four() {
        assert_eq!(mask_pan("4532015123456789"), "4532********6789");
    }

    #[test]
    fn references_have_prefix_and_length() {
        let reference = random_reference("CRDFLW", 10);
        assert!(reference.starts_with("CRDFLW"));
        assert_eq!(reference.len(), 16);
        assert!(reference.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn encryption_round_trips_with_fresh_nonces() {
        let vault = CardVault::from_base64_key(TEST_KEY).unwrap();

        let first = vault.encrypt("4532015123456789").unwrap();
        let second = vault.encrypt("4532015123456789").unwrap();

        assert_ne!(first, second);
        assert_eq!(vault.decrypt(&first).unwrap(), "4532015123456789");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let vault = CardVault::from_base64_key(TEST_KEY).unwrap();
        let sealed = vault.encrypt("123").unwrap();

        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        assert!(matches!(
            vault.decrypt(&BASE64.encode(raw)),
            Err(AppError::Crypto(_))
        ));
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(CardVault::from_base64_key("c2hvcnQ=").is_err());
        assert!(CardVault::from_base64_key("not base64!").is_err());
    }

    #[test]
    fn fingerprints_are_stable_and_domain_separated() {
        let vault = CardVault::from_base64_key(TEST_KEY).unwrap();

        assert_eq!(vault.fingerprint("pan", "123"), vault.fingerprint("pan", "123"));
        assert_ne!(vault.fingerprint("pan", "123"), vault.fingerprint("cvv", "123"));
        assert_eq!(vault.fingerprint("pan", "123").len(), 64);
    }
}
