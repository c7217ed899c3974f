//! Session-key derivation and secret encryption using the `ring` crate.
//!
//! This module provides the core cryptographic primitives for the vault:
//!
//! - **Key derivation**: PBKDF2-HMAC-SHA256 turns a master password and a
//!   per-user random salt into a 256-bit [`SessionKey`].
//! - **Secret cipher**: AES-256-GCM authenticated encryption with a random
//!   96-bit nonce per call, packed into a single URL-safe base64 token that
//!   fits in a text column.
//! - **Random generation**: salts and generated passwords from the system
//!   CSPRNG.
//!
//! # Token layout
//!
//! ```text
//! base64url( version:1 | nonce:12 | ciphertext | tag:16 )
//! ```
//!
//! Decryption with the wrong key fails tag verification and is reported as
//! [`VaultError::DecryptionFailed`]; it never returns garbage plaintext.

use std::fmt;
use std::num::NonZeroU32;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

/// Length of the derived AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the per-user key-derivation salt in bytes.
pub const SALT_LEN: usize = 16;

/// Default PBKDF2 iteration count for newly created users.
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

/// Version byte at the start of every encrypted token.
const TOKEN_VERSION: u8 = 0x01;

/// AES-GCM tag length appended by `ring`.
const TAG_LEN: usize = 16;

/// Length used by front ends when none is given.
pub const DEFAULT_PASSWORD_LENGTH: usize = 12;

/// Characters used by [`generate_password`].
const PASSWORD_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

/// PBKDF2 algorithm: HMAC-SHA256.
static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// AES-256-GCM algorithm from `ring`.
static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

// ---------------------------------------------------------------------------
// Session key
// ---------------------------------------------------------------------------

/// A 256-bit symmetric key derived from a master password.
///
/// Lives only in memory for the duration of a session and is zeroized when
/// dropped. It is never written to the database.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Textual form of the key: URL-safe base64 of the raw bytes.
    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Parse a key previously produced by [`SessionKey::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidArgument`] if the text is not base64 or
    /// does not decode to exactly [`KEY_LEN`] bytes.
    pub fn from_encoded(text: &str) -> Result<Self> {
        let mut raw = URL_SAFE
            .decode(text.trim())
            .map_err(|e| VaultError::InvalidArgument(format!("invalid key encoding: {e}")))?;

        if raw.len() != KEY_LEN {
            let len = raw.len();
            raw.zeroize();
            return Err(VaultError::InvalidArgument(format!(
                "key must be {KEY_LEN} bytes, got {len}"
            )));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&raw);
        raw.zeroize();
        Ok(Self(key))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Derive a [`SessionKey`] from `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// Deterministic: the same password, salt and iteration count always yield
/// the same key, which is what makes previously stored secrets readable on the
/// next login. A wrong password silently yields a different key; the mismatch
/// only shows up when a secret fails to decrypt.
///
/// An iteration count of zero is treated as one.
pub fn derive_key(password: &str, salt: &[u8], iterations: u32) -> SessionKey {
    let iterations = NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN);

    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(PBKDF2_ALG, iterations, salt, password.as_bytes(), &mut key);

    tracing::trace!(iterations = iterations.get(), "derived session key via PBKDF2");
    SessionKey(key)
}

/// Generate a fresh per-user key-derivation salt.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the system CSPRNG fails.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random salt".into(),
        })?;
    Ok(salt)
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A single-use nonce sequence that yields exactly one nonce and then errors.
///
/// `ring` requires a [`NonceSequence`] for sealing and opening keys. Every
/// token carries its own random nonce, so each bound key is used once.
struct SingleNonce(Option<[u8; NONCE_LEN]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Secret cipher
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under `key` and return the opaque storage token.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if nonce generation or sealing
/// fails.
pub fn encrypt(plaintext: &str, key: &SessionKey) -> Result<String> {
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random nonce".into(),
        })?;

    let unbound_key =
        UnboundKey::new(AEAD_ALG, key.as_bytes()).map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to create AES-256-GCM key".into(),
        })?;
    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce(Some(nonce)));

    // `ring` encrypts in-place and appends the authentication tag.
    let mut in_out = plaintext.as_bytes().to_vec();
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "seal_in_place failed".into(),
        })?;

    let mut token = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
    token.push(TOKEN_VERSION);
    token.extend_from_slice(&nonce);
    token.extend_from_slice(&in_out);

    tracing::trace!(
        plaintext_len = plaintext.len(),
        token_len = token.len(),
        "encrypted secret"
    );

    Ok(URL_SAFE.encode(token))
}

/// Decrypt a token produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`VaultError::DecryptionFailed`] if the token is malformed, was
/// written by an unknown format version, was tampered with, or was encrypted
/// under a different key.
pub fn decrypt(token: &str, key: &SessionKey) -> Result<String> {
    let raw = URL_SAFE
        .decode(token.trim())
        .map_err(|_| VaultError::DecryptionFailed {
            reason: "token is not valid base64".into(),
        })?;

    if raw.len() < 1 + NONCE_LEN + TAG_LEN {
        return Err(VaultError::DecryptionFailed {
            reason: format!("token is {} bytes, too short", raw.len()),
        });
    }
    if raw[0] != TOKEN_VERSION {
        return Err(VaultError::DecryptionFailed {
            reason: format!("unsupported token version {}", raw[0]),
        });
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&raw[1..1 + NONCE_LEN]);

    let unbound_key =
        UnboundKey::new(AEAD_ALG, key.as_bytes()).map_err(|_| VaultError::DecryptionFailed {
            reason: "failed to create AES-256-GCM key".into(),
        })?;
    let mut opening_key = OpeningKey::new(unbound_key, SingleNonce(Some(nonce)));

    let mut in_out = raw[1 + NONCE_LEN..].to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::DecryptionFailed {
            reason: "authentication failed: wrong key or corrupted data".into(),
        })?;

    let text = String::from_utf8(plaintext.to_vec()).map_err(|_| VaultError::DecryptionFailed {
        reason: "plaintext is not valid UTF-8".into(),
    })?;
    in_out.zeroize();

    Ok(text)
}

// ---------------------------------------------------------------------------
// Password generator
// ---------------------------------------------------------------------------

/// Generate a random password of `length` characters drawn from letters,
/// digits and `!@#$%^&*`.
///
/// Uses rejection sampling so every character is equally likely.
///
/// # Errors
///
/// Returns [`VaultError::EncryptionFailed`] if the system CSPRNG fails.
pub fn generate_password(length: usize) -> Result<String> {
    let rng = SystemRandom::new();
    let alphabet_len = PASSWORD_ALPHABET.len();
    // Largest multiple of the alphabet size that fits in a byte.
    let limit = 256 - (256 % alphabet_len);

    let mut password = String::with_capacity(length);
    let mut buf = [0u8; 64];
    while password.len() < length {
        rng.fill(&mut buf).map_err(|_| VaultError::EncryptionFailed {
            reason: "failed to generate random password".into(),
        })?;
        for &byte in &buf {
            if password.len() == length {
                break;
            }
            if (byte as usize) < limit {
                password.push(PASSWORD_ALPHABET[byte as usize % alphabet_len] as char);
            }
        }
    }
    buf.zeroize();

    Ok(password)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: u32 = 1_000;

    fn key(password: &str, salt: &[u8]) -> SessionKey {
        derive_key(password, salt, FAST)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let k = key("pw1", b"0123456789abcdef");
        let token = encrypt("s3cr3t", &k).unwrap();
        assert_eq!(decrypt(&token, &k).unwrap(), "s3cr3t");
    }

    #[test]
    fn token_is_opaque_and_text_safe() {
        let k = key("pw1", b"0123456789abcdef");
        let token = encrypt("s3cr3t", &k).unwrap();

        assert!(!token.contains("s3cr3t"));
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '='))
        );
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let k = key("pw1", b"0123456789abcdef");
        let a = encrypt("same", &k).unwrap();
        let b = encrypt("same", &k).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn derivation_is_deterministic() {
        let salt = generate_salt().unwrap();
        assert_eq!(key("pw", &salt), key("pw", &salt));
        assert_eq!(key("pw", &salt).encode(), key("pw", &salt).encode());
    }

    #[test]
    fn different_salts_give_unrelated_keys() {
        let s1 = generate_salt().unwrap();
        let s2 = generate_salt().unwrap();
        assert_ne!(s1, s2);
        assert_ne!(key("pw", &s1), key("pw", &s2));
    }

    #[test]
    fn iteration_count_changes_the_key() {
        let salt = b"fixed-salt-bytes";
        assert_ne!(derive_key("pw", salt, 1_000), derive_key("pw", salt, 1_001));
    }

    #[test]
    fn pbkdf2_known_answer() {
        // RFC 7914 section 11, PBKDF2-HMAC-SHA256 with c = 1.
        let k = derive_key("passwd", b"salt", 1);
        let expected = [
            0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f, 0xec, 0x16, 0x91, 0xc2, 0x25, 0x44,
            0xb6, 0x05, 0xf9, 0x41, 0x85, 0x21, 0x6d, 0xde, 0x04, 0x65, 0xe6, 0x8b, 0x9d, 0x57,
            0xc2, 0x0d, 0xac, 0xbc,
        ];
        assert_eq!(k.as_bytes(), &expected);
    }

    #[test]
    fn default_iterations_roundtrip() {
        let salt = generate_salt().unwrap();
        let k = derive_key("correct horse battery staple", &salt, DEFAULT_KDF_ITERATIONS);
        let token = encrypt("value", &k).unwrap();
        assert_eq!(decrypt(&token, &k).unwrap(), "value");
    }

    #[test]
    fn decrypt_with_wrong_password_fails() {
        let salt = generate_salt().unwrap();
        let token = encrypt("s3cr3t", &key("pw1", &salt)).unwrap();

        let result = decrypt(&token, &key("pw2", &salt));
        assert!(matches!(result, Err(VaultError::DecryptionFailed { .. })));
    }

    #[test]
    fn decrypt_with_tampered_token_fails() {
        let k = key("pw", b"0123456789abcdef");
        let token = encrypt("secret data", &k).unwrap();

        let mut raw = URL_SAFE.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE.encode(raw);

        assert!(matches!(
            decrypt(&tampered, &k),
            Err(VaultError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let k = key("pw", b"0123456789abcdef");

        for bad in ["not base64 !!", "", "AAAA"] {
            assert!(
                matches!(decrypt(bad, &k), Err(VaultError::DecryptionFailed { .. })),
                "{bad:?} should fail"
            );
        }
    }

    #[test]
    fn unknown_version_is_rejected() {
        let k = key("pw", b"0123456789abcdef");
        let mut raw = URL_SAFE.decode(encrypt("x", &k).unwrap()).unwrap();
        raw[0] = 0x80;

        let err = decrypt(&URL_SAFE.encode(raw), &k).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let k = key("pw", b"0123456789abcdef");
        let token = encrypt("", &k).unwrap();
        assert_eq!(decrypt(&token, &k).unwrap(), "");
    }

    #[test]
    fn session_key_text_roundtrip() {
        let k = key("pw", b"0123456789abcdef");
        let text = k.encode();
        assert_eq!(text.len(), 44);
        assert_eq!(SessionKey::from_encoded(&text).unwrap(), k);
    }

    #[test]
    fn session_key_rejects_wrong_length() {
        let short = URL_SAFE.encode([0u8; 16]);
        assert!(matches!(
            SessionKey::from_encoded(&short),
            Err(VaultError::InvalidArgument(_))
        ));
    }

    #[test]
    fn session_key_debug_is_redacted() {
        let k = key("pw", b"0123456789abcdef");
        assert_eq!(format!("{k:?}"), "SessionKey(<redacted>)");
    }

    #[test]
    fn generated_password_uses_alphabet() {
        let pw = generate_password(12).unwrap();
        assert_eq!(pw.len(), 12);
        assert!(pw.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));

        let long = generate_password(500).unwrap();
        assert_eq!(long.len(), 500);
        assert_ne!(generate_password(32).unwrap(), generate_password(32).unwrap());
    }
}
