//! Cryptographic primitives for the Etebase authentication protocol.
//!
//! - BLAKE2b key derivation with key, salt, and personalization
//! - NaCl SecretBox (XSalsa20-Poly1305) encryption/decryption
//! - Ed25519 signature verification
//! - Random UID generation
//!
//! The key derivation and the SecretBox wire layout must match the
//! reference implementation bit for bit; existing clients derive the same
//! key from the same `(secret, salt)` pair and expect
//! `nonce(24) || tag(16) || ciphertext`.

use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::{Blake2b512, Blake2bMac, Digest};
use crypto_secretbox::aead::{AeadInPlace, KeyInit};
use crypto_secretbox::{Key, Nonce, Tag, XSalsa20Poly1305};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;
pub const SALT_SIZE: usize = 16;

/// BLAKE2b personalization for authentication challenge keys.
const PERSONALIZATION_AUTH: &[u8] = b"etebase-auth";

const UID_ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ciphertext too short to contain a nonce.
    #[error("ciphertext too short: missing nonce")]
    InvalidNonce,

    /// SecretBox authentication failed.
    #[error("decryption failed: authentication error")]
    Decryption,

    /// Ed25519 signature or key rejected.
    #[error("invalid signature")]
    InvalidSignature,

    #[error("key derivation failed")]
    KeyDerivation,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Derive the 32-byte challenge encryption key from the server secret and a
/// per-user salt.
///
/// Step 1: BLAKE2b-512 over the UTF-8 secret; the first 32 bytes become the
/// master key. Step 2: keyed BLAKE2b with the first 16 bytes of the salt
/// (zero-padded when shorter), personalization `"etebase-auth"`, 32-byte
/// output, empty input.
pub fn derive_encryption_key(secret: &str, salt: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let master = Blake2b512::digest(secret.as_bytes());

    let mut salt_bytes = [0u8; SALT_SIZE];
    let take = salt.len().min(SALT_SIZE);
    salt_bytes[..take].copy_from_slice(&salt[..take]);

    let mac = Blake2bMac::<U32>::new_with_salt_and_personal(
        &master[..KEY_SIZE],
        &salt_bytes,
        PERSONALIZATION_AUTH,
    )
    .map_err(|_| CryptoError::KeyDerivation)?;

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(mac.finalize().into_bytes().as_slice());
    Ok(key)
}

/// SecretBox encryption: `nonce(24) || tag(16) || ciphertext`.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, b"", &mut buffer)
        .map_err(|_| CryptoError::Decryption)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + buffer.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(tag.as_slice());
    out.extend_from_slice(&buffer);
    Ok(out)
}

/// SecretBox decryption of the layout produced by [`encrypt`].
pub fn decrypt(key: &[u8; KEY_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE {
        return Err(CryptoError::InvalidNonce);
    }
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Decryption);
    }

    let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
    let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
    let tag = Tag::from_slice(&ciphertext[NONCE_SIZE..NONCE_SIZE + TAG_SIZE]);

    let mut buffer = ciphertext[NONCE_SIZE + TAG_SIZE..].to_vec();
    cipher
        .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)
        .map_err(|_| CryptoError::Decryption)?;
    Ok(buffer)
}

/// Verify an Ed25519 signature. Any length mismatch or verification
/// failure is [`CryptoError::InvalidSignature`].
pub fn verify_signature(pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let pk: [u8; 32] = pubkey.try_into().map_err(|_| CryptoError::InvalidSignature)?;
    let key = VerifyingKey::from_bytes(&pk).map_err(|_| CryptoError::InvalidSignature)?;

    let sig: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig);

    key.verify(message, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

fn random_uid(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    // 256 is a multiple of the alphabet size, so the modulo is unbiased.
    bytes
        .iter()
        .map(|b| UID_ALPHABET[(b % 64) as usize] as char)
        .collect()
}

/// Random 32-char sync token UID.
pub fn generate_stoken_uid() -> String {
    random_uid(32)
}

/// Random 22-char item UID.
pub fn generate_item_uid() -> String {
    random_uid(22)
}

/// Random 40-hex auth token key.
pub fn generate_token_key() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Random 32-hex one-shot websocket ticket.
pub fn generate_ticket_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
