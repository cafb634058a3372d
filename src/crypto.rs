//! Cryptographic wrappers hardened against side-channel probing.
//!
//! Decryption is ChaCha20-Poly1305 with empty associated data. Every real
//! decryption is bracketed by two decoy decryptions keyed from the fast
//! PRNG, masking the power and timing signature of the real operation.
//! Signature verification takes raw 32-byte Ed25519 public keys.

use core::hint::black_box;

use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, KeyInit};
use ed25519_dalek::{Signature, VerifyingKey};
use rand::RngCore;

use crate::buffer::{SecureArray, SecureVec};
use crate::rand::FastRng;

pub const AEAD_KEY_LEN: usize = 32;
pub const AEAD_IV_LEN: usize = 12;
pub const AEAD_TAG_LEN: usize = 16;
pub const SIG_PUBLIC_KEY_LEN: usize = 32;
pub const SIG_LEN: usize = 64;

/// ChaCha20-Poly1305 key in raw format.
pub type AeadKey = SecureArray<AEAD_KEY_LEN>;
/// ChaCha20-Poly1305 initialization vector.
pub type AeadIv = SecureArray<AEAD_IV_LEN>;
/// ChaCha20-Poly1305 authentication tag.
pub type AeadTag = SecureArray<AEAD_TAG_LEN>;
/// Ed25519 public key in raw format.
pub type VerifyKey = SecureArray<SIG_PUBLIC_KEY_LEN>;
/// Ed25519 message signature.
pub type SigBytes = SecureArray<SIG_LEN>;

/// Decrypts `ciphertext` with `key`, returning the plaintext or `None` on
/// tag mismatch. The plaintext has the same length as the ciphertext.
///
/// Decoy decryptions run immediately before and after the real one, with
/// fresh PRNG keys and the caller's IV/ciphertext/tag; their results are
/// sunk through `black_box` so they cannot be optimized away.
pub fn decrypt<const N: usize>(
    ciphertext: &[u8],
    key: &AeadKey,
    iv: &AeadIv,
    tag: &AeadTag,
    rng: &mut FastRng,
) -> Option<SecureVec<N>> {
    let mut plaintext: SecureVec<N> = SecureVec::from_slice(ciphertext)?;

    decoy_decrypt::<N>(ciphertext, iv, tag, rng);
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let accepted = cipher
        .decrypt_in_place_detached(
            &(*iv.as_bytes()).into(),
            &[],
            plaintext.as_mut_slice(),
            &(*tag.as_bytes()).into(),
        )
        .is_ok();
    decoy_decrypt::<N>(ciphertext, iv, tag, rng);

    if accepted {
        Some(plaintext)
    } else {
        None
    }
}

fn decoy_decrypt<const N: usize>(ciphertext: &[u8], iv: &AeadIv, tag: &AeadTag, rng: &mut FastRng) {
    let mut decoy_key = AeadKey::zeroed();
    rng.fill_bytes(decoy_key.as_bytes_mut());
    let Some(mut scratch) = SecureVec::<N>::from_slice(ciphertext) else {
        return;
    };
    let cipher = ChaCha20Poly1305::new(decoy_key.as_bytes().into());
    let outcome = cipher.decrypt_in_place_detached(
        &(*iv.as_bytes()).into(),
        &[],
        scratch.as_mut_slice(),
        &(*tag.as_bytes()).into(),
    );
    black_box(outcome.is_ok());
    black_box(scratch.as_slice().first().copied());
}

/// True when `signature` over `message` verifies under the raw Ed25519
/// public key. A key that does not decode as a curve point counts as a
/// verification failure.
pub fn verify(message: &[u8], key: &VerifyKey, signature: &SigBytes) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(key.as_bytes()) else {
        return false;
    };
    let signature = Signature::from_bytes(signature.as_bytes());
    verifying_key.verify_strict(message, &signature).is_ok()
}
