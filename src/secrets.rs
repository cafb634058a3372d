//! Loader for the device-provisioned secrets blob.
//!
//! The blob is encrypted with a device-unique wrapping key at provisioning
//! time. Secrets are re-materialized for each command that needs them and
//! every field zeroizes on release; nothing long-lived holds key material
//! outside the channel table.

use crate::buffer::SecureVec;
use crate::crypto::{
    self, AeadIv, AeadKey, AeadTag, VerifyKey, AEAD_KEY_LEN, AEAD_TAG_LEN, SIG_PUBLIC_KEY_LEN,
};
use crate::rand::FastRng;
use crate::reader::ByteReader;
use crate::FatalError;

/// Material handed over by the platform: the device-unique wrapping key,
/// its IV, and the encrypted blob written at provisioning time.
///
/// Blob layout: `u8 skip_len | skip_len padding bytes | u16 ciphertext_len
/// | ciphertext | 16-byte tag`.
pub struct ProvisionedBlob<'a> {
    pub wrap_key: &'a [u8; AEAD_KEY_LEN],
    pub iv: &'a [u8; crypto::AEAD_IV_LEN],
    pub data: &'a [u8],
}

const MAX_SECRETS_PLAINTEXT: usize = 256;

/// Decoder identity and long-term keys.
pub struct Secrets {
    pub decoder_id: u32,
    pub channel0_key: AeadKey,
    pub channel0_verify_key: VerifyKey,
    pub subscription_key: AeadKey,
    pub subscription_verify_key: VerifyKey,
}

impl Secrets {
    /// Decrypts and parses the provisioned blob. Any underflow or tag
    /// failure means the device has been tampered with and is fatal.
    pub fn load(blob: &ProvisionedBlob<'_>, rng: &mut FastRng) -> Result<Self, FatalError> {
        let mut reader = ByteReader::new(blob.data);
        let skip_len = reader.read_u8() as usize;
        reader.read_n(skip_len);
        let ciphertext_len = reader.read_u16() as usize;
        let ciphertext = reader.read_n(ciphertext_len);
        let tag =
            AeadTag::from_slice(reader.read_n(AEAD_TAG_LEN)).ok_or(FatalError::SecretsCorrupted)?;
        if reader.has_error() {
            return Err(FatalError::SecretsCorrupted);
        }

        let wrap_key = AeadKey::from(*blob.wrap_key);
        let iv = AeadIv::from(*blob.iv);
        let plaintext: SecureVec<MAX_SECRETS_PLAINTEXT> =
            crypto::decrypt(ciphertext, &wrap_key, &iv, &tag, rng)
                .ok_or(FatalError::SecretsCorrupted)?;

        let mut reader = ByteReader::new(plaintext.as_slice());
        let decoder_id = reader.read_u32();
        let channel0_key =
            AeadKey::from_slice(reader.read_n(AEAD_KEY_LEN)).ok_or(FatalError::SecretsCorrupted)?;
        let channel0_verify_key = VerifyKey::from_slice(reader.read_n(SIG_PUBLIC_KEY_LEN))
            .ok_or(FatalError::SecretsCorrupted)?;
        let subscription_key =
            AeadKey::from_slice(reader.read_n(AEAD_KEY_LEN)).ok_or(FatalError::SecretsCorrupted)?;
        let subscription_verify_key = VerifyKey::from_slice(reader.read_n(SIG_PUBLIC_KEY_LEN))
            .ok_or(FatalError::SecretsCorrupted)?;
        if reader.has_error() {
            return Err(FatalError::SecretsCorrupted);
        }

        Ok(Self {
            decoder_id,
            channel0_key,
            channel0_verify_key,
            subscription_key,
            subscription_verify_key,
        })
    }
}
