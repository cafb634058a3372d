//! The secure decoder: subscription processing and frame decoding.
//!
//! Both handlers follow the same discipline: randomized jitter around the
//! cryptographic steps, strict layout checks before any secret-dependent
//! work, and every security-relevant comparison repeated once behind
//! `black_box` so that a single injected fault cannot flip the outcome.

use core::hint::black_box;

use crate::buffer::SecureVec;
use crate::channel::{ChannelTable, BROADCAST_CHANNEL_ID, MAX_CHANNELS};
use crate::crypto::{
    self, AeadIv, AeadKey, AeadTag, SigBytes, VerifyKey, AEAD_IV_LEN, AEAD_KEY_LEN, AEAD_TAG_LEN,
    SIG_LEN, SIG_PUBLIC_KEY_LEN,
};
use crate::flash::{FlashPages, SubscriptionStore};
use crate::host_comms::{MAX_INPUT_BODY, MAX_OUTPUT_BODY};
use crate::reader::ByteReader;
use crate::secrets::{ProvisionedBlob, Secrets};
use crate::timer::{Clock, SystemCtx};
use crate::{DecoderError, FatalError};

/// Largest plaintext frame ever released to the host.
pub const MAX_FRAME_LEN: usize = 64;

/// Ciphertext must cover whole 16-byte blocks.
const CIPHER_BLOCK_LEN: usize = 16;

/// Decoder state: channel table, subscription storage and the handle to
/// the provisioned secrets. Secrets themselves are re-materialized per
/// command and dropped (zeroized) before the response goes out.
pub struct Decoder<'a, F: FlashPages> {
    provision: ProvisionedBlob<'a>,
    store: SubscriptionStore<F>,
    table: ChannelTable,
}

impl<'a, F: FlashPages> Decoder<'a, F> {
    /// Boot-time initialization: seeds channel 0 from the secrets and
    /// replays every subscription persisted in flash. A stored record
    /// that no longer validates means the flash was tampered with, which
    /// is fatal.
    pub fn init<C: Clock>(
        provision: ProvisionedBlob<'a>,
        flash: F,
        sys: &mut SystemCtx<C>,
    ) -> Result<Self, FatalError> {
        sys.jitter_delay();
        let secrets = Secrets::load(&provision, &mut sys.rng)?;
        let table = ChannelTable::new(&secrets.channel0_verify_key, &secrets.channel0_key);
        let mut decoder = Self {
            provision,
            store: SubscriptionStore::new(flash),
            table,
        };
        for page in 1..MAX_CHANNELS as u8 {
            if let Some(record) = decoder.store.load(page)? {
                match decoder.process_subscription(record.as_slice(), &secrets, false, sys) {
                    Ok(()) => {}
                    Err(DecoderError::Fatal(fatal)) => return Err(fatal),
                    Err(_) => return Err(FatalError::ReplayFailed),
                }
            }
        }
        Ok(decoder)
    }

    /// Handles a Subscribe command body.
    pub fn subscribe<C: Clock>(
        &mut self,
        data: &[u8],
        sys: &mut SystemCtx<C>,
    ) -> Result<(), DecoderError> {
        sys.jitter_delay();
        let secrets = Secrets::load(&self.provision, &mut sys.rng)?;
        self.process_subscription(data, &secrets, true, sys)
    }

    /// Parses, decrypts, verifies and stores one subscription message.
    /// Also used at boot to replay persisted subscriptions, in which case
    /// `save_to_flash` is false.
    fn process_subscription<C: Clock>(
        &mut self,
        data: &[u8],
        secrets: &Secrets,
        save_to_flash: bool,
        sys: &mut SystemCtx<C>,
    ) -> Result<(), DecoderError> {
        // Parse the IV, ciphertext and authentication tag.
        sys.jitter_delay();
        let mut reader = ByteReader::new(data);
        let iv = AeadIv::from_slice(reader.read_n(AEAD_IV_LEN));
        let cipher_len = reader
            .remaining()
            .checked_sub(AEAD_TAG_LEN)
            .ok_or(DecoderError::MalformedPayload)?;
        if cipher_len % CIPHER_BLOCK_LEN != 0 {
            return Err(DecoderError::BadCiphertextLength);
        }
        let ciphertext = reader.read_n(cipher_len);
        let tag = AeadTag::from_slice(reader.read_n(AEAD_TAG_LEN));
        if reader.has_error() || reader.remaining() != 0 {
            return Err(DecoderError::MalformedPayload);
        }
        let (Some(iv), Some(tag)) = (iv, tag) else {
            return Err(DecoderError::MalformedPayload);
        };

        sys.jitter_delay();
        let plaintext: SecureVec<MAX_INPUT_BODY> =
            crypto::decrypt(ciphertext, &secrets.subscription_key, &iv, &tag, &mut sys.rng)
                .ok_or(DecoderError::DecryptionFailed)?;

        // Skip the salt, then delimit and extract the signed payload.
        let plaintext_bytes = plaintext.as_slice();
        let mut reader = ByteReader::new(plaintext_bytes);
        let salt_len = reader.read_u8() as usize;
        reader.read_n(salt_len);
        let payload_start = reader.offset();
        let channel_key = AeadKey::from_slice(reader.read_n(AEAD_KEY_LEN));
        let channel_verify_key = VerifyKey::from_slice(reader.read_n(SIG_PUBLIC_KEY_LEN));
        let decoder_id = reader.read_u32();
        let start_time = reader.read_u64();
        let end_time = reader.read_u64();
        let channel_id = reader.read_u32();
        let payload_end = reader.offset();
        let signature = SigBytes::from_slice(reader.read_n(SIG_LEN));
        if reader.has_error() {
            return Err(DecoderError::MalformedPayload);
        }
        let (Some(channel_key), Some(channel_verify_key), Some(signature)) =
            (channel_key, channel_verify_key, signature)
        else {
            return Err(DecoderError::MalformedPayload);
        };

        sys.jitter_delay();
        if !crypto::verify(
            &plaintext_bytes[payload_start..payload_end],
            &secrets.subscription_verify_key,
            &signature,
        ) {
            return Err(DecoderError::BadSignature);
        }

        // Check that the contents are for us.
        if decoder_id != secrets.decoder_id {
            return Err(DecoderError::WrongDecoderId);
        }
        if channel_id == BROADCAST_CHANNEL_ID {
            return Err(DecoderError::BroadcastNotSubscribable);
        }
        sys.jitter_delay();
        // Repeat checks (anti-glitch countermeasure).
        if black_box(decoder_id != secrets.decoder_id || channel_id == BROADCAST_CHANNEL_ID) {
            return Err(DecoderError::SuspiciousActivity);
        }

        // Save the subscription to RAM and flash.
        let index = self
            .table
            .get_or_create(channel_id)
            .ok_or(DecoderError::ChannelTableFull)?;
        let channel = self.table.channel_mut(index);
        channel.set_subscription(start_time, end_time, &channel_verify_key, &channel_key);
        sys.jitter_delay();
        // Repeat assignment (anti-glitch countermeasure).
        let channel = self.table.channel_mut(index);
        channel.set_subscription(
            black_box(start_time),
            black_box(end_time),
            &channel_verify_key,
            &channel_key,
        );
        let flash_page = channel.flash_page();
        if save_to_flash {
            self.store
                .save(flash_page, data)
                .map_err(DecoderError::Fatal)?;
        }
        if self.table.last_seen_time() > end_time {
            // Valid subscription, but its window already closed.
            self.table.channel_mut(index).clear_subscription();
        }
        Ok(())
    }

    /// Handles a Decode command body, releasing the frame bytes on
    /// success.
    pub fn decode<C: Clock>(
        &mut self,
        data: &[u8],
        sys: &mut SystemCtx<C>,
    ) -> Result<SecureVec<MAX_FRAME_LEN>, DecoderError> {
        // Validate the claimed channel id from the unauthenticated prefix.
        sys.jitter_delay();
        let mut reader = ByteReader::new(data);
        let channel_id = reader.read_u32();
        if reader.has_error() {
            return Err(DecoderError::MalformedPayload);
        }
        let index = self
            .table
            .find(channel_id)
            .ok_or(DecoderError::NoSubscription)?;
        if !self.table.channel(index).is_active() {
            return Err(DecoderError::NoSubscription);
        }
        if self.table.last_seen_time() >= self.table.channel(index).end_time() {
            self.table.channel_mut(index).clear_subscription();
            return Err(DecoderError::SubscriptionExpired);
        }

        // Parse the IV, ciphertext and tag, then decrypt with the channel
        // key.
        let iv = AeadIv::from_slice(reader.read_n(AEAD_IV_LEN));
        let cipher_len = reader
            .remaining()
            .checked_sub(AEAD_TAG_LEN)
            .ok_or(DecoderError::MalformedPayload)?;
        if cipher_len % CIPHER_BLOCK_LEN != 0 {
            return Err(DecoderError::BadCiphertextLength);
        }
        let ciphertext = reader.read_n(cipher_len);
        let tag = AeadTag::from_slice(reader.read_n(AEAD_TAG_LEN));
        if reader.has_error() {
            return Err(DecoderError::MalformedPayload);
        }
        let (Some(iv), Some(tag)) = (iv, tag) else {
            return Err(DecoderError::MalformedPayload);
        };
        sys.jitter_delay();
        let plaintext: SecureVec<MAX_INPUT_BODY> = crypto::decrypt(
            ciphertext,
            self.table.channel(index).aead_key(),
            &iv,
            &tag,
            &mut sys.rng,
        )
        .ok_or(DecoderError::DecryptionFailed)?;

        // Parse the plaintext and verify the signed payload.
        let plaintext_bytes = plaintext.as_slice();
        let mut reader = ByteReader::new(plaintext_bytes);
        let salt_len = reader.read_u8() as usize;
        reader.read_n(salt_len);
        let payload_start = reader.offset();
        let inner_channel_id = reader.read_u32();
        let timestamp = reader.read_u64();
        let frame_len = reader.read_u8() as usize;
        if reader.has_error() {
            return Err(DecoderError::MalformedPayload);
        }
        if frame_len > MAX_FRAME_LEN {
            return Err(DecoderError::FrameTooLarge);
        }
        let frame = reader.read_n(frame_len);
        let payload_end = reader.offset();
        let signature =
            SigBytes::from_slice(reader.read_n(SIG_LEN)).ok_or(DecoderError::MalformedPayload)?;
        if reader.has_error() {
            return Err(DecoderError::MalformedPayload);
        }
        sys.jitter_delay();
        if !crypto::verify(
            &plaintext_bytes[payload_start..payload_end],
            self.table.channel(index).verify_key(),
            &signature,
        ) {
            return Err(DecoderError::BadSignature);
        }

        // Security checks, in order: channel binding, window, monotonicity.
        let channel = self.table.channel(index);
        let start_time = channel.start_time();
        let end_time = channel.end_time();
        let last_seen = self.table.last_seen_time();
        if inner_channel_id != channel_id {
            return Err(DecoderError::ChannelMismatch);
        }
        if timestamp < start_time {
            return Err(DecoderError::TimestampBeforeStart);
        }
        if timestamp > end_time {
            self.table.channel_mut(index).clear_subscription();
            return Err(DecoderError::SubscriptionExpired);
        }
        if timestamp <= last_seen {
            return Err(DecoderError::TimestampNotIncreasing);
        }
        sys.jitter_delay();
        // Repeat checks (anti-glitch countermeasure).
        if black_box(
            inner_channel_id != channel_id
                || timestamp < start_time
                || timestamp > end_time
                || timestamp <= last_seen,
        ) {
            return Err(DecoderError::SuspiciousActivity);
        }

        self.table.set_last_seen_time(timestamp);
        SecureVec::from_slice(frame).ok_or(DecoderError::MalformedPayload)
    }

    /// Builds the List response body: the number of channels ever
    /// subscribed (broadcast excluded), then id, start and end time for
    /// each in first-insertion order.
    pub fn list_channels(&self, out: &mut SecureVec<MAX_OUTPUT_BODY>) {
        out.clear();
        let count = self.table.nonzero().count() as u32;
        // A full table fills the body exactly; the pushes cannot overflow.
        let _ = out.push_u32_le(count);
        for channel in self.table.nonzero() {
            let _ = out.push_u32_le(channel.id());
            let _ = out.push_u64_le(channel.start_time());
            let _ = out.push_u64_le(channel.end_time());
        }
    }
}
