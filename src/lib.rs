//! Secure satellite-TV frame decoder core.
//!
//! The decoder receives commands over a framed serial link, maintains
//! per-channel subscription state, and authenticates and decrypts frames
//! whose timestamps must be strictly increasing. Board bring-up, the flash
//! page driver, the serial peripheral, the hardware entropy source and the
//! microsecond counter are platform collaborators consumed through the
//! narrow traits in [`flash`], [`host_comms`], [`rand`] and [`timer`].
//!
//! The expected boot sequence on hardware is: clocks and RTC up, ~0.3 s
//! delay, transport and randomness up, [`decoder::Decoder::init`], delay
//! until 0.9 s after reset, then [`cmd_logic::run_loop`].

#![no_std]

#[cfg(test)]
extern crate std;

pub mod buffer;
pub mod channel;
pub mod cmd_logic;
pub mod crypto;
pub mod decoder;
pub mod flash;
pub mod host_comms;
pub mod rand;
pub mod reader;
pub mod secrets;
pub mod timer;

use core::fmt::Display;

/// Reasons a command is rejected. All of these resolve to an empty `E`
/// response; the reason itself is only surfaced on the debug channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderError {
    /// A field extraction ran short or trailing bytes were left over.
    MalformedPayload,
    /// Ciphertext length is not a multiple of the cipher block granularity.
    BadCiphertextLength,
    /// AEAD tag mismatch.
    DecryptionFailed,
    /// Ed25519 signature did not verify.
    BadSignature,
    /// Subscription names another decoder.
    WrongDecoderId,
    /// Subscription targets the broadcast channel.
    BroadcastNotSubscribable,
    /// All subscribable channel slots are taken.
    ChannelTableFull,
    /// Frame names a channel with no active subscription.
    NoSubscription,
    /// The channel's subscription window has ended.
    SubscriptionExpired,
    /// Frame payload claims more than the maximum frame length.
    FrameTooLarge,
    /// Authenticated channel id disagrees with the claimed one.
    ChannelMismatch,
    /// Frame timestamp predates the subscription window.
    TimestampBeforeStart,
    /// Frame timestamp does not exceed the last decoded timestamp.
    TimestampNotIncreasing,
    /// A repeated validity check disagreed with the first run.
    SuspiciousActivity,
    /// Unrecoverable fault; aborts the command and the run loop.
    Fatal(FatalError),
}

/// Faults that cannot be answered with an `E` response. The platform layer
/// reacts by rebooting (release) or entering its blink-and-print loop
/// (debug builds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// The provisioned secrets blob failed to parse or decrypt.
    SecretsCorrupted,
    /// A persisted subscription failed to replay at boot.
    ReplayFailed,
    /// The flash driver reported a hardware error.
    FlashFault,
    /// A stored record carries an impossible length.
    StorageCorrupted,
    /// The serial transport failed mid-frame.
    TransportFault,
}

impl From<FatalError> for DecoderError {
    fn from(fatal: FatalError) -> Self {
        Self::Fatal(fatal)
    }
}

impl Display for DecoderError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MalformedPayload => write!(f, "malformed or truncated payload"),
            Self::BadCiphertextLength => {
                write!(f, "ciphertext length is not a multiple of 16")
            }
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::BadSignature => write!(f, "signature verification failed"),
            Self::WrongDecoderId => write!(f, "subscription is for a different decoder"),
            Self::BroadcastNotSubscribable => write!(f, "cannot subscribe to channel 0"),
            Self::ChannelTableFull => write!(f, "no space for new channel"),
            Self::NoSubscription => write!(f, "no active subscription for channel"),
            Self::SubscriptionExpired => write!(f, "subscription expired"),
            Self::FrameTooLarge => write!(f, "frame is larger than 64 bytes"),
            Self::ChannelMismatch => write!(f, "channel id mismatch"),
            Self::TimestampBeforeStart => {
                write!(f, "timestamp is before subscription start time")
            }
            Self::TimestampNotIncreasing => write!(f, "timestamp not increasing"),
            Self::SuspiciousActivity => write!(f, "suspicious activity detected"),
            Self::Fatal(fatal) => write!(f, "fatal: {fatal}"),
        }
    }
}

impl Display for FatalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::SecretsCorrupted => write!(f, "failed to decrypt provisioned secrets"),
            Self::ReplayFailed => write!(f, "failed to load subscription data from flash"),
            Self::FlashFault => write!(f, "flash hardware fault"),
            Self::StorageCorrupted => write!(f, "stored subscription record is corrupted"),
            Self::TransportFault => write!(f, "serial transport fault"),
        }
    }
}
