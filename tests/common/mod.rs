//! Mock platform and host-side message builders shared by the
//! integration tests.
//!
//! The mock serial port plays the host side of the message bus: it
//! auto-acknowledges every response header and payload chunk the decoder
//! emits, exactly like the real host tools. The mock clock advances one
//! microsecond per reading so busy-wait deadlines terminate.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::vec::Vec;

use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, KeyInit};
use ed25519_dalek::{Signer, SigningKey};

use sat_decoder::cmd_logic;
use sat_decoder::decoder::Decoder;
use sat_decoder::flash::{FlashError, FlashPages};
use sat_decoder::host_comms::Console;
use sat_decoder::rand::EntropySource;
use sat_decoder::secrets::ProvisionedBlob;
use sat_decoder::timer::{Clock, SystemCtx};
use sat_decoder::FatalError;

pub const DECODER_ID: u32 = 0xDEC0_DE01;
pub const WRAP_KEY: [u8; 32] = [0x77; 32];
pub const WRAP_IV: [u8; 12] = [0x88; 12];
pub const CHANNEL0_KEY: [u8; 32] = [0x10; 32];
pub const SUBSCRIPTION_KEY: [u8; 32] = [0x20; 32];

pub fn channel0_signing() -> SigningKey {
    SigningKey::from_bytes(&[0x30; 32])
}

pub fn subscription_signing() -> SigningKey {
    SigningKey::from_bytes(&[0x40; 32])
}

/// Per-channel credentials as the broadcaster would hold them.
pub struct ChannelCreds {
    pub aead_key: [u8; 32],
    pub signing: SigningKey,
}

impl ChannelCreds {
    pub fn new(seed: u8) -> Self {
        Self {
            aead_key: [seed; 32],
            signing: SigningKey::from_bytes(&[seed ^ 0xFF; 32]),
        }
    }

    pub fn broadcast() -> Self {
        Self {
            aead_key: CHANNEL0_KEY,
            signing: channel0_signing(),
        }
    }
}

pub fn aead_encrypt(key: &[u8; 32], iv: &[u8; 12], plaintext: &[u8]) -> (Vec<u8>, [u8; 16]) {
    let cipher = ChaCha20Poly1305::new(key.into());
    let mut ciphertext = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&(*iv).into(), &[], &mut ciphertext)
        .unwrap();
    (ciphertext, tag.into())
}

/// Salt length that pads a `1 + payload + 64` plaintext to whole 16-byte
/// blocks, as the broadcaster's encoder does.
fn salt_len_for(payload_len: usize) -> usize {
    (16 - (1 + payload_len + 64) % 16) % 16
}

pub fn secrets_blob() -> Vec<u8> {
    let mut plaintext = Vec::new();
    plaintext.extend_from_slice(&DECODER_ID.to_le_bytes());
    plaintext.extend_from_slice(&CHANNEL0_KEY);
    plaintext.extend_from_slice(&channel0_signing().verifying_key().to_bytes());
    plaintext.extend_from_slice(&SUBSCRIPTION_KEY);
    plaintext.extend_from_slice(&subscription_signing().verifying_key().to_bytes());
    let (ciphertext, tag) = aead_encrypt(&WRAP_KEY, &WRAP_IV, &plaintext);

    let mut blob = vec![4u8, 0xEE, 0xEE, 0xEE, 0xEE];
    blob.extend_from_slice(&(ciphertext.len() as u16).to_le_bytes());
    blob.extend_from_slice(&ciphertext);
    blob.extend_from_slice(&tag);
    blob
}

pub fn provision() -> ProvisionedBlob<'static> {
    ProvisionedBlob {
        wrap_key: &WRAP_KEY,
        iv: &WRAP_IV,
        data: Box::leak(secrets_blob().into_boxed_slice()),
    }
}

/// An encrypted, signed subscription message binding `channel_id` to
/// `decoder_id` for `[start, end]` with the channel's credentials.
pub fn subscription_message(
    creds: &ChannelCreds,
    decoder_id: u32,
    start: u64,
    end: u64,
    channel_id: u32,
) -> Vec<u8> {
    subscription_message_signed_by(&subscription_signing(), creds, decoder_id, start, end, channel_id)
}

/// Same as [`subscription_message`] but signed with an arbitrary key, for
/// exercising signature rejection.
pub fn subscription_message_signed_by(
    signer: &SigningKey,
    creds: &ChannelCreds,
    decoder_id: u32,
    start: u64,
    end: u64,
    channel_id: u32,
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&creds.aead_key);
    payload.extend_from_slice(&creds.signing.verifying_key().to_bytes());
    payload.extend_from_slice(&decoder_id.to_le_bytes());
    payload.extend_from_slice(&start.to_le_bytes());
    payload.extend_from_slice(&end.to_le_bytes());
    payload.extend_from_slice(&channel_id.to_le_bytes());
    let signature = signer.sign(&payload);

    let salt_len = salt_len_for(payload.len());
    let mut plaintext = vec![salt_len as u8];
    plaintext.extend_from_slice(&vec![0x5Au8; salt_len]);
    plaintext.extend_from_slice(&payload);
    plaintext.extend_from_slice(&signature.to_bytes());

    let mut iv = [0u8; 12];
    iv[..4].copy_from_slice(&channel_id.to_le_bytes());
    iv[4..8].copy_from_slice(&(start as u32).to_le_bytes());
    let (ciphertext, tag) = aead_encrypt(&SUBSCRIPTION_KEY, &iv, &plaintext);

    let mut message = iv.to_vec();
    message.extend_from_slice(&ciphertext);
    message.extend_from_slice(&tag);
    message
}

/// A Decode command body: outer channel id, then the encrypted and signed
/// frame.
pub fn frame_message(
    creds: &ChannelCreds,
    outer_channel_id: u32,
    inner_channel_id: u32,
    timestamp: u64,
    frame: &[u8],
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&inner_channel_id.to_le_bytes());
    payload.extend_from_slice(&timestamp.to_le_bytes());
    payload.push(frame.len() as u8);
    payload.extend_from_slice(frame);
    let signature = creds.signing.sign(&payload);

    let salt_len = salt_len_for(payload.len());
    let mut plaintext = vec![salt_len as u8];
    plaintext.extend_from_slice(&vec![0xA5u8; salt_len]);
    plaintext.extend_from_slice(&payload);
    plaintext.extend_from_slice(&signature.to_bytes());

    let mut iv = [0u8; 12];
    iv[..8].copy_from_slice(&timestamp.to_le_bytes());
    iv[8..].copy_from_slice(&inner_channel_id.to_le_bytes());
    let (ciphertext, tag) = aead_encrypt(&creds.aead_key, &iv, &plaintext);

    let mut body = outer_channel_id.to_le_bytes().to_vec();
    body.extend_from_slice(&iv);
    body.extend_from_slice(&ciphertext);
    body.extend_from_slice(&tag);
    body
}

/// Microsecond counter that advances by one on every reading.
pub struct MockClock {
    now: Cell<u64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { now: Cell::new(0) }
    }

    /// Current value without advancing.
    pub fn peek(&self) -> u64 {
        self.now.get()
    }
}

impl Clock for MockClock {
    fn now_micros(&self) -> u64 {
        let now = self.now.get() + 1;
        self.now.set(now);
        now
    }
}

pub struct MockEntropy(pub u32);

impl EntropySource for MockEntropy {
    fn random_u32(&mut self) -> u32 {
        self.0
    }
}

pub const FLASH_PAGE_SIZE: usize = 512;

pub struct MockFlash {
    pages: Vec<[u8; FLASH_PAGE_SIZE]>,
}

impl MockFlash {
    pub fn new() -> Self {
        Self {
            pages: vec![[0xFF; FLASH_PAGE_SIZE]; 9],
        }
    }

    pub fn flip_byte(&mut self, page: usize, offset: usize) {
        self.pages[page][offset] ^= 0x01;
    }
}

impl FlashPages for MockFlash {
    fn read(&self, page: u8, offset: usize, out: &mut [u8]) -> Result<(), FlashError> {
        let page = self.pages.get(page as usize).ok_or(FlashError)?;
        let end = offset.checked_add(out.len()).ok_or(FlashError)?;
        out.copy_from_slice(page.get(offset..end).ok_or(FlashError)?);
        Ok(())
    }

    fn write_page(&mut self, page: u8, data: &[u8]) -> Result<(), FlashError> {
        let page = self.pages.get_mut(page as usize).ok_or(FlashError)?;
        page.fill(0xFF);
        page.get_mut(..data.len())
            .ok_or(FlashError)?
            .copy_from_slice(data);
        Ok(())
    }
}

/// Host side of the serial link. Outgoing decoder frames are parsed as
/// they appear and every response header/payload gets an `A` frame queued
/// ahead of any unread input, which is exactly when the decoder expects
/// it.
pub struct MockSerial {
    input: VecDeque<u8>,
    output: Vec<u8>,
    scan: usize,
    header_acked: bool,
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            output: Vec::new(),
            scan: 0,
            header_acked: false,
        }
    }

    /// Queues a command frame (header immediately followed by the body).
    pub fn push_command(&mut self, opcode: u8, body: &[u8]) {
        self.input.push_back(b'%');
        self.input.push_back(opcode);
        self.input
            .extend((body.len() as u16).to_le_bytes().iter().copied());
        self.input.extend(body.iter().copied());
    }

    /// All non-ACK frames the decoder has written, oldest first. Resets
    /// the capture.
    pub fn take_responses(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos + 4 <= self.output.len() {
            let opcode = self.output[pos + 1];
            let length =
                u16::from_le_bytes([self.output[pos + 2], self.output[pos + 3]]) as usize;
            let body = self.output[pos + 4..pos + 4 + length].to_vec();
            if opcode != b'A' {
                frames.push((opcode, body));
            }
            pos += 4 + length;
        }
        self.output.clear();
        self.scan = 0;
        self.header_acked = false;
        frames
    }

    fn queue_ack(&mut self) {
        // Acks must be served before any queued command bytes.
        self.input.push_front(0);
        self.input.push_front(0);
        self.input.push_front(b'A');
        self.input.push_front(b'%');
    }

    fn pump_acks(&mut self) {
        loop {
            if self.output.len() < self.scan + 4 {
                return;
            }
            let opcode = self.output[self.scan + 1];
            let length =
                u16::from_le_bytes([self.output[self.scan + 2], self.output[self.scan + 3]])
                    as usize;
            match opcode {
                b'A' => self.scan += 4,
                b'G' => {
                    if self.output.len() < self.scan + 4 + length {
                        return;
                    }
                    self.scan += 4 + length;
                }
                _ => {
                    if !self.header_acked {
                        self.header_acked = true;
                        self.queue_ack();
                    }
                    if length == 0 {
                        self.scan += 4;
                        self.header_acked = false;
                    } else if self.output.len() >= self.scan + 4 + length {
                        self.scan += 4 + length;
                        self.header_acked = false;
                        self.queue_ack();
                    } else {
                        return;
                    }
                }
            }
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = core::convert::Infallible;
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.pump_acks();
        let mut count = 0;
        while count < buf.len() {
            match self.input.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Boots a decoder over the given flash, as the platform entry sequence
/// would after clocks, transport and randomness are up.
pub fn try_boot(
    flash: &mut MockFlash,
) -> Result<(Decoder<'static, &mut MockFlash>, SystemCtx<MockClock>), FatalError> {
    let mut entropy = MockEntropy(0x1357_9BDF);
    let mut sys = SystemCtx::new(MockClock::new(), &mut entropy);
    let decoder = Decoder::init(provision(), flash, &mut sys)?;
    Ok((decoder, sys))
}

pub fn boot(flash: &mut MockFlash) -> (Decoder<'static, &mut MockFlash>, SystemCtx<MockClock>) {
    try_boot(flash).unwrap()
}

/// Runs one command through the dispatcher.
pub fn run_one<F: FlashPages>(
    serial: &mut MockSerial,
    decoder: &mut Decoder<'_, F>,
    sys: &mut SystemCtx<MockClock>,
) {
    let mut console = Console::new(&mut *serial);
    cmd_logic::run_command(&mut console, decoder, sys).unwrap();
}

/// Queues a command, runs it, and returns the single response frame.
pub fn issue<F: FlashPages>(
    serial: &mut MockSerial,
    decoder: &mut Decoder<'_, F>,
    sys: &mut SystemCtx<MockClock>,
    opcode: u8,
    body: &[u8],
) -> (u8, Vec<u8>) {
    serial.push_command(opcode, body);
    run_one(serial, decoder, sys);
    let mut frames = serial.take_responses();
    assert_eq!(frames.len(), 1, "expected exactly one response frame");
    frames.remove(0)
}

/// Decodes a List response body into (id, start, end) rows.
pub fn parse_list(body: &[u8]) -> Vec<(u32, u64, u64)> {
    let count = u32::from_le_bytes(body[..4].try_into().unwrap()) as usize;
    let mut rows = Vec::new();
    let mut pos = 4;
    for _ in 0..count {
        let id = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
        let start = u64::from_le_bytes(body[pos + 4..pos + 12].try_into().unwrap());
        let end = u64::from_le_bytes(body[pos + 12..pos + 20].try_into().unwrap());
        rows.push((id, start, end));
        pos += 20;
    }
    assert_eq!(pos, body.len(), "trailing bytes in List body");
    rows
}
