//! Framed message bus over the serial link.
//!
//! Every frame is `'%' | opcode | u16 body_len_LE | body`, with bodies
//! moving in chunks of at most 256 bytes and the peer acknowledging each
//! header and chunk with an empty `A` frame. The byte transport itself is
//! a platform collaborator reached through the [`embedded_io`] traits.

use embedded_io::{Read, Write};

use crate::buffer::SecureVec;
use crate::timer::{Clock, CommandTimer};
use crate::FatalError;

/// Largest command body the decoder accepts. Longer bodies are drained
/// and treated as empty.
pub const MAX_INPUT_BODY: usize = 224;
/// Largest response body the decoder emits.
pub const MAX_OUTPUT_BODY: usize = 164;

const CHUNK_SIZE: usize = 256;
const FRAME_MAGIC: u8 = b'%';

// Bodies this size always fit a single chunk, so responses need exactly
// one payload ACK.
const _: () = assert!(MAX_INPUT_BODY <= CHUNK_SIZE);
const _: () = assert!(MAX_OUTPUT_BODY <= CHUNK_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Decode,
    Subscribe,
    List,
    Ack,
    Error,
    Debug,
    Unknown,
}

impl Opcode {
    fn from_byte(byte: u8) -> Self {
        match byte {
            b'D' => Self::Decode,
            b'S' => Self::Subscribe,
            b'L' => Self::List,
            b'A' => Self::Ack,
            b'E' => Self::Error,
            b'G' => Self::Debug,
            _ => Self::Unknown,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Decode => b'D',
            Self::Subscribe => b'S',
            Self::List => b'L',
            Self::Ack => b'A',
            Self::Error => b'E',
            Self::Debug => b'G',
            Self::Unknown => b'E',
        }
    }
}

/// One received command plus the timer that started the moment its
/// header arrived; the dispatcher holds response deadlines against it.
pub struct Command {
    pub opcode: Opcode,
    pub body: SecureVec<MAX_INPUT_BODY>,
    pub timer: CommandTimer,
}

/// Console endpoint of the message bus. Debug traffic is dropped unless
/// explicitly enabled, mirroring a development-build switch.
pub struct Console<T> {
    io: T,
    debug: bool,
}

impl<T: Read + Write> Console<T> {
    pub fn new(io: T) -> Self {
        Self { io, debug: false }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Reads one command frame. The command timer is started as soon as
    /// the header is in; the body follows chunk-ACK rules. Bodies longer
    /// than [`MAX_INPUT_BODY`] are read, acknowledged and discarded, and
    /// the command proceeds as if it had no body.
    pub fn read_command<C: Clock>(&mut self, clock: &C) -> Result<Command, FatalError> {
        let (opcode, length) = self.read_header()?;
        let timer = CommandTimer::start(clock);
        self.write_ack()?;

        let length = length as usize;
        let mut body = SecureVec::new();
        if length == 0 {
            return Ok(Command {
                opcode,
                body,
                timer,
            });
        }
        if length > MAX_INPUT_BODY {
            for _ in 0..length / CHUNK_SIZE {
                self.skip_bytes(CHUNK_SIZE)?;
                self.write_ack()?;
            }
            if length % CHUNK_SIZE > 0 {
                self.skip_bytes(length % CHUNK_SIZE)?;
                self.write_ack()?;
            }
            return Ok(Command {
                opcode,
                body,
                timer,
            });
        }
        // Body was bounds-checked against the capacity above.
        let _ = body.resize(length);
        self.io
            .read_exact(body.as_mut_slice())
            .map_err(|_| FatalError::TransportFault)?;
        self.write_ack()?;
        Ok(Command {
            opcode,
            body,
            timer,
        })
    }

    /// Writes a response frame and waits for the peer's ACKs. A peer that
    /// answers something other than an ACK abandons the response; that is
    /// not an error of ours.
    pub fn write_response(&mut self, opcode: Opcode, body: &[u8]) -> Result<(), FatalError> {
        debug_assert!(body.len() <= MAX_OUTPUT_BODY);
        self.write_frame_header(opcode, body.len() as u16)?;
        if !self.read_ack()? {
            return Ok(());
        }
        if !body.is_empty() {
            self.io
                .write_all(body)
                .map_err(|_| FatalError::TransportFault)?;
            self.read_ack()?;
        }
        Ok(())
    }

    /// Emits a `G` frame. Debug frames bypass the ACK protocol entirely
    /// and are suppressed unless debug output is enabled.
    pub fn write_debug(&mut self, message: &str) -> Result<(), FatalError> {
        if !self.debug {
            return Ok(());
        }
        self.write_frame_header(Opcode::Debug, message.len() as u16)?;
        self.io
            .write_all(message.as_bytes())
            .map_err(|_| FatalError::TransportFault)
    }

    fn read_byte(&mut self) -> Result<u8, FatalError> {
        let mut byte = [0u8; 1];
        self.io
            .read_exact(&mut byte)
            .map_err(|_| FatalError::TransportFault)?;
        Ok(byte[0])
    }

    fn skip_bytes(&mut self, count: usize) -> Result<(), FatalError> {
        for _ in 0..count {
            self.read_byte()?;
        }
        Ok(())
    }

    /// Scans to the next `%` and returns the opcode and body length.
    fn read_header(&mut self) -> Result<(Opcode, u16), FatalError> {
        while self.read_byte()? != FRAME_MAGIC {}
        let opcode = Opcode::from_byte(self.read_byte()?);
        let mut length = [0u8; 2];
        self.io
            .read_exact(&mut length)
            .map_err(|_| FatalError::TransportFault)?;
        Ok((opcode, u16::from_le_bytes(length)))
    }

    fn write_frame_header(&mut self, opcode: Opcode, length: u16) -> Result<(), FatalError> {
        let mut header = [0u8; 4];
        header[0] = FRAME_MAGIC;
        header[1] = opcode.to_byte();
        header[2..].copy_from_slice(&length.to_le_bytes());
        self.io
            .write_all(&header)
            .map_err(|_| FatalError::TransportFault)
    }

    fn write_ack(&mut self) -> Result<(), FatalError> {
        self.write_frame_header(Opcode::Ack, 0)
    }

    fn read_ack(&mut self) -> Result<bool, FatalError> {
        let (opcode, _) = self.read_header()?;
        Ok(opcode == Opcode::Ack)
    }
}
