//! Top-level command dispatch with a constant-time response cadence.
//!
//! Each command gets exactly one response. Subscribe and Decode hold
//! their response until a fixed deadline on the command timer, minus the
//! estimated transport cost of the response itself, so the host observes
//! the same latency whether the command succeeded or why it failed.

use core::fmt::Write as _;

use embedded_io::{Read, Write};

use crate::buffer::SecureVec;
use crate::decoder::Decoder;
use crate::flash::FlashPages;
use crate::host_comms::{Console, Opcode};
use crate::timer::{Clock, SystemCtx};
use crate::{DecoderError, FatalError};

/// Deadline for a Subscribe response, measured from the command header.
const SUBSCRIBE_DEADLINE_MICROS: u64 = 450_000;
/// Deadline for a Decode response.
const DECODE_DEADLINE_MICROS: u64 = 87_000;

const UART_THROUGHPUT_BYTES_PER_SEC: u64 = 11_520;
const MICROS_PER_BYTE: u64 =
    (1_000_000 + UART_THROUGHPUT_BYTES_PER_SEC / 2) / UART_THROUGHPUT_BYTES_PER_SEC;

/// Estimated round-trip cost in microseconds of answering with a body of
/// `body_len` bytes: the command header, the response header and its ACK,
/// plus the response payload and its ACK when a payload is present.
fn estimate_io_micros(body_len: usize) -> u64 {
    let payload_ack: u64 = if body_len > 0 { 4 } else { 0 };
    (body_len as u64 + 4 + 4 + 4 + payload_ack) * MICROS_PER_BYTE
}

/// Reads one command, handles it, and writes exactly one response.
/// Recoverable rejections become empty `E` responses; fatal faults abort
/// the command and propagate.
pub fn run_command<T, C, F>(
    console: &mut Console<T>,
    decoder: &mut Decoder<'_, F>,
    sys: &mut SystemCtx<C>,
) -> Result<(), FatalError>
where
    T: Read + Write,
    C: Clock,
    F: FlashPages,
{
    let command = console.read_command(&sys.clock)?;
    match command.opcode {
        Opcode::List => {
            let mut body = SecureVec::new();
            decoder.list_channels(&mut body);
            console.write_response(Opcode::List, body.as_slice())?;
        }
        Opcode::Subscribe => {
            let result = decoder.subscribe(command.body.as_slice(), sys);
            let result = report(console, result)?;
            command.timer.wait_until_elapsed_micros(
                &sys.clock,
                SUBSCRIBE_DEADLINE_MICROS.saturating_sub(estimate_io_micros(0)),
            );
            match result {
                Ok(()) => console.write_response(Opcode::Subscribe, &[])?,
                Err(_) => console.write_response(Opcode::Error, &[])?,
            }
        }
        Opcode::Decode => {
            let result = decoder.decode(command.body.as_slice(), sys);
            let result = report(console, result)?;
            let response_len = result.as_ref().map_or(0, |frame| frame.len());
            command.timer.wait_until_elapsed_micros(
                &sys.clock,
                DECODE_DEADLINE_MICROS.saturating_sub(estimate_io_micros(response_len)),
            );
            match result {
                Ok(frame) => console.write_response(Opcode::Decode, frame.as_slice())?,
                Err(_) => console.write_response(Opcode::Error, &[])?,
            }
        }
        _ => {
            console.write_response(Opcode::Error, &[])?;
        }
    }
    Ok(())
}

/// Services commands until a fatal fault occurs. The platform layer
/// reboots on return (or blinks and prints in development builds).
pub fn run_loop<T, C, F>(
    console: &mut Console<T>,
    decoder: &mut Decoder<'_, F>,
    sys: &mut SystemCtx<C>,
) -> FatalError
where
    T: Read + Write,
    C: Clock,
    F: FlashPages,
{
    loop {
        if let Err(fatal) = run_command(console, decoder, sys) {
            return fatal;
        }
    }
}

/// Splits fatal faults out of a handler result; recoverable rejections
/// are surfaced on the debug channel and handed back for the `E` path.
fn report<T, V>(
    console: &mut Console<T>,
    result: Result<V, DecoderError>,
) -> Result<Result<V, DecoderError>, FatalError>
where
    T: Read + Write,
{
    match result {
        Err(DecoderError::Fatal(fatal)) => Err(fatal),
        Err(error) => {
            let mut text: heapless::String<96> = heapless::String::new();
            let _ = write!(text, "{error}");
            console.write_debug(&text)?;
            Ok(Err(error))
        }
        Ok(value) => Ok(Ok(value)),
    }
}
