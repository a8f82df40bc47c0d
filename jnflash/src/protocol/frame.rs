//! JN5169 monitor frame codec.
//!
//! ## Request Format
//!
//! ```text
//! +--------+-----+--------------------+---------------+----------+
//! | Length | CMD |        Args        |    Payload    | Checksum |
//! +--------+-----+--------------------+---------------+----------+
//! | 1 byte | 1   | 4 (program) 1 (erase) |  variable  | 1 byte   |
//! +--------+-----+--------------------+---------------+----------+
//! ```
//!
//! `Length` counts every byte after itself, checksum included. The checksum
//! is the XOR of all preceding bytes, so a well-formed frame XORs to zero.
//!
//! ## Response Format
//!
//! Always 4 bytes: `[length, command echo, status, checksum]`.

use {
    crate::error::{Error, Result, Stage},
    byteorder::{LittleEndian, WriteBytesExt},
};

/// Flash program request command code.
pub const CMD_FLASH_PRG_REQ: u8 = 0x09;

/// Sector erase request command code.
pub const CMD_SECTOR_ERASE_REQ: u8 = 0x0D;

/// Status byte reported for a successful command.
pub const CMD_SUCCESSFUL: u8 = 0x00;

/// Size of every response frame.
pub const RESPONSE_LEN: usize = 4;

/// Largest payload that still fits the one-byte length field.
pub const MAX_PAYLOAD: usize = u8::MAX as usize - 6;

/// Monitor request commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Program bytes at a flash address.
    FlashProgram = CMD_FLASH_PRG_REQ,
    /// Erase one sector.
    SectorErase = CMD_SECTOR_ERASE_REQ,
}

/// XOR of all bytes, in frame order.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0, |acc, b| acc ^ b)
}

/// Build a raw request frame.
///
/// The length byte is laid down before the checksum is folded over the
/// frame, so the checksum covers it.
pub fn build_request(command: Command, args: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    if args.len() + payload.len() > MAX_PAYLOAD + 4 {
        return Err(Error::Protocol(format!(
            "{} argument/payload bytes do not fit a single frame",
            args.len() + payload.len()
        )));
    }
    Ok(encode(command, args, payload))
}

#[allow(clippy::cast_possible_truncation)]
fn encode(command: Command, args: &[u8], payload: &[u8]) -> Vec<u8> {
    // CMD + args + payload + checksum; bounded by the callers
    let len = 1 + args.len() + payload.len() + 1;
    let mut buf = Vec::with_capacity(len + 1);

    buf.push(len as u8);
    buf.push(command as u8);
    buf.extend_from_slice(args);
    buf.extend_from_slice(payload);

    let cs = checksum(&buf);
    buf.push(cs);
    buf
}

/// Command frame builder.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    cmd: Command,
    args: Vec<u8>,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create a program request writing `payload` at the absolute flash
    /// `address`.
    ///
    /// The address goes out little-endian: page offset low/high, then the
    /// sector's address-high byte, then a zero byte for the sectors in use.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn program(address: u32, payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(Error::Protocol("program request without payload".into()));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::Protocol(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD}",
                payload.len()
            )));
        }

        let mut args = Vec::with_capacity(4);
        args.write_u32::<LittleEndian>(address)
            .unwrap();

        Ok(Self {
            cmd: Command::FlashProgram,
            args,
            data: payload.to_vec(),
        })
    }

    /// Create a sector erase request.
    pub fn erase(sector: u8) -> Self {
        Self {
            cmd: Command::SectorErase,
            args: vec![sector],
            data: Vec::new(),
        }
    }

    /// Build the complete frame data.
    pub fn build(&self) -> Vec<u8> {
        encode(self.cmd, &self.args, &self.data)
    }
}

/// Validated 4-byte response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Length byte as sent by the device.
    pub len: u8,
    /// Command code echoed by the device.
    pub cmd: u8,
    /// Status (or data) byte.
    pub status: u8,
}

impl ResponseFrame {
    /// Check whether the device reported success.
    pub fn is_success(&self) -> bool {
        self.status == CMD_SUCCESSFUL
    }
}

/// Validate a raw response.
///
/// A response whose bytes do not XOR to zero is an integrity fault; the
/// status byte is only meaningful once this check has passed.
pub fn validate_response(response: [u8; RESPONSE_LEN], stage: Stage) -> Result<ResponseFrame> {
    if checksum(&response) != 0 {
        return Err(Error::IntegrityFault { stage, response });
    }

    Ok(ResponseFrame {
        len: response[0],
        cmd: response[1],
        status: response[2],
    })
}
