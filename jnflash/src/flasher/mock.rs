//! In-memory ports for flasher tests.

use {
    crate::{
        error::Result,
        port::Port,
        protocol::{
            checksum,
            frame::{CMD_FLASH_PRG_REQ, CMD_SECTOR_ERASE_REQ, CMD_SUCCESSFUL},
        },
        sector::{SECTOR_COUNT, SECTOR_SIZE, Sector},
    },
    byteorder::{ByteOrder, LittleEndian},
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        time::Duration,
    },
};

/// Status the simulated device returns for a failed command.
const STATUS_FAILED: u8 = 0xFE;

/// Well-formed response frame.
pub(crate) fn response(cmd: u8, status: u8) -> [u8; 4] {
    [0x03, cmd, status, 0x03 ^ cmd ^ status]
}

/// Success response whose checksum is off by one bit.
pub(crate) fn corrupt(cmd: u8) -> [u8; 4] {
    let mut frame = response(cmd, CMD_SUCCESSFUL);
    frame[3] ^= 0x01;
    frame
}

/// Monitor backed by an in-memory flash.
///
/// Programming only clears bits, so a program request succeeds exactly when
/// every cell reads back the requested byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SimulatedMonitor {
    flash: Vec<u8>,
}

impl SimulatedMonitor {
    pub(crate) fn erased() -> Self {
        Self {
            flash: vec![0xFF; SECTOR_COUNT as usize * SECTOR_SIZE as usize],
        }
    }

    /// Overwrite cells directly, bypassing programming rules.
    pub(crate) fn load(&mut self, sector: Sector, offset: usize, data: &[u8]) {
        let start = sector.address() as usize + offset;
        self.flash[start..start + data.len()].copy_from_slice(data);
    }

    pub(crate) fn sector(&self, sector: Sector) -> &[u8] {
        let start = sector.address() as usize;
        &self.flash[start..start + SECTOR_SIZE as usize]
    }

    fn handle(&mut self, frame: &[u8]) -> [u8; 4] {
        let cmd = frame.get(1).copied().unwrap_or_default();
        if frame.len() < 4 || checksum(frame) != 0 || frame[0] as usize != frame.len() - 1 {
            return response(cmd.wrapping_add(1), STATUS_FAILED);
        }

        let status = match cmd {
            CMD_FLASH_PRG_REQ if frame.len() > 7 => {
                let addr = LittleEndian::read_u32(&frame[2..6]);
                self.program(addr as usize, &frame[6..frame.len() - 1])
            },
            CMD_SECTOR_ERASE_REQ => self.erase(frame[2]),
            _ => STATUS_FAILED,
        };
        response(cmd.wrapping_add(1), status)
    }

    fn program(&mut self, start: usize, data: &[u8]) -> u8 {
        let Some(cells) = self.flash.get_mut(start..start + data.len()) else {
            return STATUS_FAILED;
        };
        let mut verified = true;
        for (cell, &byte) in cells.iter_mut().zip(data) {
            *cell &= byte;
            verified &= *cell == byte;
        }
        if verified { CMD_SUCCESSFUL } else { STATUS_FAILED }
    }

    fn erase(&mut self, index: u8) -> u8 {
        let Some(sector) = Sector::new(index) else {
            return STATUS_FAILED;
        };
        let start = sector.address() as usize;
        self.flash[start..start + SECTOR_SIZE as usize].fill(0xFF);
        CMD_SUCCESSFUL
    }
}

enum Responder {
    Script(VecDeque<[u8; 4]>),
    Device(SimulatedMonitor),
}

/// Port that records every request and answers from a script or a
/// simulated device.
pub(crate) struct MockPort {
    responder: Responder,
    read_buf: VecDeque<u8>,
    /// Requests in the order they were written.
    pub(crate) frames: Vec<Vec<u8>>,
    pub(crate) closed: bool,
    pub(crate) cleared: usize,
}

impl MockPort {
    /// Answer requests with `responses` in order; time out once exhausted.
    pub(crate) fn scripted(responses: impl IntoIterator<Item = [u8; 4]>) -> Self {
        Self::with(Responder::Script(responses.into_iter().collect()))
    }

    pub(crate) fn device(device: SimulatedMonitor) -> Self {
        Self::with(Responder::Device(device))
    }

    fn with(responder: Responder) -> Self {
        Self {
            responder,
            read_buf: VecDeque::new(),
            frames: Vec::new(),
            closed: false,
            cleared: 0,
        }
    }

    pub(crate) fn device_state(&self) -> Option<&SimulatedMonitor> {
        match &self.responder {
            Responder::Device(device) => Some(device),
            Responder::Script(_) => None,
        }
    }

    pub(crate) fn program_frames(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.frames
            .iter()
            .filter(|f| f.get(1) == Some(&CMD_FLASH_PRG_REQ))
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "port closed")
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(Self::closed_error());
        }
        if self.read_buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for (dst, src) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(Self::closed_error());
        }
        self.frames.push(buf.to_vec());
        let reply = match &mut self.responder {
            Responder::Script(responses) => responses.pop_front(),
            Responder::Device(device) => Some(device.handle(buf)),
        };
        if let Some(reply) = reply {
            self.read_buf.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn timeout(&self) -> Duration {
        Duration::from_millis(100)
    }

    fn baud_rate(&self) -> u32 {
        crate::port::PROGRAMMING_BAUD
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.read_buf.clear();
        self.cleared += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandFrame;

    #[test]
    fn test_simulated_program_only_clears_bits() {
        let mut device = SimulatedMonitor::erased();
        let at = |s: Sector| s.address() as usize;
        assert_eq!(device.program(at(Sector::LOWER), &[0x12]), CMD_SUCCESSFUL);
        assert_eq!(device.program(at(Sector::LOWER), &[0xFF]), STATUS_FAILED);
        assert_eq!(device.program(at(Sector::LOWER), &[0x12]), CMD_SUCCESSFUL);
        assert_eq!(device.program(at(Sector::LOWER), &[0x00]), CMD_SUCCESSFUL);
        assert_eq!(device.erase(0), CMD_SUCCESSFUL);
        assert_eq!(device.sector(Sector::LOWER)[0], 0xFF);
    }

    #[test]
    fn test_device_port_answers_frames() {
        let mut port = MockPort::device(SimulatedMonitor::erased());
        let request = CommandFrame::erase(8).build();
        port.write_all(&request).unwrap();

        let mut reply = [0u8; 4];
        port.read_exact(&mut reply).unwrap();
        assert_eq!(reply, response(CMD_SECTOR_ERASE_REQ + 1, CMD_SUCCESSFUL));
        assert_eq!(port.frames, vec![request]);
    }
}
