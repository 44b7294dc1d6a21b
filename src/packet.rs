//! Packet framer for the serial link. This is the bottom protocol layer:
//! it turns the raw byte stream into typed frames and back, and it
//! supervises the line state.
//!
//! Each frame on the wire has the form
//!
//! ```text
//! [ 16 10 02 ][ TYPE ][ PAYLOAD.. ][ 10 03 ][ CRC-HI ][ CRC-LO ]
//! ```
//!
//! Inside TYPE|PAYLOAD every literal 0x10 byte is doubled, so the `10 03`
//! trailer can never occur unescaped in the body. The CRC is CRC16 CCITT
//! over TYPE and the unstuffed payload, transmitted high byte first.
//!
//! The framer owns the serial endpoint. Reception is incremental: bytes
//! are collected into a bounded input buffer and scanned for the sync
//! sequence, then unstuffed until the trailer closes the frame. A CRC
//! mismatch discards the frame without desynchronising the scan; the
//! next valid frame still parses. Sending stages the stuffed frame into
//! a bounded output buffer and loops until the device has accepted every
//! byte.
//!
//! Line supervision: the host is the active side, so DTR and RTS are
//! asserted whenever they are found low. The link counts as up while the
//! peer holds the handshake lines high; which lines are required is a
//! policy knob because some cables only wire CTS through.

use crate::buffer::Buffer;
use crate::crc16::Crc16;
use crate::error::{Error, Result};
use crate::log;
use crate::serialport::{Endpoint, IoWatch, ModemLines};
use std::thread;
use std::time::Duration;

/// Frame constants
const FRAME_SYNC: [u8; 3] = [0x16, 0x10, 0x02];
const FRAME_ESC: u8 = 0x10;
const FRAME_ETX: u8 = 0x03;

/// Input and output staging buffers are bounded at this size; a frame
/// that would overflow the input buffer resets the receive state.
pub const BUFFERLEN: usize = 2000;

/// Which peer lines must be high for the link to count as up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandshakePolicy {
    /// Require CTS only (cables that do not wire DSR through).
    CtsOnly,
    /// Require both DSR and CTS.
    DsrAndCts,
}

impl Default for HandshakePolicy {
    fn default() -> HandshakePolicy {
        HandshakePolicy::DsrAndCts
    }
}

pub struct Packet {
    port: Box<dyn Endpoint>,
    watch: Option<Box<dyn IoWatch>>,
    policy: HandshakePolicy,

    in_buf: Vec<u8>,
    out_buf: Vec<u8>,

    // Receive scan state. `term_len` is how far the scan has looked,
    // `found_sync` is the offset just past the sync sequence (0 while
    // still searching), `end_pos` the offset of the first CRC byte once
    // the trailer has been seen.
    rcv: Buffer,
    crc_in: Crc16,
    crc_out: Crc16,
    term_len: usize,
    found_sync: usize,
    end_pos: usize,
    esc: bool,

    last_fatal: bool,
    line_status: Option<ModemLines>,
}

impl Packet {
    /// Create a framer over the endpoint and open it. An open failure is
    /// not fatal here; the next `link_failed` poll retries via `reset`.
    pub fn new(port: Box<dyn Endpoint>, policy: HandshakePolicy) -> Packet {
        Packet::with_watch(port, policy, None)
    }

    pub fn with_watch(
        port: Box<dyn Endpoint>,
        policy: HandshakePolicy,
        watch: Option<Box<dyn IoWatch>>,
    ) -> Packet {
        let mut packet = Packet {
            port,
            watch,
            policy,
            in_buf: Vec::with_capacity(BUFFERLEN),
            out_buf: Vec::with_capacity(BUFFERLEN),
            rcv: Buffer::new(),
            crc_in: Crc16::new(),
            crc_out: Crc16::new(),
            term_len: 0,
            found_sync: 0,
            end_pos: 0,
            esc: false,
            last_fatal: false,
            line_status: None,
        };
        match packet.port.open() {
            Ok(()) => {
                if let Some(fd) = packet.port.raw_fd() {
                    if let Some(watch) = packet.watch.as_mut() {
                        watch.add(fd);
                    }
                }
            }
            Err(e) => {
                log::error(&format!("packet: open failed: {}", e));
                packet.last_fatal = true;
            }
        }
        packet
    }

    /// Frame and stage `type` + `payload`, then push everything to the
    /// device. A write error is link-fatal.
    pub fn send(&mut self, frame_type: u8, payload: &Buffer) -> Result<()> {
        log::debug(&format!(
            "packet: type {:#04x} >> len={}",
            frame_type,
            payload.len()
        ));
        self.op_byte(FRAME_SYNC[0])?;
        self.op_byte(FRAME_SYNC[1])?;
        self.op_byte(FRAME_SYNC[2])?;

        self.crc_out = Crc16::new();
        if frame_type == FRAME_ESC {
            self.op_byte(frame_type)?;
        }
        self.op_byte(frame_type)?;
        self.crc_out.fold(frame_type);

        for &c in payload.as_slice() {
            if c == FRAME_ESC {
                self.op_byte(c)?;
            }
            self.op_byte(c)?;
            self.crc_out.fold(c);
        }

        self.op_byte(FRAME_ESC)?;
        self.op_byte(FRAME_ETX)?;

        let crc = self.crc_out.value();
        self.op_byte((crc >> 8) as u8)?;
        self.op_byte((crc & 0xff) as u8)?;
        self.flush_out()
    }

    /// Try to receive one frame. `Ok(None)` means no complete frame is
    /// available right now (idle line, or a frame was discarded for a bad
    /// CRC or a buffer overflow); `Err` means the link itself is down.
    pub fn get(&mut self) -> Result<Option<(u8, Buffer)>> {
        while !self.terminated() {
            if self.link_failed() {
                self.drop_input();
                return Err(Error::disconnected("serial line down"));
            }
            let mut chunk = [0u8; 512];
            let want = chunk.len().min(BUFFERLEN - self.in_buf.len());
            match self.port.read(&mut chunk[..want]) {
                Ok(0) => {
                    if self.in_buf.is_empty() {
                        return Ok(None);
                    }
                }
                Ok(n) => {
                    log::debug(&format!("packet: rcv {}", n));
                    self.in_buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => {
                    self.last_fatal = true;
                    return Err(e.into());
                }
            }
            if self.in_buf.len() >= BUFFERLEN {
                log::error("packet: input buffer overflow");
                self.drop_input();
                return Ok(None);
            }
        }

        // A full frame has been scanned; the CRC trails the terminator.
        let crc = self.crc_in.value();
        let crc_ok = self.in_buf[self.end_pos] == (crc >> 8) as u8
            && self.in_buf[self.end_pos + 1] == (crc & 0xff) as u8;
        let consumed = self.term_len;
        self.in_buf.drain(..consumed);
        self.term_len = 0;
        self.found_sync = 0;

        if !crc_ok {
            log::debug("packet: bad crc, frame discarded");
            self.rcv.init();
            return Ok(None);
        }

        let mut payload = std::mem::replace(&mut self.rcv, Buffer::new());
        let frame_type = match payload.byte_at(0) {
            Some(t) => t,
            None => {
                log::debug("packet: empty frame discarded");
                return Ok(None);
            }
        };
        payload.discard_first_bytes(1);
        log::debug(&format!(
            "packet: get type {:#04x} len={}",
            frame_type,
            payload.len()
        ));
        Ok(Some((frame_type, payload)))
    }

    /// Scan the input buffer for a complete frame. Progress is kept
    /// across calls, so partially received frames resume where the last
    /// scan stopped.
    fn terminated(&mut self) -> bool {
        if self.in_buf.len() < 6 {
            return false;
        }
        if self.found_sync == 0 {
            while self.found_sync == 0 && self.in_buf.len() - self.term_len >= 6 {
                let p = self.term_len;
                self.term_len += 1;
                if self.in_buf[p] != FRAME_SYNC[0] {
                    continue;
                }
                self.term_len += 1;
                if self.in_buf[p + 1] != FRAME_SYNC[1] {
                    continue;
                }
                self.term_len += 1;
                if self.in_buf[p + 2] != FRAME_SYNC[2] {
                    continue;
                }
                self.found_sync = self.term_len;
            }
            if self.found_sync == 0 {
                return false;
            }
            if self.found_sync != 3 {
                log::debug(&format!("packet: found sync at {}", self.found_sync));
            }
            self.esc = false;
            self.crc_in = Crc16::new();
            self.rcv.init();
        }
        let mut l = self.term_len;
        while l + 2 < self.in_buf.len() {
            let c = self.in_buf[l];
            if self.esc {
                self.esc = false;
                if c == FRAME_ETX {
                    // Trailer found; the two CRC bytes are already in.
                    self.end_pos = l + 1;
                    self.term_len = l + 3;
                    return true;
                }
                self.crc_in.fold(c);
                self.rcv.add_byte(c);
            } else if c == FRAME_ESC {
                self.esc = true;
            } else {
                self.crc_in.fold(c);
                self.rcv.add_byte(c);
            }
            l += 1;
        }
        self.term_len = l;
        false
    }

    /// Poll the modem lines. Asserts DTR/RTS when found low (the host is
    /// the active side) and reports whether the link is down under the
    /// configured handshake policy. A fatal I/O error observed earlier
    /// triggers a full reset first.
    pub fn link_failed(&mut self) -> bool {
        if self.last_fatal {
            self.reset();
        }
        let mut lines = match self.port.modem_lines() {
            Ok(lines) => lines,
            Err(e) => {
                log::error(&format!("packet: modem line poll failed: {}", e));
                self.last_fatal = true;
                return true;
            }
        };
        if self.line_status != Some(lines) {
            log::debug(&format!(
                "packet: < DTR:{} RTS:{} DCD:{} DSR:{} CTS:{}",
                lines.dtr() as u8,
                lines.rts() as u8,
                lines.dcd() as u8,
                lines.dsr() as u8,
                lines.cts() as u8
            ));
            if !(lines.rts() && lines.dtr()) {
                lines = lines | ModemLines::DTR | ModemLines::RTS;
                if let Err(e) = self.port.set_modem_lines(lines) {
                    log::error(&format!("packet: modem line set failed: {}", e));
                    self.last_fatal = true;
                }
            }
            self.line_status = Some(lines);
        }
        let failed = match self.policy {
            HandshakePolicy::CtsOnly => !lines.cts(),
            HandshakePolicy::DsrAndCts => !lines.dsr() || !lines.cts(),
        };
        if self.last_fatal {
            log::debug("packet: link fatal");
        }
        if failed {
            log::debug("packet: link failed");
        }
        self.last_fatal || failed
    }

    /// Close, reopen and settle the serial connection, dropping all
    /// buffered and partially scanned data.
    pub fn reset(&mut self) {
        log::info("packet: resetting serial connection");
        if let Some(fd) = self.port.raw_fd() {
            if let Some(watch) = self.watch.as_mut() {
                watch.remove(fd);
            }
        }
        let _ = self.port.close();
        thread::sleep(Duration::from_millis(100));

        self.drop_input();
        self.out_buf.clear();
        self.line_status = None;

        match self.port.open() {
            Ok(()) => {
                self.last_fatal = false;
                if let Some(fd) = self.port.raw_fd() {
                    if let Some(watch) = self.watch.as_mut() {
                        watch.add(fd);
                    }
                }
            }
            Err(e) => {
                log::error(&format!("packet: reopen failed: {}", e));
                self.last_fatal = true;
            }
        }
        // Give a real line a second to settle after the modem state flip.
        if self.port.raw_fd().is_some() {
            thread::sleep(Duration::from_secs(1));
        }
    }

    fn drop_input(&mut self) {
        self.in_buf.clear();
        self.term_len = 0;
        self.found_sync = 0;
        self.esc = false;
        self.rcv.init();
    }

    fn op_byte(&mut self, b: u8) -> Result<()> {
        self.out_buf.push(b);
        if self.out_buf.len() >= BUFFERLEN {
            self.flush_out()?;
        }
        Ok(())
    }

    fn flush_out(&mut self) -> Result<()> {
        let mut off = 0;
        while off < self.out_buf.len() {
            match self.port.write(&self.out_buf[off..]) {
                Ok(n) => {
                    log::debug(&format!("packet: wr={}", n));
                    off += n;
                }
                Err(e) => {
                    self.last_fatal = true;
                    self.out_buf.clear();
                    return Err(e.into());
                }
            }
        }
        self.out_buf.clear();
        Ok(())
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        if let Some(fd) = self.port.raw_fd() {
            if let Some(watch) = self.watch.as_mut() {
                watch.remove(fd);
            }
        }
    }
}
