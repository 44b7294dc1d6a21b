//! Test doubles: a scripted serial endpoint plus a miniature peer that
//! speaks just enough of the link protocol to answer the host side.

use crate::crc16::Crc16;
use crate::ncp::{
    CTRL_CHANNEL, NCP_CONNECT, NCP_CONNECT_ACK, NCP_REGISTER, NCP_REGISTER_ACK, NCP_VERSION,
    NCP_VERSION_QUERY,
};
use crate::serialport::{Endpoint, Error, ErrorKind, ModemLines, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Given a decoded outbound frame, produce the frames the fake peer
/// sends back.
pub type Responder = Box<dyn FnMut(u8, &[u8]) -> Vec<(u8, Vec<u8>)>>;

struct MockInner {
    rx: VecDeque<u8>,
    tx_all: Vec<u8>,
    tx_pending: Vec<u8>,
    frames: Vec<(u8, Vec<u8>)>,
    lines: ModemLines,
    open_count: u32,
    fail_writes: u32,
    read_chunk: usize,
    responder: Option<Responder>,
}

/// A scripted endpoint. Clones share state, so a test can keep a handle
/// for inspection while the framer owns another.
#[derive(Clone)]
pub struct MockPort {
    inner: Rc<RefCell<MockInner>>,
}

impl MockPort {
    pub fn new() -> MockPort {
        MockPort {
            inner: Rc::new(RefCell::new(MockInner {
                rx: VecDeque::new(),
                tx_all: Vec::new(),
                tx_pending: Vec::new(),
                frames: Vec::new(),
                lines: ModemLines::DSR | ModemLines::CTS,
                open_count: 0,
                fail_writes: 0,
                read_chunk: 512,
                responder: None,
            })),
        }
    }

    /// Queue raw bytes for the framer to read.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.inner.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Everything written to the port since it was first opened.
    pub fn written(&self) -> Vec<u8> {
        self.inner.borrow().tx_all.clone()
    }

    /// All complete frames decoded from the written byte stream.
    pub fn frames(&self) -> Vec<(u8, Vec<u8>)> {
        self.inner.borrow().frames.clone()
    }

    pub fn set_lines(&self, lines: ModemLines) {
        self.inner.borrow_mut().lines = lines;
    }

    pub fn lines(&self) -> ModemLines {
        self.inner.borrow().lines
    }

    pub fn open_count(&self) -> u32 {
        self.inner.borrow().open_count
    }

    pub fn fail_next_write(&self) {
        self.inner.borrow_mut().fail_writes = 1;
    }

    pub fn set_responder(&self, responder: Responder) {
        self.inner.borrow_mut().responder = Some(responder);
    }
}

impl Endpoint for MockPort {
    fn open(&mut self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.open_count += 1;
        // A reopened tty has nothing buffered.
        inner.rx.clear();
        inner.tx_pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.borrow_mut();
        let n = buf.len().min(inner.read_chunk).min(inner.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inner.rx.pop_front().expect("rx underrun");
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let (complete, mut responder) = {
            let mut inner = self.inner.borrow_mut();
            if inner.fail_writes > 0 {
                inner.fail_writes -= 1;
                return Err(Error::new(ErrorKind::PortClosed, "injected write failure"));
            }
            inner.tx_all.extend_from_slice(buf);
            inner.tx_pending.extend_from_slice(buf);
            let mut pending = std::mem::take(&mut inner.tx_pending);
            let complete = decode_frames(&mut pending);
            inner.tx_pending = pending;
            inner.frames.extend(complete.iter().cloned());
            (complete, inner.responder.take())
        };
        if let Some(r) = responder.as_mut() {
            let mut replies = Vec::new();
            for (frame_type, payload) in &complete {
                replies.extend(r(*frame_type, payload));
            }
            let mut inner = self.inner.borrow_mut();
            for (frame_type, payload) in replies {
                let wire = encode_frame(frame_type, &payload);
                inner.rx.extend(wire.iter().copied());
            }
        }
        self.inner.borrow_mut().responder = responder;
        Ok(buf.len())
    }

    fn modem_lines(&self) -> Result<ModemLines> {
        Ok(self.inner.borrow().lines)
    }

    fn set_modem_lines(&mut self, lines: ModemLines) -> Result<()> {
        self.inner.borrow_mut().lines = lines;
        Ok(())
    }
}

/// Encode one wire frame: sync, stuffed type+payload, trailer, CRC.
pub fn encode_frame(frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x16, 0x10, 0x02];
    let mut crc = Crc16::new();
    let mut body = Vec::with_capacity(payload.len() + 1);
    body.push(frame_type);
    body.extend_from_slice(payload);
    for &b in &body {
        if b == 0x10 {
            out.push(b);
        }
        out.push(b);
        crc.fold(b);
    }
    out.push(0x10);
    out.push(0x03);
    let v = crc.value();
    out.push((v >> 8) as u8);
    out.push(v as u8);
    out
}

/// Pull all complete frames off the front of a raw byte stream,
/// leaving any trailing partial frame in place. CRCs are trusted; the
/// stream comes from our own framer.
pub fn decode_frames(pending: &mut Vec<u8>) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    loop {
        let mut sync = None;
        let mut i = 0;
        while i + 3 <= pending.len() {
            if pending[i] == 0x16 && pending[i + 1] == 0x10 && pending[i + 2] == 0x02 {
                sync = Some(i + 3);
                break;
            }
            i += 1;
        }
        let mut p = match sync {
            Some(p) => p,
            None => break,
        };
        let mut body = Vec::new();
        let mut esc = false;
        let mut end = None;
        while p < pending.len() {
            let c = pending[p];
            if esc {
                esc = false;
                if c == 0x03 {
                    end = Some(p + 1);
                    break;
                }
                body.push(c);
            } else if c == 0x10 {
                esc = true;
            } else {
                body.push(c);
            }
            p += 1;
        }
        let end = match end {
            Some(e) => e,
            None => break,
        };
        if end + 2 > pending.len() {
            break;
        }
        pending.drain(..end + 2);
        if body.is_empty() {
            continue;
        }
        frames.push((body[0], body[1..].to_vec()));
    }
    frames
}

/// A peer that completes the NCP control handshake (version 2, accepts
/// every connect and register) and hands data frames to `data`.
pub fn ncp_peer<F>(mut data: F) -> Responder
where
    F: FnMut(u8, &[u8]) -> Vec<(u8, Vec<u8>)> + 'static,
{
    Box::new(move |frame_type: u8, payload: &[u8]| {
        if frame_type == CTRL_CHANNEL {
            match (payload.first().copied(), payload.get(1).copied()) {
                (Some(NCP_VERSION_QUERY), _) => {
                    vec![(CTRL_CHANNEL, vec![NCP_VERSION, 2, 0])]
                }
                (Some(NCP_CONNECT), Some(id)) => {
                    vec![(CTRL_CHANNEL, vec![NCP_CONNECT_ACK, id, 0])]
                }
                (Some(NCP_REGISTER), Some(id)) => {
                    vec![(CTRL_CHANNEL, vec![NCP_REGISTER_ACK, id, 0])]
                }
                _ => vec![],
            }
        } else {
            data(frame_type, payload)
        }
    })
}

/// A peer that additionally parses the service command envelope and
/// replies on the same channel with whatever `service` returns.
pub fn service_peer<F>(mut service: F) -> Responder
where
    F: FnMut(u16, u16, &[u8]) -> Vec<Vec<u8>> + 'static,
{
    ncp_peer(move |chan: u8, payload: &[u8]| {
        if payload.len() < 4 {
            // Bare notification outside the command envelope.
            return vec![];
        }
        let command = LittleEndian::read_u16(&payload[0..2]);
        let serial = LittleEndian::read_u16(&payload[2..4]);
        service(command, serial, &payload[4..])
            .into_iter()
            .map(|p| (chan, p))
            .collect()
    })
}

/// Build a response envelope: tag word 0x11, echoed serial, status,
/// payload.
pub fn envelope(serial: u16, status: i32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&[0x11, 0x00]);
    let mut w = [0u8; 2];
    LittleEndian::write_u16(&mut w, serial);
    out.extend_from_slice(&w);
    let mut d = [0u8; 4];
    LittleEndian::write_i32(&mut d, status);
    out.extend_from_slice(&d);
    out.extend_from_slice(payload);
    out
}
