//! Service channel: the request/response discipline shared by the remote
//! services.
//!
//! Every request carries a two word header, `command` then a serial
//! number that increments per request and wraps at 0xffff. Responses
//! carry a fixed tag word (0x11), the echoed serial, and a signed 32 bit
//! status, followed by the command's payload:
//!
//! ```text
//! request:  [ command:u16 ][ serial:u16 ][ payload.. ]
//! response: [ 0x11:u16 ][ serial:u16 ][ status:i32 ][ payload.. ]
//! ```
//!
//! A response with the wrong tag, or any transport failure, marks the
//! channel disconnected. The next command then rebuilds the link through
//! the multiplexer and the request is retried exactly once; a second
//! failure surfaces to the caller. Responses whose serial does not match
//! the outstanding request are stale leftovers from before a reconnect
//! and are discarded.
//!
//! The channel holds a non-owning handle to the multiplexer; only one
//! request per channel is outstanding at a time.

use crate::buffer::Buffer;
use crate::error::{self, Error, Result};
use crate::log;
use crate::ncp::Ncp;
use std::cell::RefCell;
use std::rc::Rc;

const RESPONSE_TAG: u16 = 0x11;

pub struct Channel {
    ncp: Rc<RefCell<Ncp>>,
    name: &'static str,
    id: u8,
    serial: u16,
    pending_serial: u16,
    connected: bool,
}

impl Channel {
    /// A channel starts disconnected; the first command connects and
    /// registers it.
    pub fn new(ncp: Rc<RefCell<Ncp>>, name: &'static str) -> Channel {
        Channel {
            ncp,
            name,
            id: 0,
            serial: 0,
            pending_serial: 0,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn protocol_version(&mut self) -> Result<u16> {
        self.ncp.borrow_mut().protocol_version()
    }

    /// Post a command. On a send failure the link is rebuilt and the
    /// command re-posted once, with a fresh serial (serials restart after
    /// a reconnect).
    pub fn send_command(&mut self, command: u16, data: &Buffer) -> Result<()> {
        if !self.connected {
            self.establish()?;
        }
        if self.post(command, data).is_ok() {
            return Ok(());
        }
        self.connected = false;
        self.establish()?;
        self.post(command, data).map_err(|e| {
            self.connected = false;
            e
        })
    }

    /// Read the response to the outstanding command: validate the tag,
    /// skip stale serials, strip the envelope and map the status word.
    pub fn get_response(&mut self) -> Result<Buffer> {
        loop {
            let mut b = match self.ncp.borrow_mut().recv_on(self.id) {
                Ok(b) => b,
                Err(e) => {
                    self.connected = false;
                    return Err(e);
                }
            };
            let tag = match b.word_at(0) {
                Some(t) => t,
                None => {
                    self.connected = false;
                    return Err(Error::disconnected("unparseable response envelope"));
                }
            };
            if tag != RESPONSE_TAG {
                self.connected = false;
                return Err(Error::disconnected(&format!(
                    "bad response tag {:#06x}",
                    tag
                )));
            }
            let (serial, status) = match (b.word_at(2), b.dword_at(4)) {
                (Some(serial), Some(status)) => (serial, status as i32),
                _ => {
                    self.connected = false;
                    return Err(Error::disconnected("unparseable response envelope"));
                }
            };
            if serial != self.pending_serial {
                log::debug(&format!(
                    "channel {}: discarding stale response serial {}",
                    self.id, serial
                ));
                continue;
            }
            b.discard_first_bytes(8);
            error::status_to_result(status)?;
            return Ok(b);
        }
    }

    /// Post a command and wait for its response.
    pub fn request(&mut self, command: u16, data: &Buffer) -> Result<Buffer> {
        self.send_command(command, data)?;
        self.get_response()
    }

    /// Send a bare payload on the channel, outside the command envelope.
    /// Used for one-way notifications that take no response.
    pub fn send_raw(&mut self, data: &Buffer) -> Result<()> {
        self.ncp.borrow_mut().send(self.id, data)
    }

    pub fn disconnect(&mut self) {
        if self.id != 0 {
            self.ncp.borrow_mut().disconnect(self.id);
        }
        self.connected = false;
    }

    fn post(&mut self, command: u16, data: &Buffer) -> Result<()> {
        let serial = self.next_serial();
        self.pending_serial = serial;
        let mut a = Buffer::new();
        a.add_word(command);
        a.add_word(serial);
        a.add_buf(data);
        self.ncp.borrow_mut().send(self.id, &a)
    }

    fn next_serial(&mut self) -> u16 {
        let serial = self.serial;
        self.serial = if serial < 0xffff { serial + 1 } else { 0 };
        serial
    }

    fn establish(&mut self) -> Result<()> {
        if self.id == 0 {
            let mut ncp = self.ncp.borrow_mut();
            let id = ncp.connect(self.name)?;
            ncp.register(id)?;
            self.id = id;
        } else {
            self.ncp.borrow_mut().reconnect()?;
        }
        self.connected = true;
        self.serial = 0;
        Ok(())
    }
}
