//! NCP, the channel multiplexer. It runs several logical channels over
//! the single framed link: the frame type byte is the destination
//! channel id, with type 0x00 reserved for NCP control traffic.
//!
//! Control payloads are an opcode byte followed by arguments:
//!
//! ```text
//! 0x01 CONNECT      <id>            host proposes a new channel
//! 0x02 CONNECT_ACK  <id> <status>   peer accepts (status 0) or refuses
//! 0x03 REGISTER     <id> <name> 00  bind a service name to the channel
//! 0x04 REGISTER_ACK <id> <status>
//! 0x05 DISCONNECT   <id>
//! 0x06 VERSION_QRY
//! 0x07 VERSION      <word>          peer-advertised protocol version
//! ```
//!
//! The multiplexer owns the framer. Inbound frames are routed to a per
//! channel queue; a frame for an id nobody owns is logged and dropped.
//! On link loss every channel is marked unregistered and `reconnect`
//! rebuilds the whole stack: serial reset, version query, then a fresh
//! connect/register round for every known channel (ids are reused, so
//! service handles stay valid).

use crate::buffer::Buffer;
use crate::error::{Error, ErrorKind, Result};
use crate::log;
use crate::packet::Packet;
use std::collections::{HashMap, VecDeque};

/// Frame type reserved for multiplexer control traffic.
pub const CTRL_CHANNEL: u8 = 0x00;

pub(crate) const NCP_CONNECT: u8 = 0x01;
pub(crate) const NCP_CONNECT_ACK: u8 = 0x02;
pub(crate) const NCP_REGISTER: u8 = 0x03;
pub(crate) const NCP_REGISTER_ACK: u8 = 0x04;
pub(crate) const NCP_DISCONNECT: u8 = 0x05;
pub(crate) const NCP_VERSION_QUERY: u8 = 0x06;
pub(crate) const NCP_VERSION: u8 = 0x07;

// How many consecutive empty polls a receive tolerates before declaring
// the peer gone. Each poll spans the port read timeout.
const MAX_IDLE_POLLS: u32 = 3;

struct Slot {
    name: String,
    registered: bool,
    inbound: VecDeque<Buffer>,
}

pub struct Ncp {
    packet: Packet,
    channels: HashMap<u8, Slot>,
    next_id: u8,
    version: Option<u16>,
    link_up: bool,
}

impl Ncp {
    pub fn new(packet: Packet) -> Ncp {
        Ncp {
            packet,
            channels: HashMap::new(),
            next_id: 1,
            version: None,
            link_up: false,
        }
    }

    pub fn is_up(&self) -> bool {
        self.link_up
    }

    /// Request a new channel for `name`. Returns the assigned id; the
    /// channel still has to be registered before the peer will route
    /// service traffic to it.
    pub fn connect(&mut self, name: &str) -> Result<u8> {
        if self.version.is_none() {
            self.query_version()?;
        }
        let id = self.alloc_id()?;
        self.connect_id(id)?;
        self.channels.insert(
            id,
            Slot {
                name: name.to_string(),
                registered: false,
                inbound: VecDeque::new(),
            },
        );
        log::debug(&format!("ncp: channel {} connected for {}", id, name));
        Ok(id)
    }

    /// Register the channel's service name with the peer.
    pub fn register(&mut self, id: u8) -> Result<()> {
        let name = match self.channels.get(&id) {
            Some(slot) => slot.name.clone(),
            None => return Err(Error::disconnected("channel not connected")),
        };
        let mut b = Buffer::new();
        b.add_byte(NCP_REGISTER);
        b.add_byte(id);
        b.add_string_t(&name);
        self.send_control(&b)?;
        let ack = self.wait_control(NCP_REGISTER_ACK, Some(id))?;
        let status = ack.byte_at(2).ok_or_else(Error::truncated)?;
        if status != 0 {
            return Err(Error::new(
                ErrorKind::Connect,
                &format!("peer refused registration of {}", name),
            ));
        }
        if let Some(slot) = self.channels.get_mut(&id) {
            slot.registered = true;
        }
        log::debug(&format!("ncp: channel {} registered as {}", id, name));
        Ok(())
    }

    /// Acknowledge a peer-initiated registration.
    pub fn register_ack(&mut self, id: u8) -> Result<()> {
        let mut b = Buffer::new();
        b.add_byte(NCP_REGISTER_ACK);
        b.add_byte(id);
        b.add_byte(0);
        self.send_control(&b)
    }

    /// Enqueue a frame for transmission on the channel.
    pub fn send(&mut self, id: u8, payload: &Buffer) -> Result<()> {
        if !self.channels.contains_key(&id) {
            return Err(Error::disconnected("channel not connected"));
        }
        match self.packet.send(id, payload) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.link_down();
                Err(e)
            }
        }
    }

    /// Receive the next frame addressed to the channel, pumping the
    /// framer and routing other traffic on the way.
    pub fn recv_on(&mut self, id: u8) -> Result<Buffer> {
        let mut idle = 0;
        loop {
            match self.channels.get_mut(&id) {
                Some(slot) => {
                    if let Some(b) = slot.inbound.pop_front() {
                        return Ok(b);
                    }
                }
                None => return Err(Error::disconnected("channel not connected")),
            }
            match self.packet.get() {
                Ok(Some((frame_type, payload))) => self.dispatch(frame_type, payload),
                Ok(None) => {
                    idle += 1;
                    if idle >= MAX_IDLE_POLLS {
                        self.link_down();
                        return Err(Error::disconnected("no response from peer"));
                    }
                }
                Err(e) => {
                    self.link_down();
                    return Err(e);
                }
            }
        }
    }

    /// Tear down a channel. Failure to notify the peer is ignored; the
    /// local slot is gone either way.
    pub fn disconnect(&mut self, id: u8) {
        if self.channels.remove(&id).is_some() {
            let mut b = Buffer::new();
            b.add_byte(NCP_DISCONNECT);
            b.add_byte(id);
            let _ = self.send_control(&b);
        }
    }

    /// The peer-advertised protocol version, queried once per link.
    pub fn protocol_version(&mut self) -> Result<u16> {
        match self.version {
            Some(v) => Ok(v),
            None => {
                self.query_version()?;
                self.version
                    .ok_or_else(|| Error::disconnected("no version from peer"))
            }
        }
    }

    /// Rebuild the link after a failure: serial reset, fresh version
    /// handshake, then re-connect and re-register every known channel
    /// under its old id.
    pub fn reconnect(&mut self) -> Result<()> {
        log::info("ncp: reconnecting link");
        self.packet.reset();
        self.version = None;
        self.link_up = false;
        for slot in self.channels.values_mut() {
            slot.registered = false;
            slot.inbound.clear();
        }
        self.query_version()?;
        let mut ids: Vec<u8> = self.channels.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.connect_id(id)?;
            self.register(id)?;
        }
        Ok(())
    }

    fn link_down(&mut self) {
        if self.link_up {
            log::warn("ncp: link down");
        }
        self.link_up = false;
        for slot in self.channels.values_mut() {
            slot.registered = false;
            slot.inbound.clear();
        }
    }

    fn alloc_id(&mut self) -> Result<u8> {
        for _ in 0..255 {
            let id = self.next_id;
            self.next_id = if self.next_id == 255 { 1 } else { self.next_id + 1 };
            if !self.channels.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(Error::new(ErrorKind::Full, "no free channel ids"))
    }

    fn connect_id(&mut self, id: u8) -> Result<()> {
        let mut b = Buffer::new();
        b.add_byte(NCP_CONNECT);
        b.add_byte(id);
        self.send_control(&b)?;
        let ack = self.wait_control(NCP_CONNECT_ACK, Some(id))?;
        let status = ack.byte_at(2).ok_or_else(Error::truncated)?;
        if status != 0 {
            return Err(Error::new(
                ErrorKind::Connect,
                &format!("peer refused channel {}", id),
            ));
        }
        Ok(())
    }

    fn query_version(&mut self) -> Result<()> {
        let mut b = Buffer::new();
        b.add_byte(NCP_VERSION_QUERY);
        self.send_control(&b)?;
        let resp = self.wait_control(NCP_VERSION, None)?;
        let version = resp.word_at(1).ok_or_else(Error::truncated)?;
        log::debug(&format!("ncp: peer protocol version {}", version));
        self.version = Some(version);
        self.link_up = true;
        Ok(())
    }

    fn send_control(&mut self, payload: &Buffer) -> Result<()> {
        match self.packet.send(CTRL_CHANNEL, payload) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.link_down();
                Err(e)
            }
        }
    }

    /// Pump frames until the expected control message arrives. Other
    /// control traffic is handled in place and data frames are queued
    /// for their channels.
    fn wait_control(&mut self, opcode: u8, id: Option<u8>) -> Result<Buffer> {
        let mut idle = 0;
        loop {
            match self.packet.get() {
                Ok(Some((frame_type, payload))) => {
                    if frame_type == CTRL_CHANNEL
                        && payload.byte_at(0) == Some(opcode)
                        && id.map_or(true, |want| payload.byte_at(1) == Some(want))
                    {
                        return Ok(payload);
                    }
                    self.dispatch(frame_type, payload);
                }
                Ok(None) => {
                    idle += 1;
                    if idle >= MAX_IDLE_POLLS {
                        self.link_down();
                        return Err(Error::disconnected("no answer to control message"));
                    }
                }
                Err(e) => {
                    self.link_down();
                    return Err(e);
                }
            }
        }
    }

    fn dispatch(&mut self, frame_type: u8, payload: Buffer) {
        if frame_type == CTRL_CHANNEL {
            self.handle_control(&payload);
            return;
        }
        match self.channels.get_mut(&frame_type) {
            Some(slot) => slot.inbound.push_back(payload),
            None => log::warn(&format!(
                "ncp: dropping frame for unknown channel {}",
                frame_type
            )),
        }
    }

    fn handle_control(&mut self, payload: &Buffer) {
        match payload.byte_at(0) {
            Some(NCP_VERSION) => {
                if let Some(v) = payload.word_at(1) {
                    self.version = Some(v);
                }
            }
            Some(NCP_DISCONNECT) => {
                if let Some(id) = payload.byte_at(1) {
                    log::info(&format!("ncp: peer disconnected channel {}", id));
                    self.channels.remove(&id);
                }
            }
            Some(NCP_REGISTER) => {
                // Peer-initiated registration; acknowledge and move on.
                if let Some(id) = payload.byte_at(1) {
                    let _ = self.register_ack(id);
                }
            }
            Some(op) => {
                log::debug(&format!("ncp: ignoring stray control opcode {:#04x}", op));
            }
            None => log::debug("ncp: empty control frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{HandshakePolicy, Packet};
    use crate::serialport::ModemLines;
    use crate::testutil::{ncp_peer, MockPort};

    fn ncp_over(mock: &MockPort) -> Ncp {
        Ncp::new(Packet::new(
            Box::new(mock.clone()),
            HandshakePolicy::DsrAndCts,
        ))
    }

    #[test]
    fn test_connect_register_version() {
        let mock = MockPort::new();
        mock.set_responder(ncp_peer(|_, _| vec![]));
        let mut ncp = ncp_over(&mock);

        let id = ncp.connect("SYS$RFSV").unwrap();
        assert_eq!(1, id);
        ncp.register(id).unwrap();
        assert_eq!(2, ncp.protocol_version().unwrap());
        assert!(ncp.is_up());
    }

    #[test]
    fn test_ids_are_assigned_in_sequence() {
        let mock = MockPort::new();
        mock.set_responder(ncp_peer(|_, _| vec![]));
        let mut ncp = ncp_over(&mock);

        assert_eq!(1, ncp.connect("SYS$RFSV").unwrap());
        assert_eq!(2, ncp.connect("SYS$RPCS").unwrap());
    }

    #[test]
    fn test_data_routing_drops_unknown_channels() {
        let mock = MockPort::new();
        mock.set_responder(ncp_peer(|chan, payload| {
            // Reply once on a channel nobody owns, then echo.
            vec![(99, vec![0xaa]), (chan, payload.to_vec())]
        }));
        let mut ncp = ncp_over(&mock);

        let id = ncp.connect("SYS$RFSV").unwrap();
        ncp.register(id).unwrap();

        let mut b = Buffer::new();
        b.add_bytes(&[1, 2, 3]);
        ncp.send(id, &b).unwrap();
        let got = ncp.recv_on(id).unwrap();
        assert_eq!(&[1, 2, 3], got.as_slice());
    }

    #[test]
    fn test_silent_peer_is_link_down() {
        let mock = MockPort::new();
        mock.set_responder(ncp_peer(|_, _| vec![]));
        let mut ncp = ncp_over(&mock);
        let id = ncp.connect("SYS$RFSV").unwrap();
        ncp.register(id).unwrap();

        let b = Buffer::new();
        ncp.send(id, &b).unwrap();
        let err = ncp.recv_on(id).unwrap_err();
        assert_eq!(ErrorKind::LinkDisconnected, err.kind());
        assert!(!ncp.is_up());
    }

    #[test]
    fn test_send_on_unconnected_channel() {
        let mock = MockPort::new();
        let mut ncp = ncp_over(&mock);
        let b = Buffer::new();
        assert_eq!(
            ErrorKind::LinkDisconnected,
            ncp.send(5, &b).unwrap_err().kind()
        );
    }

    #[test]
    fn test_reconnect_reregisters_channels() {
        let mock = MockPort::new();
        mock.set_responder(ncp_peer(|chan, payload| vec![(chan, payload.to_vec())]));
        let mut ncp = ncp_over(&mock);

        let id = ncp.connect("SYS$RFSV").unwrap();
        ncp.register(id).unwrap();

        // Drop the line, then restore it and reconnect.
        mock.set_lines(ModemLines::default());
        let b = Buffer::new();
        ncp.send(id, &b).unwrap();
        assert!(ncp.recv_on(id).is_err());

        mock.set_lines(ModemLines::DSR | ModemLines::CTS);
        ncp.reconnect().unwrap();
        assert!(ncp.is_up());

        let mut b = Buffer::new();
        b.add_bytes(&[9]);
        ncp.send(id, &b).unwrap();
        assert_eq!(&[9], ncp.recv_on(id).unwrap().as_slice());
    }
}
