//! Client side of the PSION link protocol.
//!
//! The layers stack bottom-up: `serialport` owns the device, `packet`
//! frames the byte stream with byte stuffing and a CRC16 trailer, `ncp`
//! multiplexes logical channels over the framed link, and `rfsv`/`rpcs`
//! speak the request/response service protocols on registered channels.
//! `Link` wires the stack together and hands out service endpoints that
//! share the one multiplexer.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

pub mod buffer;
pub mod channel;
pub mod config;
pub mod crc16;
pub mod error;
pub mod log;
pub mod ncp;
pub mod packet;
pub mod rfsv;
pub mod rpcs;
pub mod serialport;
pub mod termios;
pub mod time;

#[cfg(test)]
pub(crate) mod testutil;

use error::{Error, ErrorKind, Result};
use ncp::Ncp;
use packet::{HandshakePolicy, Packet};
use serialport::{baud_from_u32, BaudRate, Endpoint, SerialPort};

/// One serial link to a device. Service endpoints created from the same
/// `Link` share its multiplexer and framer.
pub struct Link {
    ncp: Rc<RefCell<Ncp>>,
}

impl Link {
    pub fn open(device: &str, baud: BaudRate, policy: HandshakePolicy) -> Result<Link> {
        let port = SerialPort::new(device, baud, Duration::from_secs(2))?;
        Ok(Link::with_endpoint(Box::new(port), policy))
    }

    /// Build the stack over an arbitrary endpoint.
    pub fn with_endpoint(port: Box<dyn Endpoint>, policy: HandshakePolicy) -> Link {
        let packet = Packet::new(port, policy);
        Link {
            ncp: Rc::new(RefCell::new(Ncp::new(packet))),
        }
    }

    /// Open the link described by a config file: `serial.device`,
    /// `serial.baud` and optionally `serial.handshake` (`cts` or
    /// `dsr+cts`).
    pub fn from_config(cfg: &config::Config) -> Result<Link> {
        let baud: u32 = match cfg.get("serial.baud") {
            Some(n) => n
                .parse()
                .map_err(|_| Error::new(ErrorKind::InvalidArg, "bad serial.baud in config"))?,
            None => return Err(Error::new(ErrorKind::InvalidArg, "no serial.baud in config")),
        };
        let device = match cfg.get("serial.device") {
            Some(d) => d,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidArg,
                    "no serial.device in config",
                ))
            }
        };
        let policy = match cfg.get("serial.handshake").map(|s| s.as_str()) {
            Some("cts") => HandshakePolicy::CtsOnly,
            Some("dsr+cts") | None => HandshakePolicy::DsrAndCts,
            Some(other) => {
                return Err(Error::new(
                    ErrorKind::InvalidArg,
                    &format!("unknown serial.handshake {:?}", other),
                ))
            }
        };
        Link::open(device, baud_from_u32(baud)?, policy)
    }

    /// Filesystem service endpoint.
    pub fn rfsv(&self) -> rfsv::Rfsv {
        rfsv::Rfsv::new(self.ncp.clone())
    }

    /// Remote procedure service endpoint.
    pub fn rpcs(&self) -> rpcs::Rpcs {
        rpcs::Rpcs::new(self.ncp.clone())
    }

    /// Peer-advertised NCP version, queried once per link.
    pub fn protocol_version(&self) -> Result<u16> {
        self.ncp.borrow_mut().protocol_version()
    }
}
