//! Raw serial endpoint for the link.
//!
//! The port is configured 8-N-1, no flow control, fully raw. `VMIN` is 0
//! and `VTIME` carries the timeout, so a read on an idle line returns zero
//! bytes instead of blocking forever — the packet framer depends on that
//! to poll cooperatively. Modem control lines are read and driven through
//! the TIOCM ioctls; the framer asserts DTR/RTS and watches DSR/CTS for
//! link supervision.
use crate::log::debug;
use crate::termios::configure_raw;
use nix::fcntl::{self, OFlag};
use nix::libc;
use nix::sys::stat::Mode;
pub use nix::sys::termios::BaudRate;
use std::error::Error as StdError;
use std::fmt;
use std::ops::BitOr;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Copy, Clone)]
pub enum ErrorKind {
    Unknown,
    PortClosed,
    Errno(nix::errno::Errno),
}

#[derive(Debug)]
pub struct Error {
    /// Kind of error
    kind: ErrorKind,
    /// Long description of error
    description: String,
}

impl StdError for Error {}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        fmt.write_str(&self.description)
    }
}

impl Error {
    pub fn new(kind: ErrorKind, description: &str) -> Error {
        Error {
            kind,
            description: description.to_string(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn desc(&self) -> &String {
        &self.description
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(e: nix::errno::Errno) -> Error {
        Error::new(ErrorKind::Errno(e), e.desc())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

nix::ioctl_read_bad!(tiocmget, libc::TIOCMGET, libc::c_int);
nix::ioctl_write_ptr_bad!(tiocmset, libc::TIOCMSET, libc::c_int);

/// Snapshot of the RS232 modem control lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ModemLines {
    bits: libc::c_int,
}

impl ModemLines {
    pub const DTR: ModemLines = ModemLines { bits: libc::TIOCM_DTR };
    pub const RTS: ModemLines = ModemLines { bits: libc::TIOCM_RTS };
    pub const DSR: ModemLines = ModemLines { bits: libc::TIOCM_DSR };
    pub const CTS: ModemLines = ModemLines { bits: libc::TIOCM_CTS };
    pub const DCD: ModemLines = ModemLines { bits: libc::TIOCM_CAR };

    pub fn from_bits(bits: libc::c_int) -> ModemLines {
        ModemLines { bits }
    }

    pub fn bits(&self) -> libc::c_int {
        self.bits
    }

    pub fn contains(&self, other: ModemLines) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn dtr(&self) -> bool {
        self.contains(ModemLines::DTR)
    }

    pub fn rts(&self) -> bool {
        self.contains(ModemLines::RTS)
    }

    pub fn dsr(&self) -> bool {
        self.contains(ModemLines::DSR)
    }

    pub fn cts(&self) -> bool {
        self.contains(ModemLines::CTS)
    }

    pub fn dcd(&self) -> bool {
        self.contains(ModemLines::DCD)
    }
}

impl BitOr for ModemLines {
    type Output = ModemLines;

    fn bitor(self, rhs: ModemLines) -> ModemLines {
        ModemLines {
            bits: self.bits | rhs.bits,
        }
    }
}

/// The framer's view of the serial device. `SerialPort` is the real
/// implementation; tests substitute a scripted endpoint.
pub trait Endpoint {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn modem_lines(&self) -> Result<ModemLines>;
    fn set_modem_lines(&mut self, lines: ModemLines) -> Result<()>;

    /// Raw descriptor for reactor registration, if the endpoint has one.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Reactor registration for the serial descriptor. The event source
/// itself lives outside this crate; the framer only announces which fd
/// to watch.
pub trait IoWatch {
    fn add(&mut self, fd: RawFd);
    fn remove(&mut self, fd: RawFd);
}

pub struct SerialPort {
    fd: Option<RawFd>,
    path: String,
    baud: BaudRate,
    timeout: Duration,
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl SerialPort {
    pub fn new(path: &str, baud: BaudRate, timeout: Duration) -> Result<SerialPort> {
        Ok(SerialPort {
            path: path.into(),
            fd: None,
            baud,
            timeout,
        })
    }

    /// Write bytes from arr to open serial port
    pub fn write(&self, arr: &[u8]) -> Result<usize> {
        use nix::unistd::write;
        match self.fd {
            Some(fd) => match write(fd, arr) {
                Ok(n) => Ok(n),
                Err(e) => Err(e.into()),
            },
            None => Err(Error::new(ErrorKind::PortClosed, "Serial port is not open")),
        }
    }

    /// Read bytes from the serial port into
    /// the the supplied array
    pub fn read(&self, arr: &mut [u8]) -> Result<usize> {
        use nix::unistd::read;
        match self.fd {
            Some(fd) => match read(fd, arr) {
                Ok(n) => Ok(n),
                Err(e) => Err(e.into()),
            },
            None => Err(Error::new(ErrorKind::PortClosed, "Serial port is not open")),
        }
    }

    /// Close the serial port
    pub fn close(&mut self) -> Result<()> {
        use nix::unistd::close;
        match self.fd.take() {
            Some(fd) => match close(fd) {
                Ok(_) => Ok(()),
                Err(e) => Err(e.into()),
            },
            None => Err(Error::new(ErrorKind::PortClosed, "Serial port is not open")),
        }
    }

    /// Open the serial port in the link's raw line mode.
    pub fn open(&mut self) -> Result<()> {
        use nix::fcntl::fcntl;
        use nix::fcntl::FcntlArg::F_SETFL;
        let mut fd = match fcntl::open(
            Path::new(&self.path),
            OFlag::O_NOCTTY | OFlag::O_RDWR | OFlag::O_NONBLOCK,
            Mode::empty(),
        ) {
            Ok(n) => n,
            Err(e) => {
                debug(&format!("serial: {:?}", e));
                return Err(e.into());
            }
        };
        configure_raw(&mut fd, self.baud, self.timeout)?;
        fcntl(fd, F_SETFL(OFlag::empty()))?;
        self.fd = Some(fd);
        Ok(())
    }

    pub fn modem_lines(&self) -> Result<ModemLines> {
        match self.fd {
            Some(fd) => {
                let mut bits: libc::c_int = 0;
                match unsafe { tiocmget(fd, &mut bits) } {
                    Ok(_) => Ok(ModemLines::from_bits(bits)),
                    Err(e) => Err(e.into()),
                }
            }
            None => Err(Error::new(ErrorKind::PortClosed, "Serial port is not open")),
        }
    }

    pub fn set_modem_lines(&self, lines: ModemLines) -> Result<()> {
        match self.fd {
            Some(fd) => {
                let bits = lines.bits();
                match unsafe { tiocmset(fd, &bits) } {
                    Ok(_) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            None => Err(Error::new(ErrorKind::PortClosed, "Serial port is not open")),
        }
    }
}

impl Endpoint for SerialPort {
    fn open(&mut self) -> Result<()> {
        SerialPort::open(self)
    }

    fn close(&mut self) -> Result<()> {
        SerialPort::close(self)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        SerialPort::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        SerialPort::write(self, buf)
    }

    fn modem_lines(&self) -> Result<ModemLines> {
        SerialPort::modem_lines(self)
    }

    fn set_modem_lines(&mut self, lines: ModemLines) -> Result<()> {
        SerialPort::set_modem_lines(self, lines)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.fd
    }
}

/// Map a numeric rate from the config file to a termios constant.
pub fn baud_from_u32(baud: u32) -> Result<BaudRate> {
    let rate = match baud {
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        _ => {
            return Err(Error::new(
                ErrorKind::Unknown,
                &format!("unsupported baud rate {}", baud),
            ))
        }
    };
    Ok(rate)
}
