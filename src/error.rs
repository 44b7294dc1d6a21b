//! Link error model.
//!
//! The device reports a signed status in `[-43, 0]` with every response;
//! the table below maps it to a stable kind. Anything outside that range
//! is a protocol violation and surfaces as `InternalFatal` — the code is
//! logged, never guessed at. Transport failures (framing, serial I/O, bad
//! response tags) all surface as `LinkDisconnected`, which the service
//! layer answers with a single reconnect attempt.

use crate::log;
use crate::serialport;
use std::error::Error as StdError;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    LinkDisconnected,
    Cancelled,
    InvalidArg,
    NotSupported,
    NoMemory,
    BadHandle,
    NotFound,
    Exists,
    IsDirectory,
    Eof,
    AccessDenied,
    ReadOnly,
    Locked,
    WriteError,
    Corrupt,
    Unknown,
    NotReady,
    Completion,
    Busy,
    Terminated,
    InUse,
    Died,
    Range,
    NoDevice,
    Full,
    DirFull,
    Over,
    Under,
    Power,
    Divide,
    TooBig,
    Abort,
    Name,
    Driver,
    Line,
    Frame,
    Overrun,
    Parity,
    Retransmit,
    Connect,
    DiscGeneric,
    Descr,
    Lib,
    Fsys,
    InternalFatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LinkDisconnected => "link disconnected",
            ErrorKind::Cancelled => "operation cancelled",
            ErrorKind::InvalidArg => "invalid argument",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::NoMemory => "out of memory",
            ErrorKind::BadHandle => "bad handle",
            ErrorKind::NotFound => "no such file or directory",
            ErrorKind::Exists => "file already exists",
            ErrorKind::IsDirectory => "is a directory",
            ErrorKind::Eof => "end of file",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::ReadOnly => "read only",
            ErrorKind::Locked => "file locked",
            ErrorKind::WriteError => "write error",
            ErrorKind::Corrupt => "file corrupt",
            ErrorKind::Unknown => "general failure",
            ErrorKind::NotReady => "device not ready",
            ErrorKind::Completion => "completion error",
            ErrorKind::Busy => "server busy",
            ErrorKind::Terminated => "server terminated",
            ErrorKind::InUse => "in use",
            ErrorKind::Died => "resource died",
            ErrorKind::Range => "out of range",
            ErrorKind::NoDevice => "no such device",
            ErrorKind::Full => "device full",
            ErrorKind::DirFull => "directory full",
            ErrorKind::Over => "overflow",
            ErrorKind::Under => "underflow",
            ErrorKind::Power => "power failure",
            ErrorKind::Divide => "division by zero",
            ErrorKind::TooBig => "too big",
            ErrorKind::Abort => "aborted",
            ErrorKind::Name => "bad name",
            ErrorKind::Driver => "bad driver",
            ErrorKind::Line => "comms line failure",
            ErrorKind::Frame => "comms frame error",
            ErrorKind::Overrun => "comms overrun",
            ErrorKind::Parity => "comms parity error",
            ErrorKind::Retransmit => "retransmission failed",
            ErrorKind::Connect => "could not connect",
            ErrorKind::DiscGeneric => "disconnected",
            ErrorKind::Descr => "bad descriptor",
            ErrorKind::Lib => "bad library entry",
            ErrorKind::Fsys => "filesystem error",
            ErrorKind::InternalFatal => "internal fatal error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    description: String,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, description: &str) -> Error {
        Error {
            kind,
            description: description.to_string(),
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Error {
        Error {
            kind,
            description: kind.as_str().to_string(),
        }
    }

    /// A response payload shorter than its fixed layout requires.
    pub fn truncated() -> Error {
        Error::new(ErrorKind::Corrupt, "truncated response payload")
    }

    pub fn disconnected(description: &str) -> Error {
        Error::new(ErrorKind::LinkDisconnected, description)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn desc(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.description)
    }
}

impl StdError for Error {}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Error {
        Error::new(
            ErrorKind::LinkDisconnected,
            &format!("serial port error: {}", e),
        )
    }
}

// Status -43 (directory full) .. -1 (not found), most negative first.
const STATUS_TABLE: [ErrorKind; 43] = [
    ErrorKind::DirFull,
    ErrorKind::Power,
    ErrorKind::Divide,
    ErrorKind::TooBig,
    ErrorKind::Abort,
    ErrorKind::Descr,
    ErrorKind::Lib,
    ErrorKind::NoDevice,
    ErrorKind::DiscGeneric,
    ErrorKind::Connect,
    ErrorKind::Retransmit,
    ErrorKind::Parity,
    ErrorKind::Overrun,
    ErrorKind::Frame,
    ErrorKind::Line,
    ErrorKind::Name,
    ErrorKind::Driver,
    ErrorKind::Full,
    ErrorKind::Eof,
    ErrorKind::Fsys,
    ErrorKind::WriteError,
    ErrorKind::Locked,
    ErrorKind::AccessDenied,
    ErrorKind::Corrupt,
    ErrorKind::ReadOnly,
    ErrorKind::NotReady,
    ErrorKind::Completion,
    ErrorKind::Busy,
    ErrorKind::Terminated,
    ErrorKind::InUse,
    ErrorKind::Died,
    ErrorKind::IsDirectory,
    ErrorKind::Exists,
    ErrorKind::Under,
    ErrorKind::Over,
    ErrorKind::BadHandle,
    ErrorKind::Range,
    ErrorKind::InvalidArg,
    ErrorKind::NotSupported,
    ErrorKind::NoMemory,
    ErrorKind::Cancelled,
    ErrorKind::Unknown,
    ErrorKind::NotFound,
];

/// Map a device status word to a result. Zero is success; `[-43, -1]` is
/// looked up in the table; anything else is a protocol violation.
pub fn status_to_result(status: i32) -> Result<()> {
    if status == 0 {
        return Ok(());
    }
    if !(-43..0).contains(&status) {
        log::error(&format!("invalid status code from device: {}", status));
        return Err(Error::new(
            ErrorKind::InternalFatal,
            &format!("invalid status code from device: {}", status),
        ));
    }
    Err(Error::from_kind(STATUS_TABLE[(status + 43) as usize]))
}
