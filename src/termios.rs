//! Module providing some convience functions for using termios
//!
//! The link wants the tty fully raw: 8-N-1, no flow control, no echo,
//! no line discipline translation. `configure_raw` applies that profile
//! plus the timed-read behaviour the packet framer relies on.
use crate::serialport::Result;

use nix::sys::termios::{
    cfsetispeed, cfsetospeed, tcgetattr, tcsetattr, BaudRate, ControlFlags, InputFlags,
    LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices, Termios,
};
use std::os::unix::io::RawFd;
use std::time::Duration;

pub fn get_termios(fd: &RawFd) -> Result<Termios> {
    let termios = match tcgetattr(*fd) {
        Ok(t) => t,
        Err(e) => return Err(e.into()),
    };

    Ok(termios)
}

pub fn set_termios(fd: &mut RawFd, termios: &Termios) -> Result<()> {
    match tcsetattr(*fd, SetArg::TCSANOW, termios) {
        Ok(_) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Put the descriptor into the link's line mode: raw 8-N-1 at `baud`,
/// modem lines left to the framer's ioctls, and reads that return after
/// `timeout` with whatever arrived (possibly nothing).
pub fn configure_raw(fd: &mut RawFd, baud: BaudRate, timeout: Duration) -> Result<()> {
    let mut settings = get_termios(fd)?;

    settings.control_flags &= !ControlFlags::PARENB;
    settings.control_flags &= !ControlFlags::CSTOPB;
    settings.control_flags &= !ControlFlags::CSIZE;
    settings.control_flags |= ControlFlags::CS8;
    settings.control_flags &= !ControlFlags::CRTSCTS;
    settings.control_flags |= ControlFlags::CREAD | ControlFlags::CLOCAL;
    settings.local_flags &= !LocalFlags::ICANON;
    settings.local_flags &= !LocalFlags::ECHO;
    settings.local_flags &= !LocalFlags::ECHOE;
    settings.local_flags &= !LocalFlags::ECHONL;
    settings.local_flags &= !LocalFlags::ISIG;
    settings.input_flags &= !(InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY);
    settings.input_flags &= !(InputFlags::IGNBRK
        | InputFlags::BRKINT
        | InputFlags::PARMRK
        | InputFlags::ISTRIP
        | InputFlags::INLCR
        | InputFlags::ICRNL);
    settings.output_flags &= !OutputFlags::OPOST;
    settings.output_flags &= !OutputFlags::ONLCR;

    // VTIME's units are deciseconds, so the longest expressible timeout
    // is 25.5 seconds.
    let vtime = {
        let sec = timeout.as_secs_f32();
        if sec > 25.5 {
            255
        } else {
            (sec * 10.0) as u8
        }
    };
    settings.control_chars[SpecialCharacterIndices::VTIME as usize] = vtime;
    // VMIN 0: a read on an idle line returns 0 after VTIME instead of
    // blocking for the first byte.
    settings.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;

    cfsetospeed(&mut settings, baud)?;
    cfsetispeed(&mut settings, baud)?;
    set_termios(fd, &settings)
}
