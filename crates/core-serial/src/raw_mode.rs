//! Extra termios hardening applied on top of the `serialport` crate's own
//! setup, to match §4.I's raw-mode contract precisely: no canonical mode,
//! no echo, no signal generation, no output post-processing, `VMIN=1`,
//! `VTIME=0`. `serialport` already configures most of this on Unix; this
//! pass is defensive, not load-bearing, and any ioctl failure here is
//! logged rather than propagated as a fatal error since the port may
//! already be perfectly usable.

use libc::{c_int, tcgetattr, tcsetattr, termios, TCSANOW};
use std::io;
use std::os::unix::io::RawFd;

pub(crate) fn apply(fd: RawFd) -> Result<(), crate::SerialError> {
    unsafe {
        let mut term: termios = std::mem::zeroed();
        if tcgetattr(fd, &mut term) != 0 {
            return Err(crate::SerialError::Io(io::Error::last_os_error()));
        }

        term.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY | libc::BRKINT | libc::ICRNL);
        term.c_oflag &= !libc::OPOST;
        term.c_lflag &= !(libc::ICANON | libc::ECHO | libc::ECHOE | libc::ISIG);
        term.c_cflag |= libc::CLOCAL | libc::CREAD;
        term.c_cc[libc::VMIN] = 1;
        term.c_cc[libc::VTIME] = 0;

        let rc: c_int = tcsetattr(fd, TCSANOW, &term);
        if rc != 0 {
            tracing::warn!(
                target: "serial",
                error = %io::Error::last_os_error(),
                "tcsetattr hardening failed; continuing with serialport's defaults"
            );
        }
    }
    Ok(())
}
