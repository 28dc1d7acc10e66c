//! Custom baud rate fallback for Linux, via the `termios2`/`BOTHER` ioctl
//! pair. `serialport` accepts arbitrary `u32` baud rates and already routes
//! non-standard values through this path on Linux internally for most
//! distros' glibc; this module exists as an explicit, auditable fallback
//! for the direct-integer custom rates up to 3,000,000 called out in §4.I
//! and §6, used only when the crate's own attempt fails.

use std::io;
use std::os::unix::io::RawFd;

const TCGETS2: libc::c_ulong = 0x802C_542A;
const TCSETS2: libc::c_ulong = 0x402C_542B;
const BOTHER: libc::tcflag_t = 0o010000;

#[repr(C)]
#[allow(non_camel_case_types)]
struct termios2 {
    c_iflag: libc::tcflag_t,
    c_oflag: libc::tcflag_t,
    c_cflag: libc::tcflag_t,
    c_lflag: libc::tcflag_t,
    c_line: libc::cc_t,
    c_cc: [libc::cc_t; 19],
    c_ispeed: libc::speed_t,
    c_ospeed: libc::speed_t,
}

/// Set an arbitrary baud rate on `fd` via `BOTHER`, bypassing the fixed
/// `Bnnnn` constant table. Returns an `io::Error` on ioctl failure; callers
/// should treat this as best-effort and fall back to the nearest standard
/// preset if it fails.
pub fn set_custom_baud(fd: RawFd, baud: u32) -> io::Result<()> {
    if baud == 0 || baud > crate::MAX_CUSTOM_BAUD {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("baud {baud} outside supported range"),
        ));
    }
    unsafe {
        let mut term: termios2 = std::mem::zeroed();
        if libc::ioctl(fd, TCGETS2, &mut term) != 0 {
            return Err(io::Error::last_os_error());
        }
        term.c_cflag &= !libc::CBAUD as libc::tcflag_t;
        term.c_cflag |= BOTHER;
        term.c_ispeed = baud;
        term.c_ospeed = baud;
        if libc::ioctl(fd, TCSETS2, &term) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_baud() {
        assert!(set_custom_baud(0, 0).is_err());
        assert!(set_custom_baud(0, crate::MAX_CUSTOM_BAUD + 1).is_err());
    }
}
