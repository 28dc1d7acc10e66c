//! Serial transport: raw-mode device open, the blocking write contract,
//! disconnect detection, device enumeration, and the Adalight handshake
//! probe (§4.I, §5, §6).
//!
//! The connection is generic over its raw byte stream so the write/error
//! contract can be exercised in tests without a real tty; [`open`] wires up
//! the real thing via the `serialport` crate.

use std::io::{self, Read, Write};
use std::time::Duration;

pub mod enumerate;
pub mod handshake;
#[cfg(target_os = "linux")]
pub mod linux_baud;
#[cfg(unix)]
mod raw_mode;

use thiserror::Error;

pub const BAUD_PRESETS: &[u32] = &[
    9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 921600,
];
pub const MAX_CUSTOM_BAUD: u32 = 3_000_000;

/// Errno values that close the descriptor and fire `on_disconnect` (§4.I).
const DISCONNECT_ERRNOS: [i32; 3] = [6 /* ENXIO */, 9 /* EBADF */, 5 /* EIO */];

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("serial device disconnected")]
    Disconnected,
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
}

/// A single logical write queue over a raw byte stream, matching the
/// "one write in flight at a time" ownership rule from §5: the serial I/O
/// thread is the only caller of [`SerialConnection::send`].
pub struct SerialConnection<P> {
    port: P,
    disconnected: bool,
    on_disconnect: Option<Box<dyn FnMut() + Send>>,
}

impl<P: Read + Write + Send> SerialConnection<P> {
    pub fn from_raw(port: P) -> Self {
        Self {
            port,
            disconnected: false,
            on_disconnect: None,
        }
    }

    pub fn set_on_disconnect<F: FnMut() + Send + 'static>(&mut self, f: F) {
        self.on_disconnect = Some(Box::new(f));
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected
    }

    /// Serialise a complete Adalight packet onto the wire: blocking write,
    /// drain, then a 4ms sleep for jitter control (§4.I "Write contract").
    pub fn send(&mut self, packet: &[u8]) -> Result<(), SerialError> {
        if self.disconnected {
            return Err(SerialError::Disconnected);
        }
        if let Err(e) = self.port.write_all(packet) {
            return Err(self.handle_io_error(e));
        }
        if let Err(e) = self.port.flush() {
            return Err(self.handle_io_error(e));
        }
        std::thread::sleep(Duration::from_millis(4));
        Ok(())
    }

    fn handle_io_error(&mut self, err: io::Error) -> SerialError {
        let errno = err.raw_os_error();
        if errno.map(|c| DISCONNECT_ERRNOS.contains(&c)).unwrap_or(false) {
            if !self.disconnected {
                self.disconnected = true;
                tracing::warn!(target: "serial", errno, "device disconnected");
                if let Some(cb) = self.on_disconnect.as_mut() {
                    cb();
                }
            }
            SerialError::Disconnected
        } else {
            tracing::warn!(target: "serial", error = %err, "partial or unexpected write error");
            SerialError::Io(err)
        }
    }
}

/// Open a real serial device at `path`/`baud` in raw 8N1 mode, no flow
/// control (§4.I, §6). Standard presets and direct custom rates up to
/// [`MAX_CUSTOM_BAUD`] are both accepted.
pub fn open(path: &str, baud: u32) -> Result<SerialConnection<Box<dyn serialport::SerialPort>>, SerialError> {
    let builder = serialport::new(path, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(0));

    #[cfg(unix)]
    let port: Box<dyn serialport::SerialPort> = {
        use std::os::unix::io::AsRawFd;
        let native = builder.open_native()?;
        raw_mode::apply(native.as_raw_fd())?;
        Box::new(native)
    };

    #[cfg(not(unix))]
    let port = builder.open()?;

    Ok(SerialConnection::from_raw(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockPort {
        written: Vec<u8>,
        fail_with_errno: Option<i32>,
        reads: VecDeque<u8>,
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.reads.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(errno) = self.fail_with_errno {
                return Err(io::Error::from_raw_os_error(errno));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn send_writes_full_packet_and_sleeps() {
        let mut conn = SerialConnection::from_raw(MockPort::default());
        let packet = vec![0x41, 0x64, 0x61, 0x00, 0x00, 0x03, 1, 2, 3];
        conn.send(&packet).unwrap();
        assert_eq!(conn.port.written, packet);
        assert!(conn.is_connected());
    }

    #[test]
    fn disconnect_errno_closes_and_fires_callback_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = fired.clone();
        let mut conn = SerialConnection::from_raw(MockPort {
            fail_with_errno: Some(6), // ENXIO
            ..Default::default()
        });
        conn.set_on_disconnect(move || {
            fired_cb.fetch_add(1, Ordering::SeqCst);
        });

        assert!(matches!(conn.send(&[1, 2, 3]), Err(SerialError::Disconnected)));
        assert!(!conn.is_connected());
        assert!(matches!(conn.send(&[1, 2, 3]), Err(SerialError::Disconnected)));
        assert_eq!(fired.load(Ordering::SeqCst), 1, "callback must fire exactly once");
    }

    #[test]
    fn non_disconnect_error_is_surfaced_but_stays_connected() {
        let mut conn = SerialConnection::from_raw(MockPort {
            fail_with_errno: Some(11), // EAGAIN, not in the disconnect set
            ..Default::default()
        });
        assert!(matches!(conn.send(&[1]), Err(SerialError::Io(_))));
        assert!(conn.is_connected());
    }
}
