//! Device handshake probe (§4.I, §6): write `"Moni-A"`, wait 100ms, read up
//! to 64 bytes, and return the trimmed UTF-8 response if any.

use std::io::{Read, Write};
use std::time::Duration;

pub const PROBE_COMMAND: &[u8] = b"Moni-A";
const RESPONSE_WAIT: Duration = Duration::from_millis(100);
const MAX_RESPONSE_BYTES: usize = 64;

/// Run the handshake against an already-open byte stream. Any non-empty
/// trimmed response identifies a device; a timeout or empty read yields
/// `None` rather than an error, since "no device here" is a normal result
/// of an enumeration sweep.
pub fn probe<P: Read + Write>(port: &mut P) -> std::io::Result<Option<String>> {
    port.write_all(PROBE_COMMAND)?;
    port.flush()?;
    std::thread::sleep(RESPONSE_WAIT);

    let mut buf = [0u8; MAX_RESPONSE_BYTES];
    let n = port.read(&mut buf).unwrap_or(0);
    if n == 0 {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&buf[..n]);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}
