//! Frame source adapter (§6: "expects BGRA 8-bit little-endian, width x
//! height with `bytesPerRow` possibly > 4*width; the capture is downsampled
//! to <=360 pixels tall for performance").
//!
//! The real capture backend is platform-native (screen capture APIs) and
//! outside what a portable Rust crate can own; [`FrameSource`] is the seam a
//! platform-specific adapter would implement. [`SyntheticFrameSource`]
//! stands in for it here and is also what the test suite drives the
//! pipeline with end-to-end.

const MAX_CAPTURE_HEIGHT: u32 = 360;

pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

pub trait FrameSource: Send {
    /// Blocks until the next frame is available, or returns `None` once the
    /// source is exhausted / has been asked to stop.
    fn next_frame(&mut self) -> Option<OwnedFrame>;
}

fn downsampled_height(height: u32) -> u32 {
    height.min(MAX_CAPTURE_HEIGHT)
}

/// Produces a slow hue rotation across the whole frame. Useful for manual
/// testing and as the default source when no native capture backend is
/// wired in.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    phase: f64,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height: downsampled_height(height),
            phase: 0.0,
        }
    }
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&mut self) -> Option<OwnedFrame> {
        self.phase += 0.02;
        let bytes_per_row = self.width * 4;
        let mut data = vec![0u8; (bytes_per_row * self.height) as usize];
        let (r, g, b) = hue_to_bgr(self.phase);
        for px in data.chunks_exact_mut(4) {
            px[0] = b;
            px[1] = g;
            px[2] = r;
            px[3] = 255;
        }
        Some(OwnedFrame {
            data,
            width: self.width,
            height: self.height,
            bytes_per_row,
        })
    }
}

fn hue_to_bgr(phase: f64) -> (u8, u8, u8) {
    let h = (phase % (2.0 * std::f64::consts::PI)) / (2.0 * std::f64::consts::PI) * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    (
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_height_to_360() {
        let source = SyntheticFrameSource::new(1920, 1080);
        assert_eq!(source.height, 360);
    }

    #[test]
    fn emits_frames_with_consistent_stride() {
        let mut source = SyntheticFrameSource::new(64, 32);
        let frame = source.next_frame().unwrap();
        assert_eq!(frame.bytes_per_row, 64 * 4);
        assert_eq!(frame.data.len(), (frame.bytes_per_row * frame.height) as usize);
    }
}
