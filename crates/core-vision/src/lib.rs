//! Saliency-weighted pixel sampling (§4.C) and tone mapping (§4.E).
//!
//! The sampler walks a BGRA frame buffer at quarter resolution (stride 2 in
//! both axes), bins each sampled pixel into a zone using the boundary
//! angles from `core-geometry`, and accumulates weighted colour moments.
//! Nothing here owns state across frames — [`Accumulator`] is a per-frame,
//! per-zone scratch value; `core-zone` is responsible for temporal blending.

use core_geometry::Geometry;

/// Per-zone, per-frame accumulation of saliency-weighted colour moments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accumulator {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub weight: f64,
    pub peak_r: u8,
    pub peak_g: u8,
    pub peak_b: u8,
    pub peak_saliency: f64,
    pub sum_sw: f64,
    pub sum_sw2: f64,
    pub pixel_count: u32,
}

/// A BGRA frame buffer as handed off by the frame source (§6).
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

/// Per-pixel saliency in `[0, 1]`: sigmoid over chroma saturation, clamped
/// by a luminance gate that suppresses near-black pixels (§4.C.1).
pub fn saliency(r: f64, g: f64, b: f64) -> f64 {
    let avg = (r + g + b) / 3.0;
    let dev = (r - avg).abs() + (g - avg).abs() + (b - avg).abs();
    let s = if avg > 0.0 { dev / avg } else { 0.0 };
    let y = 0.299 * r * r + 0.587 * g * g + 0.114 * b * b;
    let sigmoid = 1.0 / (1.0 + (-15.0 * (s - 0.4)).exp());
    sigmoid * (y / 1600.0).min(1.0)
}

/// Sample `frame` against `geometry`, returning one [`Accumulator`] per
/// zone. Quarter-resolution stride; BGRA byte order per §6.
pub fn sample(frame: &Frame<'_>, geometry: &Geometry) -> Vec<Accumulator> {
    let mut accs = vec![Accumulator::default(); geometry.zone_count()];
    let diag = ((frame.width * frame.width + frame.height * frame.height) as f64).sqrt();
    let half_diag = diag / 2.0;
    let ox = geometry.origin.x;
    let oy = geometry.origin.y;

    let mut y = 0u32;
    while y < frame.height {
        let row = (y * frame.bytes_per_row) as usize;
        let mut x = 0u32;
        while x < frame.width {
            let idx = row + (x * 4) as usize;
            if idx + 3 >= frame.data.len() {
                x += 2;
                continue;
            }
            let b = frame.data[idx] as f64;
            let g = frame.data[idx + 1] as f64;
            let r = frame.data[idx + 2] as f64;

            let sigma = saliency(r, g, b);
            let dx = x as f64 - ox;
            let dy = y as f64 - oy;
            let theta = dy.atan2(dx);
            let zone = geometry.zone_for_angle(theta);
            let dist = (dx * dx + dy * dy).sqrt();
            let w = 1.0 + 0.6 * (dist / half_diag).min(1.0);
            let sw = sigma * w;

            let acc = &mut accs[zone];
            acc.r += r * sw;
            acc.g += g * sw;
            acc.b += b * sw;
            acc.weight += sw;
            if sigma > acc.peak_saliency {
                acc.peak_saliency = sigma;
                acc.peak_r = r as u8;
                acc.peak_g = g as u8;
                acc.peak_b = b as u8;
            }
            acc.sum_sw += sw;
            acc.sum_sw2 += sw * sw;
            acc.pixel_count += 1;

            x += 2;
        }
        y += 2;
    }
    accs
}

/// Per-channel calibration gain applied before gamma (§4.E.b).
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            r: 1.0,
            g: 1.0,
            b: 1.0,
        }
    }
}

/// Tone-map a linear RGB triple (already Kalman-smoothed / physics-driven)
/// into an 8-bit output colour, per §4.E: saturation boost, calibration
/// gain, gamma, then headroom-preserving brightness scale. Returns
/// unclamped floats so a downstream physics engine can spring toward the
/// true target rather than a pre-rounded one; use [`tone_map`] when the
/// 8-bit result is wanted directly (e.g. non-`sync` modes with no physics
/// stage in between).
pub fn tone_map_continuous(
    rgb: [f64; 3],
    calibration: Calibration,
    gamma: f32,
    saturation: f32,
    brightness: f32,
) -> [f64; 3] {
    let [r, g, b] = rgb;
    let luma = 0.299 * r + 0.587 * g + 0.114 * b;
    let boost = saturation as f64 * 1.1;
    let sat = |c: f64| luma + (c - luma) * boost;

    let mut r = sat(r) * calibration.r as f64;
    let mut g = sat(g) * calibration.g as f64;
    let mut b = sat(b) * calibration.b as f64;

    let gamma_fn = |c: f64| 255.0 * (c.max(0.0) / 255.0).powf(gamma as f64);
    r = gamma_fn(r);
    g = gamma_fn(g);
    b = gamma_fn(b);

    let m = r.max(g).max(b);
    let brightness = brightness as f64;
    let scale = if m * brightness > 255.0 && m > 0.0 {
        255.0 / m
    } else {
        brightness
    };
    [r * scale, g * scale, b * scale]
}

/// Tone-map straight to an 8-bit clamped colour (§4.E). See
/// [`tone_map_continuous`] for the float variant used ahead of the physics
/// stage.
pub fn tone_map(
    rgb: [f64; 3],
    calibration: Calibration,
    gamma: f32,
    saturation: f32,
    brightness: f32,
) -> [u8; 3] {
    let [r, g, b] = tone_map_continuous(rgb, calibration, gamma, saturation, brightness);
    [clamp255(r), clamp255(g), clamp255(b)]
}

fn clamp255(v: f64) -> u8 {
    v.clamp(0.0, 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_geometry::{CaptureRect, OriginMode, ZoneCounts};

    #[test]
    fn saliency_is_bounded_and_zero_for_black() {
        assert_eq!(saliency(0.0, 0.0, 0.0), 0.0);
        for &(r, g, b) in &[(255.0, 0.0, 0.0), (10.0, 250.0, 3.0), (128.0, 128.0, 128.0)] {
            let s = saliency(r, g, b);
            assert!((0.0..=1.0).contains(&s), "saliency {s} out of bounds");
        }
    }

    #[test]
    fn sample_red_frame_concentrates_weight_in_red_channel() {
        let counts = ZoneCounts {
            left: 5,
            top: 5,
            right: 5,
            bottom: 5,
        };
        let rect = CaptureRect {
            x: 0.0,
            y: 0.0,
            width: 64.0,
            height: 64.0,
        };
        let geo = core_geometry::build(counts, rect, OriginMode::Auto).unwrap();
        let mut data = vec![0u8; (64 * 64 * 4) as usize];
        for px in data.chunks_exact_mut(4) {
            px[0] = 0; // B
            px[1] = 0; // G
            px[2] = 255; // R
            px[3] = 255;
        }
        let frame = Frame {
            data: &data,
            width: 64,
            height: 64,
            bytes_per_row: 64 * 4,
        };
        let accs = sample(&frame, &geo);
        assert_eq!(accs.len(), 20);
        let total_weight: f64 = accs.iter().map(|a| a.weight).sum();
        assert!(total_weight > 0.0);
        for acc in &accs {
            if acc.weight > 0.0 {
                assert!(acc.r / acc.weight > acc.b / acc.weight);
            }
        }
    }

    #[test]
    fn tone_map_clamps_to_byte_range() {
        let out = tone_map(
            [400.0, 300.0, -10.0],
            Calibration::default(),
            1.0,
            1.0,
            2.0,
        );
        for c in out {
            assert!((0..=255).contains(&(c as i32)));
        }
    }

    #[test]
    fn tone_map_preserves_hue_when_clipping_brightness() {
        let out = tone_map([200.0, 100.0, 50.0], Calibration::default(), 1.0, 1.0, 3.0);
        assert_eq!(out[0], 255);
        assert!(out[1] < out[0]);
        assert!(out[2] < out[1]);
    }
}
