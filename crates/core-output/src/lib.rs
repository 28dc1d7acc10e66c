//! Output pipeline stages that run after the physics engine: orientation
//! remap and spatial-consistency repair (§4.G), the ABL power limiter
//! (§4.H), and Adalight/Skydimo wire framing (§6).

/// LED wiring orientation relative to the logical zone order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Standard,
    Reverse,
}

/// Remap `seq` in place for reversed wiring. Verified against the worked
/// example (orientation=reverse, bottom=10, N=60): reversing the full
/// sequence and then rotating the first `bottom` entries to the end
/// produces `(49, 48, .., 0, 59, 58, .., 50)`, matching the spec's own
/// example more precisely than its prose ("move the *last* `bottom`
/// entries", which is a no-op immediately after a full reversal).
pub fn apply_orientation<T>(seq: &mut Vec<T>, orientation: Orientation, bottom: u16) {
    if orientation != Orientation::Reverse {
        return;
    }
    seq.reverse();
    let bottom = (bottom as usize).min(seq.len());
    seq.rotate_left(bottom);
}

fn distance(a: [u8; 3], b: [u8; 3]) -> f64 {
    let dr = a[0] as f64 - b[0] as f64;
    let dg = a[1] as f64 - b[1] as f64;
    let db = a[2] as f64 - b[2] as f64;
    (dr * dr + dg * dg + db * db).sqrt()
}

/// Detect and soften a lone outlier LED: if a zone differs sharply from
/// both neighbours, but the neighbours agree with each other, blend it
/// halfway toward their midpoint (§4.G "Spatial consistency").
pub fn repair_spatial_consistency(seq: &mut [[u8; 3]]) {
    let n = seq.len();
    if n < 3 {
        return;
    }
    let original = seq.to_vec();
    for i in 0..n {
        let p = original[(i + n - 1) % n];
        let c = original[i];
        let next = original[(i + 1) % n];
        if distance(c, p) > 50.0 && distance(c, next) > 50.0 && distance(p, next) < 50.0 {
            let mid = [
                (p[0] as f64 + next[0] as f64) / 2.0,
                (p[1] as f64 + next[1] as f64) / 2.0,
                (p[2] as f64 + next[2] as f64) / 2.0,
            ];
            seq[i] = [
                ((c[0] as f64 + mid[0]) / 2.0).round() as u8,
                ((c[1] as f64 + mid[1]) / 2.0).round() as u8,
                ((c[2] as f64 + mid[2]) / 2.0).round() as u8,
            ];
        }
    }
}

/// Auto Brightness Limiter mode (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Abl,
    GlobalCap,
    SmartFallback,
}

/// Estimated milliamps drawn per one-unit increase of a single channel on a
/// single LED. Not specified numerically by the source; chosen to be in the
/// right order of magnitude for common WS2812-class strips (~60mA at full
/// white per LED, linear in the sum of the three channels).
pub const MILLIAMPS_PER_UNIT: f64 = 60.0 / (255.0 * 3.0);

/// Apply the ABL rescale in place. Returns whether the limiter engaged
/// (`isPowerLimited`).
pub fn apply_abl(seq: &mut [[u8; 3]], limit_ma: f64) -> bool {
    let estimated: f64 = seq
        .iter()
        .map(|c| (c[0] as f64 + c[1] as f64 + c[2] as f64) * MILLIAMPS_PER_UNIT)
        .sum();
    if estimated <= limit_ma || estimated == 0.0 {
        return false;
    }
    let scale = (limit_ma / estimated).min(1.0);
    for c in seq.iter_mut() {
        for channel in c.iter_mut() {
            *channel = (*channel as f64 * scale).round() as u8;
        }
    }
    true
}

/// For `globalCap` mode: clamp the configured brightness factor directly to
/// the power limit before tone mapping runs (§4.H).
pub fn global_cap_brightness(configured_brightness: f32, limit: f32) -> f32 {
    configured_brightness.min(limit)
}

/// Adalight/Skydimo magic header: `Ada` + a zero fourth byte (Skydimo
/// variant omits the XOR checksum the classic Adalight protocol appends).
const FRAME_MAGIC: [u8; 4] = [0x41, 0x64, 0x61, 0x00];

/// Serialise an LED sequence into a single Adalight/Skydimo frame (§6).
pub fn frame_packet(leds: &[[u8; 3]]) -> Vec<u8> {
    debug_assert!(leds.len() <= u16::MAX as usize);
    let count = leds.len() as u16;
    let mut buf = Vec::with_capacity(6 + leds.len() * 3);
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.push((count >> 8) as u8);
    buf.push((count & 0xFF) as u8);
    for led in leds {
        buf.extend_from_slice(led);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_orientation_matches_worked_example() {
        let mut seq: Vec<u32> = (0..60).collect();
        apply_orientation(&mut seq, Orientation::Reverse, 10);
        let expected: Vec<u32> = (0..=49).rev().chain((50..=59).rev()).collect();
        assert_eq!(seq, expected);
    }

    #[test]
    fn reverse_orientation_round_trips() {
        let original: Vec<u32> = (0..60).collect();
        let mut seq = original.clone();
        apply_orientation(&mut seq, Orientation::Reverse, 10);
        apply_orientation(&mut seq, Orientation::Reverse, 10);
        assert_eq!(seq, original);
    }

    #[test]
    fn standard_orientation_is_a_no_op() {
        let original: Vec<u32> = (0..10).collect();
        let mut seq = original.clone();
        apply_orientation(&mut seq, Orientation::Standard, 3);
        assert_eq!(seq, original);
    }

    #[test]
    fn spatial_repair_softens_lone_outlier() {
        let mut seq = vec![[10u8, 10, 10]; 8];
        seq[4] = [250, 0, 0];
        repair_spatial_consistency(&mut seq);
        assert!(seq[4][0] < 250);
        assert!(seq[4][0] > 10);
    }

    #[test]
    fn spatial_repair_leaves_consistent_runs_alone() {
        let mut seq = vec![[200u8, 0, 0], [205, 0, 0], [195, 0, 0]];
        let before = seq.clone();
        repair_spatial_consistency(&mut seq);
        assert_eq!(seq, before);
    }

    #[test]
    fn abl_rescales_to_satisfy_limit() {
        let mut seq = vec![[255u8, 255, 255]; 60];
        let limited = apply_abl(&mut seq, 2000.0);
        assert!(limited);
        let estimated: f64 = seq
            .iter()
            .map(|c| (c[0] as f64 + c[1] as f64 + c[2] as f64) * MILLIAMPS_PER_UNIT)
            .sum();
        assert!(estimated <= 2000.0 + 1.0);
    }

    #[test]
    fn abl_is_a_no_op_under_budget() {
        let mut seq = vec![[10u8, 10, 10]; 60];
        assert!(!apply_abl(&mut seq, 5_000_000.0));
    }

    #[test]
    fn framing_header_and_count_for_boundary_sizes() {
        for &n in &[1usize, 255, 256, 65535] {
            let leds = vec![[1u8, 2, 3]; n];
            let packet = frame_packet(&leds);
            assert_eq!(packet.len(), 6 + 3 * n);
            assert_eq!(&packet[0..4], &FRAME_MAGIC);
            let count = ((packet[4] as u16) << 8) | packet[5] as u16;
            assert_eq!(count as usize, n);
        }
    }
}
