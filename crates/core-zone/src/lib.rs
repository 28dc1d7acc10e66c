//! Per-zone temporal state: EMA accumulation, hybrid mean/peak mixing, and
//! the adaptive 1-D Kalman filter that produces the smoothed colour fed to
//! the physics engine (§4.D).
//!
//! `ZoneState` is the only mutable state the processing thread carries
//! across frames for the vision half of the pipeline; `Vec<ZoneState>` lives
//! alongside the spring array and is reset wholesale on geometry rebuild.

use core_vision::Accumulator;

/// Adaptive 1-D Kalman filter over a 3-channel colour, shared `P`/`Q`/`R`/`α`
/// across channels but driven by the combined residual magnitude (§4.D.3).
#[derive(Debug, Clone, Copy)]
pub struct Kalman {
    pub estimate: [f64; 3],
    pub p: f64,
    pub q: f64,
    pub r: f64,
    pub alpha: f64,
}

impl Default for Kalman {
    fn default() -> Self {
        Self {
            estimate: [0.0; 3],
            p: 1.0,
            q: 0.1,
            r: 4.0,
            alpha: 0.2,
        }
    }
}

impl Kalman {
    pub fn update(&mut self, z: [f64; 3]) {
        let p_pred = self.p + self.q;
        let resid = [
            z[0] - self.estimate[0],
            z[1] - self.estimate[1],
            z[2] - self.estimate[2],
        ];
        let rho = (resid[0] * resid[0] + resid[1] * resid[1] + resid[2] * resid[2]).sqrt();
        let t = ((rho - 2.0) / 38.0).clamp(0.0, 1.0);
        self.alpha = 0.2 + 0.3 * t;
        self.q = 0.1 + 0.3 * t;
        let r_a = self.r / (1.0 + 0.1 * rho);
        let k = p_pred / (p_pred + r_a);
        for i in 0..3 {
            self.estimate[i] += k * resid[i];
        }
        self.p = (1.0 - k) * p_pred;
    }
}

/// Persistent per-zone temporal state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneState {
    pub acc_mean: [f64; 3],
    pub acc_weight: f64,
    pub acc_peak: [f64; 3],
    pub acc_peak_saliency: f64,
    pub saliency_mean: f64,
    pub saliency_var: f64,
    pub kalman: Kalman,
    pub last_output: [f64; 3],
}

/// Fold one frame's [`Accumulator`] into `state` and return the new Kalman
/// estimate (§4.D.1-3). Zero-weight frames leave the EMA accumulators
/// untouched but still run the Kalman step against the last measurement.
pub fn update(state: &mut ZoneState, frame: &Accumulator) -> [f64; 3] {
    let alpha = state.kalman.alpha;
    if frame.weight > 0.0 {
        let blend = |acc: f64, new: f64| (1.0 - alpha) * acc + alpha * new;
        state.acc_mean = [
            blend(state.acc_mean[0], frame.r),
            blend(state.acc_mean[1], frame.g),
            blend(state.acc_mean[2], frame.b),
        ];
        state.acc_weight = blend(state.acc_weight, frame.weight);
        state.acc_peak = [
            blend(state.acc_peak[0], frame.peak_r as f64),
            blend(state.acc_peak[1], frame.peak_g as f64),
            blend(state.acc_peak[2], frame.peak_b as f64),
        ];
        state.acc_peak_saliency = blend(state.acc_peak_saliency, frame.peak_saliency);

        let frame_mean = if frame.pixel_count > 0 {
            frame.sum_sw / frame.pixel_count as f64
        } else {
            0.0
        };
        let frame_var = if frame.pixel_count > 0 {
            (frame.sum_sw2 / frame.pixel_count as f64 - frame_mean * frame_mean).max(0.0)
        } else {
            0.0
        };
        state.saliency_mean = blend(state.saliency_mean, frame_mean);
        state.saliency_var = blend(state.saliency_var, frame_var);
    }

    let mean = if state.acc_weight > 0.0 {
        [
            state.acc_mean[0] / state.acc_weight,
            state.acc_mean[1] / state.acc_weight,
            state.acc_mean[2] / state.acc_weight,
        ]
    } else {
        [0.0; 3]
    };
    let cv = if state.saliency_mean > 0.0 {
        state.saliency_var.sqrt() / state.saliency_mean
    } else {
        0.0
    };
    let m = ((cv - 0.3) * 2.0).clamp(0.0, 1.0);
    let z = [
        (1.0 - m) * mean[0] + m * state.acc_peak[0],
        (1.0 - m) * mean[1] + m * state.acc_peak[1],
        (1.0 - m) * mean[2] + m * state.acc_peak[2],
    ];

    state.kalman.update(z);
    state.kalman.estimate
}
