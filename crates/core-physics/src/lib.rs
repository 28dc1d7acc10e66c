//! Spring-damper fluid physics engine (§4.F). Turns each zone's Kalman
//! estimate into a per-LED, per-channel target and integrates a
//! second-order Euler spring toward it, adding a small advection term that
//! pulls each LED toward its circular neighbours (i-1, i+1) so motion
//! propagates spatially along the strip instead of each LED drifting in
//! isolation.

/// Flow-phase advance rate, radians per second. Chosen to produce a slow,
/// barely-perceptible drift (about one full cycle every ~4 seconds) rather
/// than a value derived from the spec, which leaves it unspecified.
const PHASE_RATE: f64 = 1.5;
/// Per-LED phase offset, radians. Unspecified by the source; chosen so
/// adjacent LEDs visibly desynchronize within a 60-LED strip.
const K_PHASE: f64 = 0.35;
const SNAP_THRESHOLD: f64 = 120.0;
const ZETA: f64 = 1.0;
const K_MIN: f64 = 0.02;
const K_MAX: f64 = 0.2;

/// Second-order spring state for a single colour channel of a single LED.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spring {
    pub position: f64,
    pub velocity: f64,
    pub target: f64,
}

impl Spring {
    fn step(&mut self, dt: f64, k: f64, advection: f64) {
        if (self.target - self.position).abs() > SNAP_THRESHOLD {
            self.position = self.target;
            self.velocity = 0.0;
            return;
        }
        let f_att = k * (self.target - self.position);
        let f_damp = -self.velocity * 2.0 * ZETA * k.sqrt();
        self.velocity += (f_att + f_damp + advection) * dt;
        self.position += self.velocity * dt;
    }

    fn output(&self) -> u8 {
        self.position.clamp(0.0, 255.0).round() as u8
    }
}

/// One-sided IIR estimate of how "busy" the scene is, driving spring
/// stiffness (§4.F, "Scene intensity I").
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneIntensity(pub f64);

impl SceneIntensity {
    pub fn new() -> Self {
        Self(0.0)
    }

    /// Update from the median per-zone Euclidean distance between this
    /// frame's Kalman output and the previously emitted colour.
    pub fn update(&mut self, current: &[[f64; 3]], last_output: &[[f64; 3]]) {
        let mut distances: Vec<f64> = current
            .iter()
            .zip(last_output)
            .map(|(c, l)| {
                let dr = c[0] - l[0];
                let dg = c[1] - l[1];
                let db = c[2] - l[2];
                (dr * dr + dg * dg + db * db).sqrt()
            })
            .collect();
        distances.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let d = median(&distances);
        let i_new = (d / 120.0).clamp(0.0, 1.0);
        self.0 = if i_new > self.0 {
            i_new
        } else {
            0.85 * self.0 + 0.15 * i_new
        };
    }
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// N LEDs x 3 channels of spring state, advanced one frame at a time.
pub struct PhysicsEngine {
    springs: Vec<[Spring; 3]>,
    phase: f64,
}

impl PhysicsEngine {
    pub fn new(led_count: usize) -> Self {
        Self {
            springs: vec![[Spring::default(); 3]; led_count],
            phase: 0.0,
        }
    }

    pub fn resize(&mut self, led_count: usize) {
        self.springs = vec![[Spring::default(); 3]; led_count];
        self.phase = 0.0;
    }

    pub fn len(&self) -> usize {
        self.springs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.springs.is_empty()
    }

    /// Advance all springs by `dt` seconds toward `targets[i] = [r, g, b]`,
    /// returning the clamped 8-bit output per LED.
    ///
    /// Advection couples each LED to its circular neighbours (i-1, i+1):
    /// the pull is toward their average position, scaled by
    /// `sin(phase + i*K_PHASE) * 0.1 * k` so the drift stays a small,
    /// slowly-shifting fraction of the primary spring force and different
    /// LEDs lead/lag each other rather than moving in lockstep.
    pub fn step(&mut self, targets: &[[f64; 3]], dt: f64, intensity: f64) -> Vec<[u8; 3]> {
        debug_assert_eq!(targets.len(), self.springs.len());
        let n = self.springs.len();
        let k = K_MIN + (K_MAX - K_MIN) * intensity.clamp(0.0, 1.0);
        self.phase += PHASE_RATE * dt;

        let positions: Vec<[f64; 3]> = self
            .springs
            .iter()
            .map(|ch| [ch[0].position, ch[1].position, ch[2].position])
            .collect();

        let mut out = Vec::with_capacity(n);
        for (i, (channels, target)) in self.springs.iter_mut().zip(targets).enumerate() {
            let weight = (self.phase + i as f64 * K_PHASE).sin() * 0.1 * k;
            let prev = (i + n - 1) % n;
            let next = (i + 1) % n;
            for (c, spring) in channels.iter_mut().enumerate() {
                let neighbour_avg = (positions[prev][c] + positions[next][c]) / 2.0;
                let advection = weight * (neighbour_avg - positions[i][c]);
                spring.target = target[c];
                spring.step(dt, k, advection);
            }
            out.push([channels[0].output(), channels[1].output(), channels[2].output()]);
        }
        out
    }
}
