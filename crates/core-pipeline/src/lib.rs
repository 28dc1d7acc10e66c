//! Pipeline coordinator (§4.J): wires the vision, zone, physics, and output
//! stages together in the order the data-flow table specifies
//! (`C -> D -> E -> F -> G -> H`), owns the per-run state the processing
//! thread mutates frame-to-frame, and hosts the `smartFallback` back-off
//! state machine consumed by the serial I/O side (§4.H, §5).

use core_config::ConfigBundle;
use core_events::Mode;
use core_geometry::{CaptureRect, Geometry, OriginMode, ZoneCounts};
use core_physics::{PhysicsEngine, SceneIntensity};
use core_vision::{Calibration, Frame};
use core_zone::ZoneState;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] core_config::ConfigError),
    #[error(transparent)]
    Geometry(#[from] core_geometry::GeometryError),
}

/// Everything the processing thread owns across frames for one "run"
/// (§5): geometry, zone state, physics state, and the scene-intensity IIR.
/// Rebuilt from scratch on any config change or mode switch, never mutated
/// partially.
pub struct Coordinator {
    bundle: ConfigBundle,
    rect: CaptureRect,
    mode: Mode,
    geometry: Geometry,
    zones: Vec<ZoneState>,
    physics: PhysicsEngine,
    intensity: SceneIntensity,
    last_output: Vec<[f64; 3]>,
    power_limited: bool,
}

impl Coordinator {
    pub fn new(bundle: ConfigBundle, rect: CaptureRect) -> Result<Self, PipelineError> {
        let geometry = build_geometry(&bundle, rect)?;
        let n = geometry.zone_count();

        tracing::info!(target: "pipeline", zones = n, fps = bundle.target_frame_rate, "coordinator_start");

        Ok(Self {
            bundle,
            rect,
            mode: Mode::Sync,
            geometry,
            zones: vec![ZoneState::default(); n],
            physics: PhysicsEngine::new(n),
            intensity: SceneIntensity::new(),
            last_output: vec![[0.0; 3]; n],
            power_limited: false,
        })
    }

    pub fn zone_count(&self) -> usize {
        self.geometry.zone_count()
    }

    pub fn is_power_limited(&self) -> bool {
        self.power_limited
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Apply a control-plane event (§4.J). `ConfigChanged` rebuilds geometry
    /// and every zone/physics/intensity state from scratch against
    /// `new_bundle` rather than patching the running state in place, since
    /// zone topology (and therefore the shape of every per-zone vector) may
    /// have changed. `ModeChanged` only swaps the mode tag; callers outside
    /// `sync` are expected to bypass `process_frame` entirely and feed the
    /// output stage (`core-output`) directly from their own generator.
    pub fn handle_event(
        &mut self,
        event: &core_events::Event,
        new_bundle: Option<ConfigBundle>,
    ) -> Result<(), PipelineError> {
        match event {
            core_events::Event::ConfigChanged => {
                if let Some(bundle) = new_bundle {
                    tracing::info!(target: "pipeline", "config_changed_restart");
                    let geometry = build_geometry(&bundle, self.rect)?;
                    let n = geometry.zone_count();
                    self.bundle = bundle;
                    self.geometry = geometry;
                    self.zones = vec![ZoneState::default(); n];
                    self.physics = PhysicsEngine::new(n);
                    self.intensity = SceneIntensity::new();
                    self.last_output = vec![[0.0; 3]; n];
                    self.power_limited = false;
                }
            }
            core_events::Event::ModeChanged(mode) => {
                tracing::info!(target: "pipeline", mode = %mode, "mode_changed");
                self.mode = *mode;
            }
            _ => {}
        }
        Ok(())
    }

    /// Run one frame through §4.C-§4.H and return the ready-to-frame LED
    /// sequence (not yet Adalight-serialised; the caller owns framing so it
    /// can reuse the buffer across frames).
    pub fn process_frame(&mut self, frame: &Frame<'_>, dt: f64) -> Vec<[u8; 3]> {
        let span = tracing::debug_span!(target: "pipeline", "frame_cycle");
        let _enter = span.enter();

        let accumulators = core_vision::sample(frame, &self.geometry);

        let calibration = Calibration {
            r: self.bundle.calibration[0],
            g: self.bundle.calibration[1],
            b: self.bundle.calibration[2],
        };
        let brightness = match self.bundle.power_mode {
            core_config::PowerMode::GlobalCap => {
                core_output::global_cap_brightness(self.bundle.brightness, self.bundle.power_limit)
            }
            _ => self.bundle.brightness,
        };

        let mut targets = Vec::with_capacity(self.zones.len());
        let mut kalman_estimates = Vec::with_capacity(self.zones.len());
        for (state, acc) in self.zones.iter_mut().zip(&accumulators) {
            let z = core_zone::update(state, acc);
            kalman_estimates.push(z);
            targets.push(core_vision::tone_map_continuous(
                z,
                calibration,
                self.bundle.gamma,
                self.bundle.saturation,
                brightness,
            ));
        }

        self.intensity.update(&kalman_estimates, &self.last_output);
        let mut sequence = self.physics.step(&targets, dt, self.intensity.0);

        core_output::apply_orientation(&mut sequence, self.bundle.orientation_is_reverse(), self.bundle.zones.bottom);
        core_output::repair_spatial_consistency(&mut sequence);

        self.power_limited = match self.bundle.power_mode {
            core_config::PowerMode::Abl | core_config::PowerMode::SmartFallback => {
                core_output::apply_abl(&mut sequence, self.bundle.power_limit as f64)
            }
            core_config::PowerMode::GlobalCap => false,
        };

        self.last_output = sequence
            .iter()
            .map(|[r, g, b]| [*r as f64, *g as f64, *b as f64])
            .collect();
        sequence
    }
}

fn build_geometry(bundle: &ConfigBundle, rect: CaptureRect) -> Result<Geometry, PipelineError> {
    let counts = ZoneCounts {
        left: bundle.zones.left,
        top: bundle.zones.top,
        right: bundle.zones.right,
        bottom: bundle.zones.bottom,
    };
    let origin_mode = match bundle.perspective_origin {
        core_config::OriginMode::Auto => OriginMode::Auto,
        core_config::OriginMode::Manual { position } => OriginMode::Manual(position as f64),
    };
    Ok(core_geometry::build(counts, rect, origin_mode)?)
}

/// Small extension so `ConfigBundle`'s `Orientation` (defined in
/// `core-config` to keep that crate dependency-free of output concerns)
/// maps onto `core-output`'s own enum without a shared dependency edge.
trait OrientationExt {
    fn orientation_is_reverse(&self) -> core_output::Orientation;
}

impl OrientationExt for ConfigBundle {
    fn orientation_is_reverse(&self) -> core_output::Orientation {
        match self.orientation {
            core_config::Orientation::Standard => core_output::Orientation::Standard,
            core_config::Orientation::Reverse => core_output::Orientation::Reverse,
        }
    }
}

/// `smartFallback` reconnect/back-off state machine (§4.H, §4.J). The
/// pipeline coordinator owns frame processing; this is driven separately by
/// whichever side observes serial errors (the I/O thread, relayed as a
/// control-plane event).
pub struct SmartFallback {
    fps_steps: &'static [f32],
    step: usize,
    consecutive_errors: u32,
    next_attempt: Option<Instant>,
    base_backoff: Duration,
}

impl Default for SmartFallback {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartFallback {
    const DEFAULT_STEPS: &'static [f32] = &[60.0, 30.0, 15.0, 5.0];

    pub fn new() -> Self {
        Self {
            fps_steps: Self::DEFAULT_STEPS,
            step: 0,
            consecutive_errors: 0,
            next_attempt: None,
            base_backoff: Duration::from_millis(250),
        }
    }

    /// Current target frame rate after any back-off steps applied so far.
    pub fn current_fps(&self) -> f32 {
        self.fps_steps[self.step]
    }

    /// Record a serial error; lowers the FPS by one step (never below the
    /// last entry) and schedules the next reconnect attempt with
    /// exponential back-off.
    pub fn on_serial_error(&mut self, now: Instant) {
        self.consecutive_errors += 1;
        if self.step + 1 < self.fps_steps.len() {
            self.step += 1;
        }
        let backoff = self.base_backoff * 2u32.pow(self.consecutive_errors.min(6) - 1);
        self.next_attempt = Some(now + backoff);
        tracing::warn!(
            target: "pipeline.smart_fallback",
            consecutive_errors = self.consecutive_errors,
            fps = self.current_fps(),
            backoff_ms = backoff.as_millis() as u64,
            "serial_error_backoff"
        );
    }

    /// Whether a reconnect attempt is due given `now` (driven by
    /// `Event::Tick`, §5's periodic control-plane heartbeat).
    pub fn should_attempt_reconnect(&self, now: Instant) -> bool {
        self.next_attempt.is_some_and(|at| now >= at)
    }

    /// Reset after a successful reconnect; frame rate recovers to full
    /// speed on the next clean run.
    pub fn on_reconnected(&mut self) {
        self.step = 0;
        self.consecutive_errors = 0;
        self.next_attempt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_config::{
        ConfigBundle as Bundle, Orientation as CfgOrientation, OriginMode as CfgOriginMode,
        PowerMode as CfgPowerMode, ZoneSection,
    };

    fn bundle() -> Bundle {
        Bundle {
            zones: ZoneSection {
                left: 5,
                top: 5,
                right: 5,
                bottom: 5,
            },
            target_frame_rate: 60.0,
            orientation: CfgOrientation::Standard,
            perspective_origin: CfgOriginMode::Auto,
            calibration: [1.0, 1.0, 1.0],
            gamma: 1.0,
            saturation: 1.0,
            brightness: 1.0,
            power_mode: CfgPowerMode::Abl,
            power_limit: 20_000.0,
            baud_rate: 115_200,
        }
    }

    fn rect() -> CaptureRect {
        CaptureRect {
            x: 0.0,
            y: 0.0,
            width: 320.0,
            height: 180.0,
        }
    }

    #[test]
    fn processes_a_uniform_frame_without_panicking() {
        let mut coordinator = Coordinator::new(bundle(), rect()).unwrap();
        let mut data = vec![0u8; (320 * 180 * 4) as usize];
        for px in data.chunks_exact_mut(4) {
            px[2] = 200; // R
        }
        let frame = Frame {
            data: &data,
            width: 320,
            height: 180,
            bytes_per_row: 320 * 4,
        };
        let sequence = coordinator.process_frame(&frame, 1.0 / 60.0);
        assert_eq!(sequence.len(), coordinator.zone_count());
    }

    #[test]
    fn config_change_rebuilds_zone_state_with_new_topology() {
        let mut coordinator = Coordinator::new(bundle(), rect()).unwrap();
        assert_eq!(coordinator.zone_count(), 20);

        let mut changed = bundle();
        changed.zones.left = 10;
        coordinator
            .handle_event(&core_events::Event::ConfigChanged, Some(changed))
            .unwrap();
        assert_eq!(coordinator.zone_count(), 25);
    }

    #[test]
    fn mode_changed_updates_mode_without_touching_geometry() {
        let mut coordinator = Coordinator::new(bundle(), rect()).unwrap();
        assert_eq!(coordinator.mode(), Mode::Sync);
        coordinator
            .handle_event(&core_events::Event::ModeChanged(Mode::Music), None)
            .unwrap();
        assert_eq!(coordinator.mode(), Mode::Music);
        assert_eq!(coordinator.zone_count(), 20);
    }

    #[test]
    fn smart_fallback_lowers_fps_and_recovers() {
        let mut fallback = SmartFallback::new();
        assert_eq!(fallback.current_fps(), 60.0);
        let now = Instant::now();
        fallback.on_serial_error(now);
        assert_eq!(fallback.current_fps(), 30.0);
        fallback.on_serial_error(now);
        assert_eq!(fallback.current_fps(), 15.0);
        assert!(!fallback.should_attempt_reconnect(now));
        fallback.on_reconnected();
        assert_eq!(fallback.current_fps(), 60.0);
    }
}
