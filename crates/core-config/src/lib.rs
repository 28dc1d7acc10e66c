//! Configuration loading, parsing, and validation.
//!
//! Parses `ledsync.toml` (or an override path supplied by the binary) into a
//! [`ConfigFile`], then [`Config::bundle`] derives the immutable
//! [`ConfigBundle`] the pipeline coordinator restarts around on any change
//! (§3 "Configuration bundle"). The on-disk schema is the persistent
//! key/value store named in the external-interfaces section: each nested
//! table below corresponds to one group of those keys (`[zones]` covers
//! `topZone`/`bottomZone`/`leftZone`/`rightZone`, `[serial]` covers
//! `baudRate`/`selectedPort`, and so on). Unknown fields are ignored
//! (`serde` default tolerance) so the schema can evolve without breaking
//! older config files.

use serde::Deserialize;
use std::{fs, path::PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while validating a parsed configuration into a usable
/// [`ConfigBundle`]. Corresponds to the `ConfigInvalid` error kind (§7) for
/// the part this crate is responsible for; the boundary-span half of that
/// check lives in `core-geometry`, which is only reachable once zone counts
/// are known to be non-zero.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("zone counts (left+top+right+bottom) sum to zero")]
    ZeroZones,
    #[error("manual perspective origin {0} is outside [0, 1]")]
    OriginOutOfRange(String),
    #[error("power limit must be positive, got {0}")]
    NonPositivePowerLimit(String),
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
pub struct ZoneSection {
    #[serde(default)]
    pub left: u16,
    #[serde(default)]
    pub top: u16,
    #[serde(default)]
    pub right: u16,
    #[serde(default)]
    pub bottom: u16,
}

impl ZoneSection {
    pub fn total(&self) -> u32 {
        u32::from(self.left) + u32::from(self.top) + u32::from(self.right) + u32::from(self.bottom)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Standard,
    Reverse,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum OriginMode {
    Auto,
    Manual { position: f32 },
}

impl Default for OriginMode {
    fn default() -> Self {
        OriginMode::Auto
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct DisplaySection {
    #[serde(default = "DisplaySection::default_fps")]
    pub target_frame_rate: f32,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub perspective_origin: OriginMode,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            target_frame_rate: Self::default_fps(),
            orientation: Orientation::default(),
            perspective_origin: OriginMode::default(),
        }
    }
}

impl DisplaySection {
    const fn default_fps() -> f32 {
        60.0
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ToneSection {
    #[serde(default = "ToneSection::default_gain")]
    pub calibration_r: f32,
    #[serde(default = "ToneSection::default_gain")]
    pub calibration_g: f32,
    #[serde(default = "ToneSection::default_gain")]
    pub calibration_b: f32,
    #[serde(default = "ToneSection::default_gamma")]
    pub gamma: f32,
    #[serde(default = "ToneSection::default_saturation")]
    pub saturation: f32,
    #[serde(default = "ToneSection::default_brightness")]
    pub brightness: f32,
}

impl Default for ToneSection {
    fn default() -> Self {
        Self {
            calibration_r: Self::default_gain(),
            calibration_g: Self::default_gain(),
            calibration_b: Self::default_gain(),
            gamma: Self::default_gamma(),
            saturation: Self::default_saturation(),
            brightness: Self::default_brightness(),
        }
    }
}

impl ToneSection {
    const fn default_gain() -> f32 {
        1.0
    }
    const fn default_gamma() -> f32 {
        1.0
    }
    const fn default_saturation() -> f32 {
        1.0
    }
    const fn default_brightness() -> f32 {
        1.0
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PowerMode {
    #[default]
    Abl,
    GlobalCap,
    SmartFallback,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct PowerSection {
    #[serde(default)]
    pub mode: PowerMode,
    #[serde(default = "PowerSection::default_limit")]
    pub limit: f32,
}

impl Default for PowerSection {
    fn default() -> Self {
        Self {
            mode: PowerMode::default(),
            limit: Self::default_limit(),
        }
    }
}

impl PowerSection {
    const fn default_limit() -> f32 {
        20_000.0
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialSection {
    #[serde(default)]
    pub selected_port: Option<String>,
    #[serde(default = "SerialSection::default_baud")]
    pub baud_rate: u32,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            selected_port: None,
            baud_rate: Self::default_baud(),
        }
    }
}

impl SerialSection {
    const fn default_baud() -> u32 {
        115_200
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub zones: ZoneSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub tone: ToneSection,
    #[serde(default)]
    pub power: PowerSection,
    #[serde(default)]
    pub serial: SerialSection,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file contents, if a file was read (kept for diagnostics).
    pub raw: Option<String>,
    /// Parsed (or default) data.
    pub file: ConfigFile,
}

/// Best-effort config path following platform conventions (XDG / AppData).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("ledsync.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("ledsync").join("ledsync.toml");
    }
    PathBuf::from("ledsync.toml")
}

pub fn load_from(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Config {
                raw: Some(content),
                file,
            }),
            Err(e) => {
                warn!(target: "config", path = %path.display(), error = %e, "falling back to defaults");
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

/// The immutable bundle a pipeline "run" is built around (§3). Any change
/// to any field requires a restart; there is no partial-update path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigBundle {
    pub zones: ZoneSection,
    pub target_frame_rate: f32,
    pub orientation: Orientation,
    pub perspective_origin: OriginMode,
    pub calibration: [f32; 3],
    pub gamma: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub power_mode: PowerMode,
    pub power_limit: f32,
    pub baud_rate: u32,
}

impl Config {
    /// Validate and derive the immutable bundle the coordinator restarts
    /// around. Geometry-level validation (boundary span) happens downstream
    /// in `core-geometry`, once zone counts are known to be non-zero here.
    pub fn bundle(&self) -> Result<ConfigBundle, ConfigError> {
        if self.file.zones.total() == 0 {
            return Err(ConfigError::ZeroZones);
        }
        if let OriginMode::Manual { position } = self.file.display.perspective_origin
            && !(0.0..=1.0).contains(&position)
        {
            return Err(ConfigError::OriginOutOfRange(position.to_string()));
        }
        if self.file.power.limit <= 0.0 {
            return Err(ConfigError::NonPositivePowerLimit(
                self.file.power.limit.to_string(),
            ));
        }

        let bundle = ConfigBundle {
            zones: self.file.zones,
            target_frame_rate: self.file.display.target_frame_rate,
            orientation: self.file.display.orientation,
            perspective_origin: self.file.display.perspective_origin,
            calibration: [
                self.file.tone.calibration_r,
                self.file.tone.calibration_g,
                self.file.tone.calibration_b,
            ],
            gamma: self.file.tone.gamma,
            saturation: self.file.tone.saturation,
            brightness: self.file.tone.brightness,
            power_mode: self.file.power.mode,
            power_limit: self.file.power.limit,
            baud_rate: self.file.serial.baud_rate,
        };

        info!(
            target: "config",
            led_count = bundle.zones.total(),
            fps = bundle.target_frame_rate,
            orientation = ?bundle.orientation,
            "config_bundle_resolved"
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(cfg.file.zones.total(), 0);
    }

    #[test]
    fn zero_zones_is_invalid() {
        let cfg = Config::default();
        assert_eq!(cfg.bundle().unwrap_err(), ConfigError::ZeroZones);
    }

    #[test]
    fn parses_zone_section() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[zones]\nleft = 10\ntop = 20\nright = 10\nbottom = 20\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.zones.total(), 60);
        let bundle = cfg.bundle().unwrap();
        assert_eq!(bundle.zones.total(), 60);
        assert_eq!(bundle.target_frame_rate, 60.0);
        assert_eq!(bundle.baud_rate, 115_200);
    }

    #[test]
    fn rejects_out_of_range_manual_origin() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[zones]\nbottom = 10\n[display.perspective_origin]\nmode = \"manual\"\nposition = 1.4\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert!(matches!(
            cfg.bundle(),
            Err(ConfigError::OriginOutOfRange(_))
        ));
    }

    #[test]
    fn rejects_non_positive_power_limit() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[zones]\nbottom = 10\n[power]\nlimit = 0.0\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert!(matches!(
            cfg.bundle(),
            Err(ConfigError::NonPositivePowerLimit(_))
        ));
    }

    #[test]
    fn parses_serial_and_power_sections() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[zones]\nbottom = 10\n[serial]\nselected_port = \"/dev/cu.usbmodem1\"\nbaud_rate = 921600\n[power]\nmode = \"globalCap\"\nlimit = 5000\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        let bundle = cfg.bundle().unwrap();
        assert_eq!(bundle.baud_rate, 921_600);
        assert_eq!(bundle.power_mode, PowerMode::GlobalCap);
        assert_eq!(bundle.power_limit, 5000.0);
        assert_eq!(
            cfg.file.serial.selected_port.as_deref(),
            Some("/dev/cu.usbmodem1")
        );
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "not valid = = toml").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file, ConfigFile::default());
    }
}
