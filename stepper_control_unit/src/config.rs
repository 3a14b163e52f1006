//! Card configuration and the device lookup table.
//!
//! A card file names the axes fitted to the card and, for each, either a
//! persisted parameter set or a device key into the lookup table (LUT): a
//! directory of per-device TOML profiles. Resolution of the two happens on
//! every (re)connection, see [`resolve_parameters`].
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "stepper-card-3"
//!
//! [card]
//! cycle_time_ms = 10
//! lut_dir = "config/devices"
//!
//! [[axes]]
//! slot = 0
//! serial = 40_100_231
//! device = "LNR50"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use stepper_common::axis::command::AxisCommand;
use stepper_common::axis::params::{AxisParameters, DeviceProfile, StoredState};
use stepper_common::axis::status::ConfigFault;
use stepper_common::axis::types::DriveChip;
use stepper_common::config::{ConfigError, ConfigLoader, SharedConfig};
use stepper_common::consts::{DEFAULT_CONFIG_CYCLE_TIME_MS, DEFAULT_CYCLE_TIME_MS, MAX_AXES};
use tracing::{debug, info, warn};

use crate::hal::sim::SimAxisConfig;

// ─── Card File ──────────────────────────────────────────────────────

fn default_cycle_time_ms() -> u64 {
    DEFAULT_CYCLE_TIME_MS
}

fn default_config_cycle_time_ms() -> u64 {
    DEFAULT_CONFIG_CYCLE_TIME_MS
}

fn default_true() -> bool {
    true
}

/// Card-wide timing and file locations.
#[derive(Debug, Clone, Deserialize)]
pub struct CardSection {
    /// Nominal tick [ms].
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,
    /// Tick while waiting for or configuring a device [ms].
    #[serde(default = "default_config_cycle_time_ms")]
    pub config_cycle_time_ms: u64,
    /// Device lookup-table directory, relative to the card file.
    #[serde(default)]
    pub lut_dir: Option<PathBuf>,
    /// Directory for per-axis position stores; volatile when absent.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

impl Default for CardSection {
    fn default() -> Self {
        Self {
            cycle_time_ms: DEFAULT_CYCLE_TIME_MS,
            config_cycle_time_ms: DEFAULT_CONFIG_CYCLE_TIME_MS,
            lut_dir: None,
            store_dir: None,
        }
    }
}

/// One axis fitted to the card.
#[derive(Debug, Clone, Deserialize)]
pub struct AxisEntry {
    pub slot: u8,
    /// Serial number the attached device reports.
    #[serde(default)]
    pub serial: u32,
    #[serde(default)]
    pub chip: DriveChip,
    /// LUT key of the attached device.
    #[serde(default)]
    pub device: Option<String>,
    /// Persisted parameter set; takes precedence over the LUT when its
    /// serial matches.
    #[serde(default)]
    pub params: Option<AxisParameters>,
    /// Enable the channel on first connection.
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Simulated stage behind this slot.
    #[serde(default)]
    pub sim: SimAxisConfig,
}

/// Command injected by the binary at a fixed cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptStep {
    pub at_cycle: u64,
    pub slot: u8,
    pub command: AxisCommand,
}

/// Complete card file.
#[derive(Debug, Clone, Deserialize)]
pub struct CardConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub card: CardSection,
    #[serde(default)]
    pub axes: Vec<AxisEntry>,
    #[serde(default)]
    pub script: Vec<ScriptStep>,
}

impl CardConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - the shared section is invalid
    /// - a cycle time is zero
    /// - no axes are listed, a slot is out of range or listed twice
    /// - an axis has neither a parameter set nor a device key
    /// - a script step targets an unlisted slot
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.card.cycle_time_ms == 0 || self.card.config_cycle_time_ms == 0 {
            return Err(ConfigError::ValidationError(
                "cycle times must be non-zero".to_string(),
            ));
        }
        if self.axes.is_empty() {
            return Err(ConfigError::ValidationError("no axes configured".to_string()));
        }
        let mut seen = [false; MAX_AXES];
        for axis in &self.axes {
            let Some(slot_seen) = seen.get_mut(axis.slot as usize) else {
                return Err(ConfigError::ValidationError(format!(
                    "slot {} out of range 0..{MAX_AXES}",
                    axis.slot
                )));
            };
            if *slot_seen {
                return Err(ConfigError::ValidationError(format!(
                    "slot {} configured twice",
                    axis.slot
                )));
            }
            *slot_seen = true;
            if axis.params.is_none() && axis.device.is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "slot {}: needs `params` or `device`",
                    axis.slot
                )));
            }
        }
        if let Some(step) = self
            .script
            .iter()
            .find(|s| seen.get(s.slot as usize) != Some(&true))
        {
            return Err(ConfigError::ValidationError(format!(
                "script step at cycle {} targets unconfigured slot {}",
                step.at_cycle, step.slot
            )));
        }
        Ok(())
    }
}

/// Load and validate a card file.
///
/// A relative `lut_dir` or `store_dir` is resolved against the card
/// file's directory.
pub fn load_card(path: &Path) -> Result<CardConfig, ConfigError> {
    let mut card = CardConfig::load(path)?;
    card.validate()?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for dir in [&mut card.card.lut_dir, &mut card.card.store_dir]
        .into_iter()
        .flatten()
    {
        if dir.is_relative() {
            *dir = base.join(&*dir);
        }
    }
    info!(
        "Loaded card '{}' with {} axes from {}",
        card.shared.service_name,
        card.axes.len(),
        path.display()
    );
    Ok(card)
}

// ─── Device Lookup Table ────────────────────────────────────────────

/// Device-type defaults keyed by device name.
#[derive(Debug, Clone, Default)]
pub struct DeviceLut {
    profiles: HashMap<String, DeviceProfile>,
}

impl DeviceLut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.toml` profile in `dir`.
    ///
    /// Profiles are validated on lookup.
    ///
    /// # Errors
    ///
    /// `FileNotFound` when `dir` cannot be listed; `ParseError` for a
    /// profile that is not valid TOML.
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let entries = fs::read_dir(dir)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {e}", dir.display())))?;
        let mut lut = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|e| ConfigError::ParseError(format!("{}: {e}", dir.display())))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let profile = DeviceProfile::load(&path)?;
            debug!("LUT entry '{}' from {:?}", profile.device, path);
            lut.insert(profile);
        }
        info!("Device lookup table: {} profiles", lut.len());
        Ok(lut)
    }

    pub fn insert(&mut self, profile: DeviceProfile) {
        self.profiles.insert(profile.device.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Validated profile for `device`.
    pub fn lookup(&self, device: &str) -> Result<&DeviceProfile, ConfigError> {
        let profile = self
            .profiles
            .get(device)
            .ok_or_else(|| ConfigError::MissingProfile(device.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }
}

// ─── Resolution ─────────────────────────────────────────────────────

/// Parameter set chosen for a connected device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedAxis {
    pub params: AxisParameters,
    /// Stored-position defaults for a store that was never written.
    pub default_store: StoredState,
    /// Parameters came from the lookup table.
    pub from_lut: bool,
}

/// Pick the parameter set for `entry` given the serial the device reports.
///
/// A persisted set is used when it was written for this device (serial 0
/// matches any device) and validates. Otherwise the device's LUT profile
/// applies. Failures are reported as the fault bits to surface.
pub fn resolve_parameters(
    entry: &AxisEntry,
    device_serial: u32,
    lut: &DeviceLut,
) -> Result<ResolvedAxis, ConfigFault> {
    let mut fault = ConfigFault::empty();

    if let Some(params) = entry.params {
        let serial = params.stage.axis_serial_no;
        if serial != 0 && serial != device_serial {
            warn!(
                slot = entry.slot,
                stored = serial,
                device = device_serial,
                "persisted parameters belong to another device"
            );
            fault |= ConfigFault::SERIAL_MISMATCH;
        } else {
            match params.validate() {
                Ok(()) => {
                    return Ok(ResolvedAxis {
                        params,
                        default_store: StoredState::default(),
                        from_lut: false,
                    });
                }
                Err(e) => {
                    warn!(slot = entry.slot, error = %e, "persisted parameters rejected");
                    fault |= ConfigFault::INVALID_PARAMS;
                }
            }
        }
    }

    let Some(device) = entry.device.as_deref() else {
        return Err(fault | ConfigFault::INVALID_PARAMS);
    };
    match lut.lookup(device) {
        Ok(profile) => {
            let mut params = profile.params;
            params.stage.axis_serial_no = device_serial;
            Ok(ResolvedAxis {
                params,
                default_store: profile.store,
                from_lut: true,
            })
        }
        Err(ConfigError::MissingProfile(_)) => Err(fault | ConfigFault::LUT_MISSING),
        Err(e) => {
            warn!(slot = entry.slot, device, error = %e, "lookup-table profile rejected");
            Err(fault | ConfigFault::LUT_MARKERS)
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use stepper_common::axis::params::SectionMarker;
    use tempfile::tempdir;

    const CARD: &str = r#"
[shared]
service_name = "stepper-card-3"

[card]
cycle_time_ms = 5
lut_dir = "devices"

[[axes]]
slot = 0
serial = 1001
device = "LNR50"

[[axes]]
slot = 2
chip = "l6480"
params = { stage = { counts_per_unit = 2.0, max_pos = 50000 } }

[[script]]
at_cycle = 10
slot = 0
command = { kind = "move_absolute", target = 2500 }
"#;

    fn profile(device: &str) -> DeviceProfile {
        DeviceProfile {
            device: device.to_string(),
            markers: SectionMarker::CANONICAL.to_vec(),
            params: AxisParameters::default(),
            store: StoredState::default(),
        }
    }

    fn entry(params: Option<AxisParameters>, device: Option<&str>) -> AxisEntry {
        AxisEntry {
            slot: 0,
            serial: 1001,
            chip: DriveChip::L6470,
            device: device.map(str::to_string),
            params,
            enable: true,
            sim: SimAxisConfig::default(),
        }
    }

    #[test]
    fn card_file_parses_and_validates() {
        let card = CardConfig::parse(CARD).unwrap();
        card.validate().unwrap();
        assert_eq!(card.card.cycle_time_ms, 5);
        assert_eq!(card.card.config_cycle_time_ms, DEFAULT_CONFIG_CYCLE_TIME_MS);
        assert_eq!(card.axes[1].chip, DriveChip::L6480);
        assert_eq!(card.axes[1].params.map(|p| p.stage.max_pos), Some(50_000));
        assert!(card.axes[0].enable);
        assert_eq!(
            card.script[0].command,
            AxisCommand::MoveAbsolute { target: 2500 }
        );
    }

    #[test]
    fn duplicate_slot_rejected() {
        let mut card = CardConfig::parse(CARD).unwrap();
        card.axes[1].slot = 0;
        assert!(matches!(card.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn slot_out_of_range_rejected() {
        let mut card = CardConfig::parse(CARD).unwrap();
        card.axes[1].slot = MAX_AXES as u8;
        assert!(card.validate().is_err());
    }

    #[test]
    fn axis_without_source_rejected() {
        let mut card = CardConfig::parse(CARD).unwrap();
        card.axes[0].device = None;
        assert!(card.validate().is_err());
    }

    #[test]
    fn script_to_unknown_slot_rejected() {
        let mut card = CardConfig::parse(CARD).unwrap();
        card.script[0].slot = 5;
        assert!(card.validate().is_err());
    }

    #[test]
    fn relative_dirs_follow_card_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("card.toml");
        fs::write(&path, CARD).unwrap();
        let card = load_card(&path).unwrap();
        assert_eq!(card.card.lut_dir, Some(dir.path().join("devices")));
    }

    #[test]
    fn lut_directory_loads_profiles() {
        let dir = tempdir().unwrap();
        let text = toml::to_string(&profile("LNR50")).unwrap();
        fs::write(dir.path().join("lnr50.toml"), text).unwrap();
        fs::write(dir.path().join("README"), "not a profile").unwrap();

        let lut = DeviceLut::load_dir(dir.path()).unwrap();
        assert_eq!(lut.len(), 1);
        assert!(lut.lookup("LNR50").is_ok());
        assert!(matches!(
            lut.lookup("ZST13"),
            Err(ConfigError::MissingProfile(_))
        ));
    }

    #[test]
    fn malformed_profile_is_parse_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.toml"), "device = [").unwrap();
        assert!(matches!(
            DeviceLut::load_dir(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn matching_persisted_params_win() {
        let mut params = AxisParameters::default();
        params.stage.axis_serial_no = 1001;
        params.stage.max_pos = 1234;
        let mut lut = DeviceLut::new();
        lut.insert(profile("LNR50"));

        let resolved = resolve_parameters(&entry(Some(params), Some("LNR50")), 1001, &lut).unwrap();
        assert!(!resolved.from_lut);
        assert_eq!(resolved.params.stage.max_pos, 1234);
    }

    #[test]
    fn serial_mismatch_falls_back_to_lut() {
        let mut params = AxisParameters::default();
        params.stage.axis_serial_no = 77;
        let mut lut = DeviceLut::new();
        lut.insert(profile("LNR50"));

        let resolved = resolve_parameters(&entry(Some(params), Some("LNR50")), 1001, &lut).unwrap();
        assert!(resolved.from_lut);
        assert_eq!(resolved.params.stage.axis_serial_no, 1001);
    }

    #[test]
    fn missing_lut_entry_reported() {
        let fault = resolve_parameters(&entry(None, Some("LNR50")), 1001, &DeviceLut::new());
        assert_eq!(fault, Err(ConfigFault::LUT_MISSING));
    }

    #[test]
    fn out_of_order_markers_reported() {
        let mut bad = profile("LNR50");
        bad.markers.swap(0, 1);
        let mut lut = DeviceLut::new();
        lut.insert(bad);
        let fault = resolve_parameters(&entry(None, Some("LNR50")), 1001, &lut);
        assert_eq!(fault, Err(ConfigFault::LUT_MARKERS));
    }

    #[test]
    fn invalid_params_without_fallback() {
        let mut params = AxisParameters::default();
        params.drive.step_mode = 9;
        let fault = resolve_parameters(&entry(Some(params), None), 1001, &DeviceLut::new());
        assert_eq!(fault, Err(ConfigFault::INVALID_PARAMS));
    }
}
