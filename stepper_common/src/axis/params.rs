//! Persisted axis parameter sets.
//!
//! One struct per persisted block (stage, drive, flags, limits, home, jog,
//! encoder, PID) aggregated into [`AxisParameters`], plus the high-frequency
//! [`StoredState`] and the lookup-table [`DeviceProfile`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::axis::types::{EncoderType, HomeDirection, HomeTarget};
use crate::config::ConfigError;
use crate::consts::{
    BLANK_STORED_POSITION, CCW_SOFT_LIMIT_UNSET, CW_SOFT_LIMIT_UNSET, NUM_STORED_POSITIONS,
};

// ─── Flags ──────────────────────────────────────────────────────────

bitflags! {
    /// Axis behaviour flags (persisted as one byte).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AxisFlags: u8 {
        /// Position feedback comes from an encoder.
        const HAS_ENCODER      = 1 << 0;
        /// Encoder counts run opposite to the stage.
        const ENCODER_REVERSED = 1 << 1;
        /// Encoder provides an index pulse.
        const HAS_INDEX        = 1 << 2;
        /// Stepper direction is inverted.
        const STEPPER_REVERSED = 1 << 3;
        /// GOTO and JOG run through the PID controller.
        const USE_PID          = 1 << 4;
        /// PID stops once settled in the deadband.
        const PID_KICKOUT      = 1 << 5;
        /// Rotary stage.
        const ROTATIONAL       = 1 << 6;
        /// Prefer a soft stop over a hard stop.
        const PREFER_SOFT_STOP = 1 << 7;
    }
}

// ─── Stage ──────────────────────────────────────────────────────────

/// Mechanical stage description.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Serial number of the stage this block was written for.
    #[serde(default)]
    pub axis_serial_no: u32,
    /// Microsteps per encoder count (includes any gearbox).
    pub counts_per_unit: f32,
    /// Lower travel bound [counts].
    #[serde(default)]
    pub min_pos: u32,
    /// Upper travel bound [counts]; rotary wrap point.
    pub max_pos: u32,
    /// Step/encoder divergence that counts as a collision (0 = disabled).
    #[serde(default)]
    pub collision_threshold: u16,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            axis_serial_no: 0,
            counts_per_unit: 1.0,
            min_pos: 0,
            max_pos: 100_000,
            collision_threshold: 0,
        }
    }
}

// ─── Drive ──────────────────────────────────────────────────────────

/// Drive IC register programme plus PID settle parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveParams {
    pub acc: u32,
    pub dec: u32,
    /// MAX_SPEED register; also the UNBOUND speed channel.
    pub max_speed: u32,
    pub min_speed: u16,
    pub fs_spd: u16,
    /// Holding KVAL; zero puts the bridges in high impedance on stop.
    pub kval_hold: u8,
    pub kval_run: u8,
    pub kval_acc: u8,
    pub kval_dec: u8,
    pub int_speed: u16,
    pub stall_th: u8,
    pub st_slp: u8,
    pub fn_slp_acc: u8,
    pub fn_slp_dec: u8,
    pub ocd_th: u8,
    /// Microstep mode exponent (0..=7).
    pub step_mode: u8,
    pub config: u16,
    pub gatecfg1: u16,
    pub gatecfg2: u8,
    pub approach_vel: u16,
    /// PID settle window [counts].
    pub deadband: u16,
    pub backlash: u16,
    /// Consecutive settled cycles before the PID kicks out.
    pub kickout_time: u8,
}

impl Default for DriveParams {
    fn default() -> Self {
        Self {
            acc: 0x08A,
            dec: 0x08A,
            max_speed: 0x041,
            min_speed: 0,
            fs_spd: 0x027,
            kval_hold: 0x29,
            kval_run: 0x29,
            kval_acc: 0x29,
            kval_dec: 0x29,
            int_speed: 0x0408,
            stall_th: 0x40,
            st_slp: 0x19,
            fn_slp_acc: 0x29,
            fn_slp_dec: 0x29,
            ocd_th: 0x08,
            step_mode: 7,
            config: 0x2E88,
            gatecfg1: 0,
            gatecfg2: 0,
            approach_vel: 0,
            deadband: 1,
            backlash: 0,
            kickout_time: 10,
        }
    }
}

// ─── Limits ─────────────────────────────────────────────────────────

/// Hard limit switch wiring, decoded from the persisted word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardLimitMode {
    /// Switch ignored.
    Ignored,
    /// Active when the contact closes.
    MakesOnContact,
    /// Active when the contact opens.
    BreaksOnContact,
}

/// Swap bit in the hard limit word.
pub const HARD_LIMIT_SWAP: u16 = 0x0080;

/// Decode the mode part (low 7 bits) of a hard limit word.
#[inline]
pub const fn hard_limit_mode(word: u16) -> HardLimitMode {
    match word & 0x007F {
        1 => HardLimitMode::MakesOnContact,
        2 => HardLimitMode::BreaksOnContact,
        _ => HardLimitMode::Ignored,
    }
}

/// Limit switch and soft limit configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitParams {
    pub cw_hard_limit: u16,
    pub ccw_hard_limit: u16,
    pub cw_soft_limit: i32,
    pub ccw_soft_limit: i32,
    pub abs_high_limit: i32,
    pub abs_low_limit: i32,
    pub limit_mode: u16,
}

impl Default for LimitParams {
    fn default() -> Self {
        Self {
            cw_hard_limit: 1,
            ccw_hard_limit: 1,
            cw_soft_limit: CW_SOFT_LIMIT_UNSET,
            ccw_soft_limit: CCW_SOFT_LIMIT_UNSET,
            abs_high_limit: i32::MAX,
            abs_low_limit: i32::MIN,
            limit_mode: 0,
        }
    }
}

impl LimitParams {
    /// Whether either soft limit is configured.
    #[inline]
    pub const fn has_soft_limits(&self) -> bool {
        self.cw_soft_limit != CW_SOFT_LIMIT_UNSET || self.ccw_soft_limit != CCW_SOFT_LIMIT_UNSET
    }

    /// Move configured soft limits by `offset`; unset limits stay unset.
    pub fn shift_soft_limits(&mut self, offset: i32) {
        if self.cw_soft_limit != CW_SOFT_LIMIT_UNSET {
            self.cw_soft_limit = self.cw_soft_limit.wrapping_add(offset);
        }
        if self.ccw_soft_limit != CCW_SOFT_LIMIT_UNSET {
            self.ccw_soft_limit = self.ccw_soft_limit.wrapping_add(offset);
        }
    }
}

// ─── Home / Jog / PID / Encoder ─────────────────────────────────────

/// Homing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeParams {
    pub home_mode: u8,
    /// Direction of travel while homing.
    pub home_dir: HomeDirection,
    /// What the limit/index strategy drives to.
    pub target: HomeTarget,
    /// Homing speed as a percentage of the UNBOUND channel.
    pub home_velocity: u32,
    /// Offset applied after homing [counts].
    pub offset_distance: i32,
}

impl Default for HomeParams {
    fn default() -> Self {
        Self {
            home_mode: 0,
            home_dir: HomeDirection::Cw,
            target: HomeTarget::Limit,
            home_velocity: 50,
            offset_distance: 0,
        }
    }
}

/// Jog configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JogParams {
    pub jog_mode: i16,
    /// Jog step [counts].
    pub step_size: i32,
    pub min_vel: i32,
    pub acc: i32,
    /// JOG channel speed (MAX_SPEED units).
    pub max_vel: i32,
    pub stop_mode: i16,
}

impl Default for JogParams {
    fn default() -> Self {
        Self {
            jog_mode: 2,
            step_size: 1000,
            min_vel: 0,
            acc: 0,
            max_vel: 0,
            stop_mode: 1,
        }
    }
}

/// PID gains as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidParams {
    pub kp: u32,
    pub ki: u32,
    pub kd: u32,
    /// Integral clamp.
    pub imax: u32,
    pub filter_control: u16,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 1000,
            ki: 0,
            kd: 0,
            imax: 0,
            filter_control: 0,
        }
    }
}

/// Encoder description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EncoderParams {
    /// Encoder hardware type.
    pub kind: EncoderType,
}

// ─── Aggregate ──────────────────────────────────────────────────────

/// Complete low-frequency parameter set of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AxisParameters {
    #[serde(default)]
    pub stage: StageConfig,
    #[serde(default)]
    pub drive: DriveParams,
    /// Raw [`AxisFlags`] byte.
    #[serde(default)]
    pub flags: u8,
    #[serde(default)]
    pub limits: LimitParams,
    #[serde(default)]
    pub home: HomeParams,
    #[serde(default)]
    pub jog: JogParams,
    #[serde(default)]
    pub encoder: EncoderParams,
    #[serde(default)]
    pub pid: PidParams,
}

impl AxisParameters {
    /// Decoded flag byte.
    #[inline]
    pub const fn flags(&self) -> AxisFlags {
        AxisFlags::from_bits_truncate(self.flags)
    }

    /// Semantic validation.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `counts_per_unit` is not a positive finite number
    /// - `max_pos` is zero or below `min_pos`
    /// - `step_mode` exceeds 7
    /// - `max_speed` is zero or wider than the 10-bit register
    /// - `home_velocity` exceeds 100 %
    pub fn validate(&self) -> Result<(), ConfigError> {
        let cpu = self.stage.counts_per_unit;
        if !(cpu.is_finite() && cpu > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "counts_per_unit must be positive, got {cpu}"
            )));
        }
        if self.stage.max_pos == 0 || self.stage.max_pos < self.stage.min_pos {
            return Err(ConfigError::ValidationError(format!(
                "invalid travel range [{}, {}]",
                self.stage.min_pos, self.stage.max_pos
            )));
        }
        if self.drive.step_mode > 7 {
            return Err(ConfigError::ValidationError(format!(
                "step_mode {} out of range 0..=7",
                self.drive.step_mode
            )));
        }
        if self.drive.max_speed == 0 || self.drive.max_speed > 0x3FF {
            return Err(ConfigError::ValidationError(format!(
                "max_speed {:#x} out of range 1..=0x3ff",
                self.drive.max_speed
            )));
        }
        if self.home.home_velocity > 100 {
            return Err(ConfigError::ValidationError(format!(
                "home_velocity {}% exceeds 100%",
                self.home.home_velocity
            )));
        }
        Ok(())
    }
}

// ─── Stored State ───────────────────────────────────────────────────

/// High-frequency persisted state: positions that survive power cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredState {
    /// Encoder position at last save [counts].
    pub enc_pos: i32,
    /// Drive electrical position.
    pub el_pos: u16,
    /// Encoder zero offset.
    pub enc_zero: i32,
    /// Stored-position table; unused slots hold [`BLANK_STORED_POSITION`].
    pub stored_pos: [i32; NUM_STORED_POSITIONS],
    /// Proximity window for "at stored position" [counts].
    pub stored_pos_deadband: u16,
}

impl Default for StoredState {
    fn default() -> Self {
        Self {
            enc_pos: 0,
            el_pos: 0,
            enc_zero: 0,
            stored_pos: [BLANK_STORED_POSITION; NUM_STORED_POSITIONS],
            stored_pos_deadband: 0,
        }
    }
}

impl StoredState {
    /// True when nothing has ever been written to the store.
    pub fn is_untouched(&self) -> bool {
        *self == Self::default()
    }

    /// Whether slot `index` holds the blank marker (or does not exist).
    #[inline]
    pub fn is_blank(&self, index: usize) -> bool {
        self.stored_pos
            .get(index)
            .is_none_or(|&p| p >= BLANK_STORED_POSITION)
    }
}

// ─── Lookup-Table Profiles ──────────────────────────────────────────

/// Section marker written ahead of every block of a lookup-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionMarker {
    Encoder,
    Flags,
    Home,
    Jog,
    Limits,
    Pid,
    Stage,
    Drive,
    Store,
}

impl SectionMarker {
    /// Order every lookup-table entry must follow.
    pub const CANONICAL: [Self; 9] = [
        Self::Encoder,
        Self::Flags,
        Self::Home,
        Self::Jog,
        Self::Limits,
        Self::Pid,
        Self::Stage,
        Self::Drive,
        Self::Store,
    ];
}

/// Device-type default parameters, as shipped in the lookup table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Device part number this entry applies to.
    pub device: String,
    /// Section markers in file order.
    pub markers: Vec<SectionMarker>,
    /// Default parameter set.
    pub params: AxisParameters,
    /// Default stored-position table.
    #[serde(default)]
    pub store: StoredState,
}

impl DeviceProfile {
    /// Check section markers and parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if markers are missing or out
    /// of order, or the parameter set fails [`AxisParameters::validate`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.markers.as_slice() != SectionMarker::CANONICAL.as_slice() {
            return Err(ConfigError::ValidationError(format!(
                "device '{}': section markers {:?} do not follow {:?}",
                self.device,
                self.markers,
                SectionMarker::CANONICAL
            )));
        }
        self.params.validate()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
