//! Numeric constants shared across the stepper workspace.
//!
//! Values mirror the drive IC register model and the persisted store layout.

use static_assertions::const_assert;

// ─── Stored Positions ───────────────────────────────────────────────

/// Number of slots in the stored-position table.
pub const NUM_STORED_POSITIONS: usize = 10;

/// Marker for an unused stored-position slot.
pub const BLANK_STORED_POSITION: i32 = i32::MAX;

/// "Current stored position" value when the axis rests at none of them.
pub const STORED_POSITION_NONE: u8 = 0xFF;

/// Stored positions visited by rotary calibration.
pub const CALIBRATION_POSITIONS: usize = 6;

const_assert!(CALIBRATION_POSITIONS <= NUM_STORED_POSITIONS);

// ─── Raw Drive Position ─────────────────────────────────────────────

/// Width of the drive ABS_POS register.
pub const RAW_POSITION_BITS: u32 = 22;

/// Value mask for the 22-bit raw position.
pub const RAW_POSITION_MASK: u32 = (1 << RAW_POSITION_BITS) - 1;

/// Sign marker mirrored above the 22-bit value for negative positions.
pub const RAW_POSITION_SIGN: u32 = 1 << RAW_POSITION_BITS;

/// Half of the 22-bit span; larger deltas between reads are wraps.
pub const RAW_POSITION_HALF_SPAN: i32 = (RAW_POSITION_MASK / 2) as i32;

const_assert!(RAW_POSITION_MASK == 0x3F_FFFF);

// ─── Speed Units ────────────────────────────────────────────────────

/// Ratio between the SPEED register unit and the MAX_SPEED register unit.
pub const SPEED_REGISTER_SCALE: u32 = 1024;

/// Largest quantized speed (MAX_SPEED units) the PID may request.
pub const SPEED_QUANTIZED_MAX: u32 = 1 << 15;

/// Steps per second represented by one SPEED register LSB (full step).
pub const SPEED_LSB_STEPS_PER_SEC: f32 = 0.014_901_1;

/// Steps per second represented by one MAX_SPEED register LSB (full step).
pub const MAX_SPEED_LSB_STEPS_PER_SEC: f32 = 15.258_789;

// ─── Soft Limits ────────────────────────────────────────────────────

/// Clockwise soft limit value meaning "not set".
pub const CW_SOFT_LIMIT_UNSET: i32 = i32::MAX;

/// Counter-clockwise soft limit value meaning "not set".
pub const CCW_SOFT_LIMIT_UNSET: i32 = i32::MIN;

// ─── Cycle Timing ───────────────────────────────────────────────────

/// Nominal control tick [ms]. Homing phase timeouts are counted in ticks.
pub const DEFAULT_CYCLE_TIME_MS: u64 = 10;

/// Tick used while an axis waits for configuration [ms].
pub const DEFAULT_CONFIG_CYCLE_TIME_MS: u64 = 1;

/// Maximum number of axes a card hosts.
pub const MAX_AXES: usize = 8;
