//! Prelude module for common re-exports.
//!
//! ```rust
//! use stepper_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Axis Types ─────────────────────────────────────────────────────
pub use crate::axis::command::AxisCommand;
pub use crate::axis::log::{LogEvent, LogRecord};
pub use crate::axis::params::{
    AxisFlags, AxisParameters, DeviceProfile, DriveParams, HomeParams, JogParams, LimitParams,
    PidParams, StageConfig, StoredState,
};
pub use crate::axis::status::{ConfigFault, EncoderHealth, StatusBits};
pub use crate::axis::types::{
    Direction, DriveChip, EncoderType, HomeDirection, HomeTarget, HomedStatus, SpeedChannel,
    SpeedChannelMask,
};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{
    BLANK_STORED_POSITION, DEFAULT_CYCLE_TIME_MS, NUM_STORED_POSITIONS, STORED_POSITION_NONE,
};
