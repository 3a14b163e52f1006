//! Homing engine.
//!
//! Three independent strategies, picked once per dispatch from the encoder
//! type and never mixed within one homing session:
//!
//! - [`limit_index`]: drive to a limit switch or sweep for an index pulse
//!   (incremental and open-loop stages).
//! - [`rotation`]: magnetic two-point calibration between the extremes of
//!   the stored-position table.
//! - [`turret`]: epi-turret calibration against an optical slot.
//!
//! All three share the axis' phase timer (`homing_counter`) and phase
//! ordinal (`homing_control`). Failures leave `enc.homed == Failed`, which
//! is distinct from never homed.

pub mod limit_index;
pub mod rehome;
pub mod rotation;
pub mod turret;

use stepper_common::axis::types::{EncoderType, HomedStatus};

use crate::command::apply::goto_stored;
use crate::error::DriveError;
use crate::hal::ports::AxisIo;
use crate::position::sync_steps_to_encoder;
use crate::state::{AxisState, HomingMode, Mode};

pub use rehome::check_spontaneous_rehome;

/// Strategy serving an encoder type, if it homes at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingStrategy {
    LimitIndex,
    /// Virtual offset reset; no motion.
    AbsoluteZero,
    Rotation,
    Turret,
}

impl HomingStrategy {
    pub const fn for_encoder(kind: EncoderType) -> Option<Self> {
        match kind {
            EncoderType::None | EncoderType::QuadLinear => Some(Self::LimitIndex),
            EncoderType::AbsBissLinear => Some(Self::AbsoluteZero),
            EncoderType::MagneticRotationAutoHome => Some(Self::Turret),
            EncoderType::MagneticRotation | EncoderType::MagneticRotationLw => {
                Some(Self::Rotation)
            }
            EncoderType::AbsIndexLinear | EncoderType::MagneticRotationManual => None,
        }
    }
}

/// One HOMING dispatch.
pub fn service_homing(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    if axis.ctrl.homing_mode == HomingMode::Start {
        axis.limits.hard_stop = false;
        sync_steps_to_encoder(axis, io)?;
    }

    match HomingStrategy::for_encoder(axis.enc.kind) {
        Some(HomingStrategy::LimitIndex) => limit_index::service(axis, io),
        Some(HomingStrategy::Rotation) => rotation::service(axis, io),
        Some(HomingStrategy::Turret) => turret::service(axis, io),
        Some(HomingStrategy::AbsoluteZero) => {
            axis.enc.zero = 0;
            finish(axis, HomedStatus::Homed);
            axis.set_mode(Mode::Idle);
            Ok(())
        }
        None => {
            axis.set_mode(Mode::Idle);
            axis.ctrl.homing_mode = HomingMode::Idle;
            Ok(())
        }
    }
}

/// Halt a homing session the mode has already left.
///
/// Disarms the strategy's hardware side channel and clears both homed
/// markers.
pub fn abort_homing(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    match HomingStrategy::for_encoder(axis.enc.kind) {
        Some(HomingStrategy::LimitIndex) => io.set_zero_on_limit(false)?,
        Some(HomingStrategy::Turret) => io.set_opto_power(false)?,
        _ => {}
    }
    axis.enc.homed = HomedStatus::NotHomed;
    axis.limits.homed = HomedStatus::NotHomed;
    axis.ctrl.homing_mode = HomingMode::Idle;
    Ok(())
}

/// Close a session: set both markers and release the sub-mode.
fn finish(axis: &mut AxisState, status: HomedStatus) {
    axis.enc.homed = status;
    axis.limits.homed = status;
    axis.ctrl.homing_mode = HomingMode::Idle;
}

/// Calibration succeeded: mark homed and recall stored position 0.
///
/// A blank slot 0 leaves nothing to recall; the axis stops in place.
fn complete_and_recall(axis: &mut AxisState) {
    finish(axis, HomedStatus::Homed);
    goto_stored(axis, 0);
    if axis.mode() == Mode::Homing {
        axis.set_mode(Mode::Stop);
    }
}

/// Calibration failed: stop with the failed marker.
fn fail(axis: &mut AxisState) {
    axis.enc.homed = HomedStatus::Failed;
    axis.limits.homed = HomedStatus::NotHomed;
    axis.ctrl.homing_mode = HomingMode::Idle;
    axis.set_mode(Mode::Stop);
}

// ─── Tests ──────────────────────────────────────────────────────────
