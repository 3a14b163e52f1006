//! Direction/speed configuration and the gated RUN.

use stepper_common::axis::params::AxisFlags;
use stepper_common::axis::types::Direction;
use stepper_common::consts::SPEED_REGISTER_SCALE;

use crate::error::DriveError;
use crate::hal::drive::StepperDrive;
use crate::hal::ports::AxisIo;
use crate::safety::limits::check_run_limits;
use crate::state::AxisState;

/// Set the next RUN's direction and speed.
///
/// `target_speed` is in MAX_SPEED units and is clamped to the current
/// speed channel and to UNBOUND. The stepper reversal flag is applied
/// once when `apply_reversal` is set.
pub fn configure_movement(
    axis: &mut AxisState,
    direction: Direction,
    target_speed: u32,
    apply_reversal: bool,
) {
    let reversed = apply_reversal && axis.has_flag(AxisFlags::STEPPER_REVERSED);
    axis.ctrl.cmd_dir = direction.reversed_if(reversed);

    let ceiling = axis
        .speeds
        .get(axis.ctrl.speed_channel)
        .min(axis.speeds.unbound());
    axis.ctrl.cmd_vel = SPEED_REGISTER_SCALE * target_speed.min(ceiling);
}

/// Issue the configured RUN unless a run limit vetoes it.
///
/// Returns whether the RUN was issued.
pub fn run_ctl(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<bool, DriveError> {
    if check_run_limits(axis, io)? {
        return Ok(false);
    }
    axis.ctrl.cur_dir = axis.ctrl.cmd_dir;
    axis.ctrl.cur_vel = axis.ctrl.cmd_vel;
    io.drive().run(axis.ctrl.cmd_dir, axis.ctrl.cmd_vel)?;
    Ok(true)
}

// ─── Tests ──────────────────────────────────────────────────────────
