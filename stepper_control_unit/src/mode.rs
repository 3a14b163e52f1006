//! Per-cycle movement mode dispatch.
//!
//! [`service_stepper`] runs once per cycle after the encoder and limit
//! services. It applies the mode-independent safety checks first, then
//! performs exactly one mode's work. Hardware effects of queued commands
//! happen here, never when the command is applied.

use stepper_common::axis::log::LogEvent;
use stepper_common::axis::types::EncoderType;
use tracing::{debug, warn};

use crate::control::movement::{configure_movement, run_ctl};
use crate::control::pid::{holds_position, pid_ctrl};
use crate::error::DriveError;
use crate::hal::drive::StepperDrive;
use crate::hal::ports::AxisIo;
use crate::homing::{abort_homing, service_homing};
use crate::persistence::{PositionStore, check_if_at_stored_position, check_save_position};
use crate::position::sync_steps_to_encoder;
use crate::safety::{BoardSignals, check_em_stop, check_for_collision, check_goto_limits};
use crate::state::{AxisState, HomingMode, Mode, MoveSubMode};

/// One dispatch of the movement mode state machine.
pub fn service_stepper(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    store: &mut dyn PositionStore,
    signals: &BoardSignals,
) -> Result<(), DriveError> {
    if axis.ctrl.sync_requested {
        axis.ctrl.sync_requested = false;
        sync_steps_to_encoder(axis, io)?;
    }

    if !axis.enabled {
        if !axis.mode().is_active() {
            return Ok(());
        }
        axis.set_mode(Mode::Stop);
    }

    check_em_stop(axis, signals);

    if check_for_collision(axis) {
        warn!(slot = axis.slot, enc_pos = axis.enc.pos, "collision, axis stopped");
        axis.log(LogEvent::CollisionStop);
    }

    check_if_at_stored_position(axis);

    if axis.enc.kind == EncoderType::MagneticRotationManual {
        if !axis.mode().is_active() {
            return Ok(());
        }
        axis.set_mode(Mode::Stop);
    }

    check_save_position(axis, io, store)?;

    if axis.limits.limit_hit {
        axis.limits.limit_hit = false;
        axis.log(LogEvent::LimitHit);
    }

    if axis.mode() != Mode::Homing && !axis.ctrl.homing_mode.is_idle() {
        debug!(slot = axis.slot, mode = ?axis.mode(), "homing interrupted");
        abort_homing(axis, io)?;
    }

    match axis.mode() {
        Mode::Stop => stop(axis, io)?,
        Mode::Idle | Mode::SoftStopStart | Mode::SoftStopWait => {}
        Mode::Goto | Mode::Jog => {
            start_move(axis);
            if axis.mode() != Mode::Stop {
                pid_ctrl(axis, io)?;
                axis.log(LogEvent::ControllerPid);
            }
        }
        Mode::Pid => {
            pid_ctrl(axis, io)?;
            axis.log(LogEvent::ControllerPid);
        }
        Mode::Run => {
            let speed = axis.speeds.get(axis.ctrl.speed_channel);
            configure_movement(axis, axis.ctrl.cmd_dir, speed, false);
            run_ctl(axis, io)?;
            axis.log(LogEvent::ControllerRun);
        }
        Mode::Homing => {
            service_homing(axis, io)?;
            axis.log(LogEvent::ControllerHoming);
        }
    }
    Ok(())
}

/// First cycle of a non-PID goto or jog: refuse targets behind an active
/// limit, then hand the move to the PID controller.
fn start_move(axis: &mut AxisState) {
    let sub = if axis.mode() == Mode::Goto {
        axis.ctrl.goto_mode
    } else {
        axis.ctrl.jog_mode
    };
    if sub == MoveSubMode::Idle {
        return;
    }
    if check_goto_limits(axis) {
        debug!(slot = axis.slot, target = axis.counters.cmnd_pos, "move refused at limit");
    }
    axis.ctrl.goto_mode = MoveSubMode::Idle;
    axis.ctrl.jog_mode = MoveSubMode::Idle;
}

fn stop(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    io.drive().hard_stop()?;
    if axis.params.drive.kval_hold == 0 {
        io.drive().soft_hiz()?;
    }
    axis.ctrl.cur_vel = 0;
    axis.ctrl.homing_mode = HomingMode::Idle;
    axis.limits.hard_stop = false;
    if axis.params.stage.collision_threshold > 0 {
        sync_steps_to_encoder(axis, io)?;
    }

    if holds_position(axis.flags()) && !axis.collision {
        axis.pid.max_velocity = 1;
        axis.set_mode(Mode::Pid);
    } else {
        axis.set_mode(Mode::Idle);
        axis.log(LogEvent::ControllerStop);
    }
    axis.counters.cmnd_pos = axis.enc.pos;
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
