//! Epi-turret calibration.
//!
//! The turret carries an optical slot read through the slot's index line.
//! The engine proves the turret turns freely, spins one full revolution to
//! settle the magnetic sensor, finds the first edge of the slot from the
//! inside (so the far edge cannot double-trigger), then walks the six
//! turret positions on step counts alone and stores each one.

use stepper_common::axis::params::AxisFlags;
use stepper_common::axis::types::{Direction, SpeedChannel};
use stepper_common::consts::CALIBRATION_POSITIONS;
use tracing::{debug, info, warn};

use crate::control::movement::configure_movement;
use crate::control::pid::pid_ctrl;
use crate::error::DriveError;
use crate::hal::drive::StepperDrive;
use crate::hal::ports::AxisIo;
use crate::position::sync_steps_to_encoder;
use crate::state::{AxisState, HomingMode, TurretPhase};

/// Free-rotation check move [counts].
pub const COLLISION_CHECK_COUNTS: i32 = 30_000;
/// Slot edge to position 1 [counts].
pub const SLOT_TO_FIRST_POSITION: i32 = 3300;
/// Spacing of the turret positions [counts].
pub const COUNTS_BETWEEN_POSITIONS: i32 = 10_923;

/// Approach speed divisors, relative to the HOMING channel.
pub const MEDIUM_SPEED_DIV: u32 = 20;
pub const SLOW_SPEED_DIV: u32 = 100;

/// Settle after the first edge [cycles].
pub const FIRST_EDGE_DELAY: u32 = 100;
/// Settle after the final edge [cycles].
pub const SECOND_EDGE_DELAY: u32 = 100;
/// Settle before storing a position [cycles].
pub const SAVE_POSITION_DELAY: u32 = 150;

/// `homing_control` while the calibration spin has not run yet.
const SPIN_PENDING: u8 = 20;
/// `homing_control` during the calibration spin.
const SPIN_RUNNING: u8 = 21;

fn set_phase(axis: &mut AxisState, phase: TurretPhase) {
    debug!(slot = axis.slot, ?phase, control = axis.ctrl.homing_control, "turret homing");
    axis.ctrl.homing_mode = HomingMode::Turret(phase);
}

/// Issue a RUN without the run-limit veto; the turret has no end stops.
fn spin(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    direction: Direction,
    divisor: u32,
) -> Result<(), DriveError> {
    let speed = axis.speeds.get(SpeedChannel::Homing) / divisor.max(1);
    configure_movement(axis, direction, speed, true);
    axis.ctrl.cur_dir = axis.ctrl.cmd_dir;
    axis.ctrl.cur_vel = axis.ctrl.cmd_vel;
    io.drive().run(axis.ctrl.cmd_dir, axis.ctrl.cmd_vel)
}

/// Drop the encoder so the next PID move runs on step counts.
fn move_open_loop(axis: &mut AxisState, io: &mut AxisIo<'_>, distance: i32) -> Result<(), DriveError> {
    axis.ctrl.prev_flags = axis.params.flags;
    axis.params.flags &= !AxisFlags::HAS_ENCODER.bits();
    sync_steps_to_encoder(axis, io)?;
    axis.pid.max_velocity = 1;
    axis.counters.cmnd_pos = axis.enc.pos.wrapping_sub(distance);
    set_phase(axis, TurretPhase::GotoNext);
    Ok(())
}

/// One cycle of turret calibration.
pub fn service(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let in_slot = !io.read_limit_switches()?.index;
    let counter = axis.ctrl.homing_counter;

    let phase = match axis.ctrl.homing_mode {
        HomingMode::Start => {
            sync_steps_to_encoder(axis, io)?;
            axis.pid.max_velocity = 1;
            axis.counters.cmnd_pos = axis.enc.pos.wrapping_sub(COLLISION_CHECK_COUNTS);
            set_phase(axis, TurretPhase::CheckNoCollision);
            None
        }
        HomingMode::Turret(phase) => Some(phase),
        _ => None,
    };

    match phase {
        Some(TurretPhase::CheckNoCollision) => {
            pid_ctrl(axis, io)?;
            if axis.collision {
                warn!(slot = axis.slot, "turret blocked");
                set_phase(axis, TurretPhase::Failed);
            } else if axis.pid.error == 0 {
                set_phase(axis, TurretPhase::Begin);
            }
        }
        Some(TurretPhase::Begin) => {
            axis.ctrl.homing_control = SPIN_PENDING;
            io.set_opto_power(true)?;
            set_phase(axis, TurretPhase::SpinFast);
        }
        Some(TurretPhase::SpinFast) => {
            spin(axis, io, Direction::Reverse, 1)?;
            match axis.ctrl.homing_control {
                SPIN_PENDING => set_phase(axis, TurretPhase::WaitFirstEdge),
                SPIN_RUNNING => {
                    axis.ctrl.homing_counter = 0;
                    set_phase(axis, TurretPhase::SettleDelay);
                }
                _ => {}
            }
        }
        Some(TurretPhase::WaitFirstEdge) if in_slot => {
            io.drive().hard_stop()?;
            axis.ctrl.homing_counter = 0;
            set_phase(axis, TurretPhase::SettleDelay);
        }
        Some(TurretPhase::SettleDelay) if counter >= FIRST_EDGE_DELAY => {
            match axis.ctrl.homing_control {
                SPIN_PENDING => {
                    axis.ctrl.homing_control = SPIN_RUNNING;
                    set_phase(axis, TurretPhase::SpinFast);
                }
                SPIN_RUNNING => {
                    axis.ctrl.homing_control = 0;
                    set_phase(axis, TurretPhase::WaitFirstEdge);
                }
                _ => set_phase(axis, TurretPhase::CheckPassedSlot),
            }
        }
        Some(TurretPhase::CheckPassedSlot) => {
            let (next, divisor) = if in_slot {
                (TurretPhase::BackToEdge, SLOW_SPEED_DIV)
            } else {
                (TurretPhase::GetInSlot, MEDIUM_SPEED_DIV)
            };
            set_phase(axis, next);
            spin(axis, io, Direction::Forward, divisor)?;
        }
        Some(TurretPhase::GetInSlot) if in_slot => {
            io.drive().hard_stop()?;
            spin(axis, io, Direction::Forward, SLOW_SPEED_DIV)?;
            set_phase(axis, TurretPhase::BackToEdge);
        }
        Some(TurretPhase::BackToEdge) if !in_slot => {
            io.drive().hard_stop()?;
            axis.ctrl.homing_counter = 0;
            set_phase(axis, TurretPhase::EdgeDelay);
        }
        Some(TurretPhase::EdgeDelay) if counter >= SECOND_EDGE_DELAY => {
            axis.enc.zero = 0;
            info!(slot = axis.slot, enc_pos = axis.enc.pos, "turret slot edge found");
            move_open_loop(axis, io, SLOT_TO_FIRST_POSITION)?;
        }
        Some(TurretPhase::GotoNext) => {
            pid_ctrl(axis, io)?;
            if axis.collision {
                axis.params.flags = axis.ctrl.prev_flags;
                set_phase(axis, TurretPhase::Failed);
            } else if axis.pid.error == 0 {
                axis.params.flags = axis.ctrl.prev_flags;
                axis.ctrl.homing_counter = 0;
                set_phase(axis, TurretPhase::SaveDelay);
            }
        }
        Some(TurretPhase::SaveDelay) if counter >= SAVE_POSITION_DELAY => {
            set_phase(axis, TurretPhase::SavePosition);
        }
        Some(TurretPhase::SavePosition) => {
            sync_steps_to_encoder(axis, io)?;
            let index = axis.ctrl.homing_control as usize;
            if let Some(slot) = axis.store.stored_pos.get_mut(index) {
                *slot = axis.enc.pos;
            }
            debug!(slot = axis.slot, index, enc_pos = axis.enc.pos, "turret position stored");
            axis.ctrl.homing_control += 1;
            if axis.ctrl.homing_control as usize >= CALIBRATION_POSITIONS {
                set_phase(axis, TurretPhase::Complete);
            } else {
                move_open_loop(axis, io, COUNTS_BETWEEN_POSITIONS)?;
            }
        }
        Some(TurretPhase::Complete) => {
            io.set_opto_power(false)?;
            super::complete_and_recall(axis);
        }
        Some(TurretPhase::Failed) => {
            io.set_opto_power(false)?;
            super::fail(axis);
        }
        _ => {}
    }

    axis.ctrl.homing_counter = axis.ctrl.homing_counter.wrapping_add(1);
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
