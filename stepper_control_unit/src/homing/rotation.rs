//! Magnetic two-point calibration.
//!
//! Cycles the stage between the lowest and highest calibrated stored
//! positions under PID so the magnetic sensor settles its offset drift,
//! then recalls stored position 0.

use stepper_common::consts::CALIBRATION_POSITIONS;
use tracing::{debug, warn};

use crate::control::pid::pid_ctrl;
use crate::error::DriveError;
use crate::hal::ports::AxisIo;
use crate::position::sync_steps_to_encoder;
use crate::state::{AxisState, HomingMode, RotationPhase};

/// Settle window around each end point [counts].
pub const SETTLE_DEADBAND: i32 = 50;

/// Rest at each end point [cycles].
pub const END_POINT_DELAY: u32 = 100;

/// End-point visits before the calibration completes.
pub const CYCLE_REPEAT_COUNT: u8 = 3;

/// Lowest and highest calibrated positions, if all lie within travel.
pub fn calibration_span(axis: &AxisState) -> Option<(i32, i32)> {
    let max_pos = axis.max_pos();
    let mut span: Option<(i32, i32)> = None;
    for (i, &pos) in axis.store.stored_pos.iter().enumerate().take(CALIBRATION_POSITIONS) {
        if axis.store.is_blank(i) {
            continue;
        }
        if !(0..=max_pos).contains(&pos) {
            return None;
        }
        span = Some(span.map_or((pos, pos), |(lo, hi)| (lo.min(pos), hi.max(pos))));
    }
    span
}

fn set_phase(axis: &mut AxisState, phase: RotationPhase) {
    debug!(slot = axis.slot, ?phase, "rotation homing");
    axis.ctrl.homing_mode = HomingMode::Rotation(phase);
}

/// One cycle of two-point calibration.
pub fn service(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let Some((low, high)) = calibration_span(axis) else {
        warn!(slot = axis.slot, "no valid calibration positions stored");
        super::fail(axis);
        return Ok(());
    };

    let phase = match axis.ctrl.homing_mode {
        HomingMode::Start => {
            axis.pid.max_velocity = 1;
            axis.counters.cmnd_pos = low;
            axis.ctrl.homing_control = 0;
            sync_steps_to_encoder(axis, io)?;
            set_phase(axis, RotationPhase::MoveLow);
            None
        }
        HomingMode::Rotation(phase) => Some(phase),
        _ => None,
    };

    match phase {
        Some(RotationPhase::MoveLow) => {
            pid_ctrl(axis, io)?;
            settle(axis, RotationPhase::WaitLow);
        }
        Some(RotationPhase::WaitLow) if axis.ctrl.homing_counter >= END_POINT_DELAY => {
            axis.counters.cmnd_pos = high;
            axis.ctrl.homing_control += 1;
            set_phase(axis, RotationPhase::MoveHigh);
        }
        Some(RotationPhase::MoveHigh) => {
            pid_ctrl(axis, io)?;
            settle(axis, RotationPhase::WaitHigh);
        }
        Some(RotationPhase::WaitHigh) if axis.ctrl.homing_counter >= END_POINT_DELAY => {
            if axis.ctrl.homing_control >= CYCLE_REPEAT_COUNT {
                set_phase(axis, RotationPhase::Complete);
            } else {
                axis.counters.cmnd_pos = low;
                axis.ctrl.homing_control += 1;
                set_phase(axis, RotationPhase::MoveLow);
            }
        }
        Some(RotationPhase::Complete) => super::complete_and_recall(axis),
        Some(RotationPhase::Failed) => super::fail(axis),
        _ => {}
    }

    axis.ctrl.homing_counter = axis.ctrl.homing_counter.wrapping_add(1);
    Ok(())
}

/// After a PID move: fail on collision, else wait once settled.
fn settle(axis: &mut AxisState, next: RotationPhase) {
    if axis.collision {
        warn!(slot = axis.slot, enc_pos = axis.enc.pos, "collision during calibration");
        set_phase(axis, RotationPhase::Failed);
    } else if axis.pid.error.abs() <= SETTLE_DEADBAND {
        axis.ctrl.homing_counter = 0;
        set_phase(axis, next);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimAxisConfig, SimBus};
    use crate::state::Mode;
    use stepper_common::axis::params::{AxisFlags, AxisParameters, StoredState};
    use stepper_common::axis::types::{DriveChip, EncoderType, HomedStatus};

    fn axis(stored: &[i32]) -> AxisState {
        let mut params = AxisParameters::default();
        params.encoder.kind = EncoderType::MagneticRotation;
        params.flags = (AxisFlags::HAS_ENCODER | AxisFlags::USE_PID).bits();
        params.stage.max_pos = 10_000;
        params.drive.max_speed = 200;
        let mut store = StoredState::default();
        store.stored_pos[..stored.len()].copy_from_slice(stored);
        let mut a = AxisState::new(0, DriveChip::L6470, params, store);
        a.enabled = true;
        a.speeds.reset_all_to_unbound();
        a.set_mode(Mode::Homing);
        a.ctrl.homing_mode = HomingMode::Start;
        a
    }

    #[test]
    fn span_ignores_blank_slots() {
        let a = axis(&[3000, 1500, 8500]);
        assert_eq!(calibration_span(&a), Some((1500, 8500)));
    }

    #[test]
    fn out_of_travel_position_fails_immediately() {
        let mut bus = SimBus::new().with_axis(0, SimAxisConfig::default());
        let mut a = axis(&[1500, 12_000]);
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.enc.homed, HomedStatus::Failed);
        assert_eq!(a.mode(), Mode::Stop);
        assert!(a.ctrl.homing_mode.is_idle());
    }

    #[test]
    fn empty_table_fails() {
        let mut bus = SimBus::new().with_axis(0, SimAxisConfig::default());
        let mut a = axis(&[]);
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.enc.homed, HomedStatus::Failed);
    }

    #[test]
    fn cycles_between_end_points() {
        let mut bus = SimBus::new().with_axis(0, SimAxisConfig::default());
        let mut a = axis(&[1500, 8500]);
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.ctrl.homing_mode, HomingMode::Rotation(RotationPhase::MoveLow));
        assert_eq!(a.counters.cmnd_pos, 1500);

        // Pretend the stage is already at the low point.
        a.enc.pos = 1500;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.ctrl.homing_mode, HomingMode::Rotation(RotationPhase::WaitLow));

        for _ in 0..END_POINT_DELAY {
            service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        }
        assert_eq!(a.ctrl.homing_mode, HomingMode::Rotation(RotationPhase::MoveHigh));
        assert_eq!(a.counters.cmnd_pos, 8500);
        assert_eq!(a.ctrl.homing_control, 1);
    }

    #[test]
    fn collision_during_move_fails() {
        let mut bus = SimBus::new().with_axis(0, SimAxisConfig::default());
        let mut a = axis(&[1500, 8500]);
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        a.enc.pos = 5000;
        a.collision = true;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.ctrl.homing_mode, HomingMode::Rotation(RotationPhase::Failed));
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.enc.homed, HomedStatus::Failed);
        assert_eq!(a.mode(), Mode::Stop);
    }

    #[test]
    fn completion_recalls_first_stored_position() {
        let mut bus = SimBus::new().with_axis(0, SimAxisConfig::default());
        let mut a = axis(&[1500, 8500]);
        a.ctrl.homing_mode = HomingMode::Rotation(RotationPhase::Complete);
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.enc.homed, HomedStatus::Homed);
        assert_eq!(a.limits.homed, HomedStatus::Homed);
        assert_eq!(a.mode(), Mode::Pid);
        assert_eq!(a.counters.cmnd_pos, 1500);
        assert!(a.ctrl.homing_mode.is_idle());
    }
}
