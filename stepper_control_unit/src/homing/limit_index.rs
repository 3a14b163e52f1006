//! Limit-switch and index-pulse homing.
//!
//! Limit/hard-stop targets drive toward the home direction with the slot's
//! "zero encoder on limit" latch armed. Index targets sweep one way for
//! [`HOMING_TIME`] cycles, then back for twice as long. Detection is
//! delegated to the run-limit check, evaluated after every phase.

use stepper_common::axis::params::AxisFlags;
use stepper_common::axis::types::{Direction, HomeDirection, HomeTarget, HomedStatus, SpeedChannel};
use tracing::{debug, info, warn};

use crate::control::movement::{configure_movement, run_ctl};
use crate::encoder::set_encoder_position;
use crate::error::DriveError;
use crate::hal::drive::StepperDrive;
use crate::hal::ports::AxisIo;
use crate::position::sync_steps_to_encoder;
use crate::safety::check_run_limits;
use crate::state::{AxisState, HomingMode, LimitPhase, Mode};

/// Length of one index sweep leg [cycles].
pub const HOMING_TIME: u32 = 200;

/// Whether the index sweep legs apply the stepper reversal.
const SWEEP_APPLIES_REVERSAL: bool = !cfg!(feature = "legacy-index-homing-direction");

#[inline]
fn homes_cw(dir: HomeDirection) -> bool {
    matches!(dir, HomeDirection::Cw | HomeDirection::CwFirst)
}

/// The limit opposite the home direction is active.
fn start_blocked(axis: &AxisState) -> bool {
    let l = &axis.limits;
    if homes_cw(axis.params.home.home_dir) {
        l.ccw || l.soft_ccw
    } else {
        l.cw || l.soft_cw
    }
}

fn drive(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    direction: Direction,
    apply_reversal: bool,
) -> Result<(), DriveError> {
    let speed = axis.speeds.get(SpeedChannel::Homing);
    configure_movement(axis, direction, speed, apply_reversal);
    run_ctl(axis, io)?;
    Ok(())
}

fn set_phase(axis: &mut AxisState, phase: LimitPhase) {
    debug!(slot = axis.slot, ?phase, "limit homing");
    axis.ctrl.homing_mode = HomingMode::Limit(phase);
}

/// One cycle of limit/index homing.
pub fn service(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let home = axis.params.home;

    if axis.ctrl.homing_mode == HomingMode::Start && home.target.drives_to_limit() && start_blocked(axis)
    {
        info!(slot = axis.slot, "homing deferred: resting on opposing limit");
        set_phase(axis, LimitPhase::DelayedStart);
    }

    let phase = match axis.ctrl.homing_mode {
        HomingMode::Start => {
            start(axis, io)?;
            None
        }
        HomingMode::Limit(phase) => Some(phase),
        _ => return Ok(()),
    };

    if let Some(phase) = phase {
        step_phase(axis, io, phase)?;
    }

    let detecting = !matches!(
        axis.ctrl.homing_mode,
        HomingMode::Limit(LimitPhase::ExitLimit | LimitPhase::DelayedStart | LimitPhase::Clear)
            | HomingMode::Idle
    );
    if detecting && check_run_limits(axis, io)? {
        return home_found(axis, io);
    }

    axis.ctrl.homing_counter = axis.ctrl.homing_counter.wrapping_add(1);
    Ok(())
}

fn start(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let home = axis.params.home;
    io.set_zero_on_limit(true)?;

    match home.target {
        HomeTarget::Limit | HomeTarget::HardStop => {
            sync_steps_to_encoder(axis, io)?;
            if homes_cw(home.home_dir) {
                if !axis.limits.ccw {
                    drive(axis, io, Direction::Forward, true)?;
                    set_phase(axis, LimitPhase::WaitLimit);
                }
            } else if !axis.limits.cw {
                drive(axis, io, Direction::Reverse, true)?;
                set_phase(axis, LimitPhase::WaitLimit);
            }
        }
        HomeTarget::Index => {
            axis.limits.index = false;
            let first = if homes_cw(home.home_dir) {
                LimitPhase::CwDirFirst
            } else {
                LimitPhase::CcwDirFirst
            };
            set_phase(axis, first);
        }
    }
    Ok(())
}

fn step_phase(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    phase: LimitPhase,
) -> Result<(), DriveError> {
    let counter = axis.ctrl.homing_counter;
    match phase {
        LimitPhase::CwDirFirst => {
            axis.ctrl.homing_counter = 0;
            drive(axis, io, Direction::Forward, SWEEP_APPLIES_REVERSAL)?;
            set_phase(axis, LimitPhase::CcwDir);
        }
        LimitPhase::CcwDir if counter > HOMING_TIME => {
            axis.ctrl.homing_counter = 0;
            drive(axis, io, Direction::Reverse, true)?;
            set_phase(axis, LimitPhase::ReturnCw);
        }
        LimitPhase::ReturnCw if counter > HOMING_TIME * 2 => {
            axis.ctrl.homing_counter = 0;
            drive(axis, io, Direction::Forward, SWEEP_APPLIES_REVERSAL)?;
            set_phase(axis, LimitPhase::IndexNotFound);
        }
        LimitPhase::CcwDirFirst => {
            axis.ctrl.homing_counter = 0;
            drive(axis, io, Direction::Reverse, SWEEP_APPLIES_REVERSAL)?;
            set_phase(axis, LimitPhase::CwDir);
        }
        LimitPhase::CwDir if counter > HOMING_TIME => {
            axis.ctrl.homing_counter = 0;
            drive(axis, io, Direction::Forward, SWEEP_APPLIES_REVERSAL)?;
            set_phase(axis, LimitPhase::ReturnCcw);
        }
        LimitPhase::ReturnCcw if counter > HOMING_TIME * 2 => {
            axis.ctrl.homing_counter = 0;
            drive(axis, io, Direction::Reverse, SWEEP_APPLIES_REVERSAL)?;
            set_phase(axis, LimitPhase::IndexNotFound);
        }
        LimitPhase::IndexNotFound if counter > HOMING_TIME => {
            warn!(slot = axis.slot, "index not found");
            axis.limits.homed = HomedStatus::NotHomed;
            axis.enc.homed = HomedStatus::NotHomed;
            set_phase(axis, LimitPhase::Clear);
        }
        LimitPhase::Clear => {
            io.drive().soft_stop()?;
            io.set_zero_on_limit(false)?;
            axis.ctrl.homing_mode = HomingMode::Idle;
            axis.set_mode(Mode::Stop);
        }
        LimitPhase::ExitLimit => {
            let l = &axis.limits;
            let cleared = if homes_cw(axis.params.home.home_dir) {
                !l.cw
            } else {
                !l.ccw
            };
            if cleared {
                io.set_zero_on_limit(true)?;
                set_phase(axis, LimitPhase::WaitLimit);
            }
        }
        LimitPhase::DelayedStart if !start_blocked(axis) => {
            sync_steps_to_encoder(axis, io)?;
            let toward = Direction::from_bool(homes_cw(axis.params.home.home_dir));
            drive(axis, io, toward, true)?;
            set_phase(axis, LimitPhase::ExitLimit);
        }
        _ => {}
    }
    Ok(())
}

/// Limit edge or index seen: the position is now the reference.
fn home_found(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    if axis.has_flag(AxisFlags::HAS_ENCODER) {
        io.set_zero_on_limit(false)?;
    } else {
        axis.enc.pos = 0;
    }
    axis.limits.homed = HomedStatus::Homed;
    axis.enc.homed = HomedStatus::Homed;
    sync_steps_to_encoder(axis, io)?;
    axis.ctrl.homing_mode = HomingMode::Idle;
    info!(slot = axis.slot, enc_pos = axis.enc.pos, "homed");

    let offset = axis.params.home.offset_distance;
    if offset != 0 {
        let start = if axis.has_flag(AxisFlags::ENCODER_REVERSED) {
            offset
        } else {
            -offset
        };
        set_encoder_position(axis, io, start)?;
        axis.enc.pos = start;
        sync_steps_to_encoder(axis, io)?;
        axis.ctrl.cmd_dir = !axis.ctrl.cmd_dir;
        axis.counters.cmnd_pos = 0;
        axis.pid.max_velocity = 1;
        axis.set_mode(Mode::Goto);
    } else if axis.mode() == Mode::Homing {
        axis.set_mode(Mode::Stop);
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimAxisConfig, SimBus};
    use stepper_common::axis::params::{AxisParameters, StoredState};
    use stepper_common::axis::types::DriveChip;

    fn axis(target: HomeTarget, dir: HomeDirection, flags: AxisFlags) -> AxisState {
        let mut params = AxisParameters::default();
        params.flags = flags.bits();
        params.drive.max_speed = 200;
        params.home.target = target;
        params.home.home_dir = dir;
        let mut a = AxisState::new(0, DriveChip::L6470, params, StoredState::default());
        a.enabled = true;
        a.speeds.reset_all_to_unbound();
        a.ctrl.speed_channel = SpeedChannel::Homing;
        a.set_mode(Mode::Homing);
        a.ctrl.homing_mode = HomingMode::Start;
        a.limits.homed = HomedStatus::Homing;
        a
    }

    fn bus() -> SimBus {
        SimBus::new().with_axis(0, SimAxisConfig::default())
    }

    #[test]
    fn limit_homing_arms_zero_latch_and_drives_home() {
        let mut bus = bus();
        let mut a = axis(HomeTarget::Limit, HomeDirection::Ccw, AxisFlags::HAS_ENCODER);
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.ctrl.homing_mode, HomingMode::Limit(LimitPhase::WaitLimit));
        assert!(bus.zero_on_limit_armed(0));
        let (dir, speed) = bus.running(0).unwrap();
        assert_eq!(dir, Direction::Reverse);
        assert_eq!(speed, 100 * 1024);
    }

    #[test]
    fn resting_on_opposing_limit_defers_without_motion() {
        let mut bus = bus();
        let mut a = axis(HomeTarget::Limit, HomeDirection::Cw, AxisFlags::HAS_ENCODER);
        a.limits.soft_ccw = true;
        for _ in 0..5 {
            service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
            assert_eq!(a.ctrl.homing_mode, HomingMode::Limit(LimitPhase::DelayedStart));
        }
        assert_eq!(bus.run_count(0), 0);
        assert_eq!(a.mode(), Mode::Homing);

        a.limits.soft_ccw = false;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.ctrl.homing_mode, HomingMode::Limit(LimitPhase::ExitLimit));
        assert_eq!(bus.running(0).map(|r| r.0), Some(Direction::Forward));

        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.ctrl.homing_mode, HomingMode::Limit(LimitPhase::WaitLimit));
    }

    #[test]
    fn limit_edge_marks_homed() {
        let mut bus = bus();
        let mut a = axis(HomeTarget::Limit, HomeDirection::Cw, AxisFlags::HAS_ENCODER);
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        a.limits.cw = true;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.limits.homed, HomedStatus::Homed);
        assert_eq!(a.enc.homed, HomedStatus::Homed);
        assert_eq!(a.mode(), Mode::Stop);
        assert!(a.ctrl.homing_mode.is_idle());
        assert!(!bus.zero_on_limit_armed(0));
    }

    #[test]
    fn open_loop_home_zeroes_position() {
        let mut bus = bus();
        let mut a = axis(HomeTarget::Limit, HomeDirection::Cw, AxisFlags::empty());
        a.params.stage.counts_per_unit = 2.0;
        a.enc.pos = 500;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        a.limits.cw = true;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.enc.pos, 0);
        assert_eq!(a.counters.position_32, 0);
        assert_eq!(a.limits.homed, HomedStatus::Homed);
    }

    #[test]
    fn home_offset_issues_reversed_goto() {
        let mut bus = bus();
        let mut a = axis(HomeTarget::Limit, HomeDirection::Cw, AxisFlags::HAS_ENCODER);
        a.params.home.offset_distance = 250;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        let homing_dir = a.ctrl.cmd_dir;
        a.limits.cw = true;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.mode(), Mode::Goto);
        assert_eq!(a.enc.pos, -250);
        assert_eq!(a.counters.cmnd_pos, 0);
        assert_eq!(a.ctrl.cmd_dir, !homing_dir);
        assert!(a.ctrl.homing_mode.is_idle());
    }

    #[test]
    fn index_sweep_times_out_as_not_found() {
        let mut bus = bus();
        let mut a = axis(
            HomeTarget::Index,
            HomeDirection::CwFirst,
            AxisFlags::HAS_ENCODER | AxisFlags::HAS_INDEX,
        );
        let mut phases = Vec::new();
        for _ in 0..(HOMING_TIME * 4 + 20) {
            service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
            if let HomingMode::Limit(p) = a.ctrl.homing_mode {
                if phases.last() != Some(&p) {
                    phases.push(p);
                }
            }
            if a.mode() != Mode::Homing {
                break;
            }
        }
        assert_eq!(
            phases,
            vec![
                LimitPhase::CwDirFirst,
                LimitPhase::CcwDir,
                LimitPhase::ReturnCw,
                LimitPhase::IndexNotFound,
                LimitPhase::Clear,
            ]
        );
        assert_eq!(a.mode(), Mode::Stop);
        assert_eq!(a.limits.homed, HomedStatus::NotHomed);
        assert!(!bus.zero_on_limit_armed(0));
    }

    #[test]
    fn index_pulse_ends_sweep() {
        let mut bus = bus();
        let mut a = axis(
            HomeTarget::Index,
            HomeDirection::CcwFirst,
            AxisFlags::HAS_ENCODER | AxisFlags::HAS_INDEX,
        );
        for _ in 0..3 {
            service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        }
        assert_eq!(a.ctrl.homing_mode, HomingMode::Limit(LimitPhase::CwDir));
        a.limits.index = true;
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.limits.homed, HomedStatus::Homed);
        assert_eq!(a.mode(), Mode::Stop);
    }

    #[cfg(feature = "legacy-index-homing-direction")]
    #[test]
    fn legacy_sweep_ignores_stepper_reversal() {
        let mut bus = bus();
        let mut a = axis(
            HomeTarget::Index,
            HomeDirection::CwFirst,
            AxisFlags::HAS_ENCODER | AxisFlags::STEPPER_REVERSED,
        );
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        service(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.ctrl.homing_mode, HomingMode::Limit(LimitPhase::CcwDir));
        assert_eq!(a.ctrl.cmd_dir, Direction::Forward);
    }
}
