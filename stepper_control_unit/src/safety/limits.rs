//! Limit switches, soft limits and the run-limit veto.
//!
//! `service_limits` refreshes the limit flags once per cycle from the slot's
//! latched switch state and the encoder position. `check_run_limits` gates
//! every RUN issued by the engine.

use stepper_common::axis::params::{
    AxisFlags, HARD_LIMIT_SWAP, HardLimitMode, LimitParams, hard_limit_mode,
};
use stepper_common::axis::types::{HomeTarget, HomedStatus};

use crate::error::DriveError;
use crate::hal::drive::StepperDrive;
use crate::hal::ports::{AxisIo, LimitSample};
use crate::state::{AxisState, LimitState, Mode, MoveSubMode};

/// Pending-interrupt cycles before the switch lines are sampled.
pub const LIMIT_DEBOUNCE_CYCLES: u8 = 2;

// ─── Run / goto vetoes ──────────────────────────────────────────────

/// Veto the configured RUN if it drives into an active limit.
///
/// `cmd_dir` is the drive direction, so the stepper reversal is undone
/// before comparing with the stage-side limit flags. While homing to an
/// index, an asserted index flag also stops the drive. A latched hard-stop
/// request always stops the drive but leaves HOMING in place so the homing
/// engine can react. The index flag is consumed.
///
/// Returns whether anything fired; the result is kept in
/// `limits.limit_hit` for the next cycle's log.
pub fn check_run_limits(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<bool, DriveError> {
    let toward_cw = axis
        .ctrl
        .cmd_dir
        .reversed_if(axis.has_flag(AxisFlags::STEPPER_REVERSED))
        .is_forward();
    let mut fired = false;

    if (axis.limits.cw || axis.limits.soft_cw) && toward_cw {
        io.drive().hard_stop()?;
        axis.set_mode(Mode::Stop);
        fired = true;
    }
    if (axis.limits.ccw || axis.limits.soft_ccw) && !toward_cw {
        io.drive().hard_stop()?;
        axis.set_mode(Mode::Stop);
        fired = true;
    }

    if axis.mode() == Mode::Homing
        && axis.params.home.target == HomeTarget::Index
        && axis.has_flag(AxisFlags::HAS_INDEX)
        && axis.limits.index
    {
        io.drive().hard_stop()?;
        axis.set_mode(Mode::Stop);
        fired = true;
    }

    if axis.limits.hard_stop {
        axis.limits.hard_stop = false;
        io.drive().hard_stop()?;
        if axis.mode() != Mode::Homing {
            axis.set_mode(Mode::Stop);
        }
        fired = true;
    }

    axis.limits.index = false;
    axis.limits.limit_hit = fired;
    Ok(fired)
}

/// Cancel a goto whose target lies beyond an already active limit.
///
/// Touches no hardware. Returns whether the goto was cancelled.
pub fn check_goto_limits(axis: &mut AxisState) -> bool {
    let target = axis.counters.cmnd_pos;
    let pos = axis.enc.pos;
    let l = &axis.limits;
    let blocked =
        ((l.cw || l.soft_cw) && target > pos) || ((l.ccw || l.soft_ccw) && target < pos);
    if blocked {
        axis.set_mode(Mode::Stop);
        axis.ctrl.goto_mode = MoveSubMode::Idle;
    }
    blocked
}

// ─── Per-cycle refresh ──────────────────────────────────────────────

/// Refresh the limit flags for this cycle.
pub fn service_limits(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let reversed = axis.has_flag(AxisFlags::ENCODER_REVERSED);
    apply_soft_limits(&mut axis.limits, &axis.params.limits, axis.enc.pos, reversed);

    let kind = axis.enc.kind;
    if kind.has_absolute_limits() {
        apply_absolute_limits(&mut axis.limits, &axis.params.limits, axis.enc.pos);
        // The index latch is not used on absolute stages; keep it acknowledged.
        if io.limit_interrupt_pending()? {
            io.read_limit_switches()?;
        }
    } else if kind.has_arc_limits() {
        apply_arc_limits(&mut axis.limits, &axis.params.limits, axis.enc.pos);
    } else {
        service_interrupt_limits(axis, io)?;
    }
    Ok(())
}

/// Soft limits against the encoder position; swapped when the encoder
/// counts against the stage.
pub fn apply_soft_limits(limits: &mut LimitState, cfg: &LimitParams, pos: i32, reversed: bool) {
    if reversed {
        limits.soft_cw = pos < cfg.ccw_soft_limit;
        limits.soft_ccw = pos > cfg.cw_soft_limit;
    } else {
        limits.soft_cw = pos > cfg.cw_soft_limit;
        limits.soft_ccw = pos < cfg.ccw_soft_limit;
    }
}

/// Linear absolute stages: the limits are a window on the reading.
pub fn apply_absolute_limits(limits: &mut LimitState, cfg: &LimitParams, pos: i32) {
    limits.cw = pos > cfg.abs_high_limit;
    limits.ccw = !limits.cw && pos < cfg.abs_low_limit;
}

/// Rotary stages: the limits bound an allowed arc.
///
/// With the swap bit set on the CW word the allowed arc is the one that
/// crosses the sensor wrap point.
pub fn apply_arc_limits(limits: &mut LimitState, cfg: &LimitParams, pos: i32) {
    let (low, high) = (cfg.abs_low_limit, cfg.abs_high_limit);
    let wrapped = cfg.cw_hard_limit & HARD_LIMIT_SWAP != 0;
    let allowed = if wrapped {
        pos < low || pos > high
    } else {
        pos > low && pos < high
    };
    if allowed {
        limits.cw = false;
        limits.ccw = false;
    } else if wrapped {
        limits.cw = pos > low;
        limits.ccw = !limits.cw;
    } else {
        limits.cw = pos < low;
        limits.ccw = !limits.cw;
    }
}

/// Interrupt-driven switches with debounce.
fn service_interrupt_limits(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    if !io.limit_interrupt_pending()? {
        axis.limits.debounce = 0;
        return Ok(());
    }

    // The index pulse is too short to sample; the edge itself is the index.
    if axis.limits.homed == HomedStatus::Homing {
        axis.limits.index = true;
    }

    if axis.limits.debounce >= LIMIT_DEBOUNCE_CYCLES {
        let sample = io.read_limit_switches()?;
        decode_switches(&mut axis.limits, &axis.params.limits, sample);
    }
    axis.limits.debounce = axis.limits.debounce.saturating_add(1);
    Ok(())
}

/// Apply per-switch polarity, ignore and swap settings to a raw sample.
pub fn decode_switches(limits: &mut LimitState, cfg: &LimitParams, sample: LimitSample) {
    limits.index = sample.index;
    let decode = |word: u16, raw: bool| match hard_limit_mode(word) {
        HardLimitMode::Ignored => false,
        HardLimitMode::MakesOnContact => raw,
        HardLimitMode::BreaksOnContact => !raw,
    };
    let cw = decode(cfg.cw_hard_limit, sample.cw);
    let ccw = decode(cfg.ccw_hard_limit, sample.ccw);

    limits.cw = if cfg.cw_hard_limit & HARD_LIMIT_SWAP != 0 { ccw } else { cw };
    limits.ccw = if cfg.ccw_hard_limit & HARD_LIMIT_SWAP != 0 { cw } else { ccw };
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::{SimAxisConfig, SimBus};
    use stepper_common::axis::params::{AxisParameters, StoredState};
    use stepper_common::axis::types::{Direction, DriveChip, EncoderType};

    fn axis(flags: AxisFlags) -> AxisState {
        let mut params = AxisParameters::default();
        params.flags = flags.bits();
        AxisState::new(0, DriveChip::L6470, params, StoredState::default())
    }

    fn sim(cfg: SimAxisConfig) -> SimBus {
        SimBus::new().with_axis(0, cfg)
    }

    #[test]
    fn cw_limit_blocks_forward_run() {
        let mut bus = sim(SimAxisConfig::default());
        let mut a = axis(AxisFlags::empty());
        a.set_mode(Mode::Run);
        a.limits.cw = true;
        a.ctrl.cmd_dir = Direction::Forward;
        let fired = check_run_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert!(fired);
        assert_eq!(a.mode(), Mode::Stop);
        assert!(a.limits.limit_hit);
    }

    #[test]
    fn cw_limit_allows_reverse_run() {
        let mut bus = sim(SimAxisConfig::default());
        let mut a = axis(AxisFlags::empty());
        a.set_mode(Mode::Run);
        a.limits.cw = true;
        a.ctrl.cmd_dir = Direction::Reverse;
        assert!(!check_run_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap());
        assert_eq!(a.mode(), Mode::Run);
        assert!(!a.limits.limit_hit);
    }

    #[test]
    fn reversal_undone_before_limit_compare() {
        let mut bus = sim(SimAxisConfig::default());
        let mut a = axis(AxisFlags::STEPPER_REVERSED);
        a.set_mode(Mode::Pid);
        a.limits.soft_ccw = true;
        // Drive direction forward on a reversed stepper moves the stage CCW.
        a.ctrl.cmd_dir = Direction::Forward;
        assert!(check_run_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap());
        assert_eq!(a.mode(), Mode::Stop);
    }

    #[test]
    fn latched_hard_stop_preserves_homing() {
        let mut bus = sim(SimAxisConfig::default());
        let mut a = axis(AxisFlags::empty());
        a.set_mode(Mode::Homing);
        a.limits.hard_stop = true;
        assert!(check_run_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap());
        assert_eq!(a.mode(), Mode::Homing);
        assert!(!a.limits.hard_stop);

        a.set_mode(Mode::Run);
        a.limits.hard_stop = true;
        check_run_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.mode(), Mode::Stop);
    }

    #[test]
    fn index_only_vetoes_when_homing_to_index() {
        let mut bus = sim(SimAxisConfig::default());
        let mut a = axis(AxisFlags::HAS_INDEX | AxisFlags::HAS_ENCODER);
        a.params.home.target = HomeTarget::Limit;
        a.set_mode(Mode::Homing);
        a.limits.index = true;
        assert!(!check_run_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap());
        assert!(!a.limits.index, "index consumed by the check");

        a.params.home.target = HomeTarget::Index;
        a.limits.index = true;
        assert!(check_run_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap());
        assert_eq!(a.mode(), Mode::Stop);
    }

    #[test]
    fn goto_into_active_limit_cancelled_without_hardware() {
        let mut a = axis(AxisFlags::empty());
        a.set_mode(Mode::Goto);
        a.ctrl.goto_mode = MoveSubMode::Start;
        a.enc.pos = 100;
        a.counters.cmnd_pos = 200;
        a.limits.soft_cw = true;
        assert!(check_goto_limits(&mut a));
        assert_eq!(a.mode(), Mode::Stop);
        assert_eq!(a.ctrl.goto_mode, MoveSubMode::Idle);

        a.set_mode(Mode::Goto);
        a.counters.cmnd_pos = 50;
        assert!(!check_goto_limits(&mut a));
        assert_eq!(a.mode(), Mode::Goto);
    }

    #[test]
    fn soft_limits_swap_with_reversed_encoder() {
        let cfg = LimitParams {
            cw_soft_limit: 1000,
            ccw_soft_limit: -1000,
            ..Default::default()
        };
        let mut l = LimitState::default();
        apply_soft_limits(&mut l, &cfg, 1500, false);
        assert!(l.soft_cw && !l.soft_ccw);
        apply_soft_limits(&mut l, &cfg, 1500, true);
        assert!(!l.soft_cw && l.soft_ccw);
        apply_soft_limits(&mut l, &LimitParams::default(), i32::MAX - 1, false);
        assert!(!l.soft_cw && !l.soft_ccw);
    }

    #[test]
    fn switch_polarity_ignore_and_swap() {
        let mut l = LimitState::default();
        let raw = LimitSample {
            cw: true,
            ccw: false,
            index: false,
        };
        let mut cfg = LimitParams::default();
        decode_switches(&mut l, &cfg, raw);
        assert!(l.cw && !l.ccw);

        cfg.cw_hard_limit = 2;
        cfg.ccw_hard_limit = 2;
        decode_switches(&mut l, &cfg, raw);
        assert!(!l.cw && l.ccw);

        cfg.cw_hard_limit = 0;
        cfg.ccw_hard_limit = 1;
        decode_switches(&mut l, &cfg, raw);
        assert!(!l.cw && !l.ccw);

        cfg.cw_hard_limit = 1 | HARD_LIMIT_SWAP;
        cfg.ccw_hard_limit = 1 | HARD_LIMIT_SWAP;
        decode_switches(&mut l, &cfg, raw);
        assert!(!l.cw && l.ccw);
    }

    #[test]
    fn arc_limits_both_orientations() {
        let mut cfg = LimitParams {
            abs_low_limit: 1000,
            abs_high_limit: 9000,
            ..Default::default()
        };
        let mut l = LimitState::default();
        apply_arc_limits(&mut l, &cfg, 5000);
        assert!(!l.cw && !l.ccw);
        apply_arc_limits(&mut l, &cfg, 500);
        assert!(l.cw && !l.ccw);
        apply_arc_limits(&mut l, &cfg, 9500);
        assert!(!l.cw && l.ccw);

        cfg.cw_hard_limit |= HARD_LIMIT_SWAP;
        apply_arc_limits(&mut l, &cfg, 500);
        assert!(!l.cw && !l.ccw);
        apply_arc_limits(&mut l, &cfg, 5000);
        assert!(l.cw && !l.ccw);
    }

    #[test]
    fn absolute_window_limits() {
        let cfg = LimitParams {
            abs_low_limit: -10,
            abs_high_limit: 10,
            ..Default::default()
        };
        let mut l = LimitState::default();
        apply_absolute_limits(&mut l, &cfg, 11);
        assert!(l.cw && !l.ccw);
        apply_absolute_limits(&mut l, &cfg, -11);
        assert!(!l.cw && l.ccw);
        apply_absolute_limits(&mut l, &cfg, 0);
        assert!(!l.cw && !l.ccw);
    }

    #[test]
    fn interrupt_limits_sampled_after_debounce() {
        let mut bus = sim(SimAxisConfig {
            cw_limit: Some(100),
            ..Default::default()
        });
        let mut a = axis(AxisFlags::HAS_ENCODER);
        a.enc.kind = EncoderType::QuadLinear;
        bus.set_stage_position(0, 150.0);
        bus.step(0.0);

        for _ in 0..LIMIT_DEBOUNCE_CYCLES {
            service_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
            assert!(!a.limits.cw, "still debouncing");
        }
        service_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert!(a.limits.cw);

        // Acknowledged: the next quiet cycle resets the debounce.
        service_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert_eq!(a.limits.debounce, 0);
        assert!(a.limits.cw);
    }

    #[test]
    fn interrupt_while_homing_raises_index() {
        let mut bus = sim(SimAxisConfig {
            cw_limit: Some(100),
            ..Default::default()
        });
        let mut a = axis(AxisFlags::HAS_ENCODER);
        a.limits.homed = HomedStatus::Homing;
        bus.set_stage_position(0, 150.0);
        bus.step(0.0);
        service_limits(&mut a, &mut bus.io(0, DriveChip::L6470)).unwrap();
        assert!(a.limits.index);
    }
}
