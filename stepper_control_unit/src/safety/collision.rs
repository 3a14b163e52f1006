//! Step/encoder divergence detection.

use stepper_common::axis::types::EncoderType;

use crate::position::steps_in_counts;
use crate::state::{AxisState, Mode};

/// Divergence between the step-implied and measured positions [counts].
///
/// Rotary magnetic stages fold the divergence onto the shorter arc.
pub fn divergence(steps_in_counts: i32, enc_pos: i32, kind: EncoderType, max_pos: i32) -> i32 {
    let delta = steps_in_counts.wrapping_sub(enc_pos).saturating_abs();
    if kind.is_rotary_magnetic() && delta > max_pos / 2 {
        max_pos - delta
    } else {
        delta
    }
}

/// Check for a collision and stop the axis if one is found.
///
/// Disabled when the collision threshold is zero. While moving, a
/// divergence above the threshold latches a hard stop, forces STOP and
/// disables the channel. Rotary magnetic stages stay enabled since their
/// calibration moves diverge from the step count. During HOMING on those stages
/// only the collision flag is raised and the homing engine decides.
///
/// Returns true when the axis was stopped.
pub fn check_for_collision(axis: &mut AxisState) -> bool {
    let threshold = axis.params.stage.collision_threshold;
    if threshold == 0 {
        return false;
    }

    let kind = axis.enc.kind;
    let delta = divergence(steps_in_counts(axis), axis.enc.pos, kind, axis.max_pos());
    axis.collision = false;
    if delta <= i32::from(threshold) {
        return false;
    }

    match axis.mode() {
        Mode::Homing => {
            if kind.is_rotary_magnetic() {
                axis.collision = true;
            }
            false
        }
        Mode::Stop | Mode::Idle => false,
        _ => {
            if !kind.is_rotary_magnetic() {
                axis.enabled = false;
            }
            axis.limits.hard_stop = true;
            axis.collision = true;
            axis.set_mode(Mode::Stop);
            true
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use stepper_common::axis::params::{AxisParameters, StoredState};
    use stepper_common::axis::types::DriveChip;

    fn axis(kind: EncoderType, threshold: u16) -> AxisState {
        let mut params = AxisParameters::default();
        params.encoder.kind = kind;
        params.stage.collision_threshold = threshold;
        params.stage.max_pos = 10_000;
        let mut a = AxisState::new(0, DriveChip::L6470, params, StoredState::default());
        a.enabled = true;
        a
    }

    #[test]
    fn zero_threshold_never_fires() {
        let mut a = axis(EncoderType::QuadLinear, 0);
        a.set_mode(Mode::Pid);
        a.counters.position_32 = 1_000_000;
        a.enc.pos = -1_000_000;
        assert!(!check_for_collision(&mut a));
        assert!(!a.collision);
        assert_eq!(a.mode(), Mode::Pid);
        assert!(a.enabled);
    }

    #[test]
    fn linear_collision_disables_channel() {
        let mut a = axis(EncoderType::QuadLinear, 50);
        a.set_mode(Mode::Pid);
        a.counters.position_32 = 500;
        a.enc.pos = 0;
        assert!(check_for_collision(&mut a));
        assert!(a.collision);
        assert!(a.limits.hard_stop);
        assert!(!a.enabled);
        assert_eq!(a.mode(), Mode::Stop);
    }

    #[test]
    fn rotary_collision_keeps_channel_enabled() {
        let mut a = axis(EncoderType::MagneticRotation, 50);
        a.set_mode(Mode::Run);
        a.counters.position_32 = 3000;
        a.enc.pos = 0;
        assert!(check_for_collision(&mut a));
        assert!(a.enabled);
    }

    #[test]
    fn rotary_divergence_folds_across_wrap() {
        assert_eq!(divergence(9990, 10, EncoderType::MagneticRotation, 10_000), 20);
        assert_eq!(divergence(9990, 10, EncoderType::QuadLinear, 10_000), 9980);
    }

    #[test]
    fn rotary_homing_only_flags() {
        let mut a = axis(EncoderType::MagneticRotationAutoHome, 50);
        a.set_mode(Mode::Homing);
        a.counters.position_32 = 3000;
        assert!(!check_for_collision(&mut a));
        assert!(a.collision);
        assert_eq!(a.mode(), Mode::Homing);

        let mut linear = axis(EncoderType::QuadLinear, 50);
        linear.set_mode(Mode::Homing);
        linear.counters.position_32 = 3000;
        assert!(!check_for_collision(&mut linear));
        assert!(!linear.collision);
    }

    #[test]
    fn idle_divergence_ignored() {
        let mut a = axis(EncoderType::QuadLinear, 50);
        a.set_mode(Mode::Idle);
        a.counters.position_32 = 3000;
        assert!(!check_for_collision(&mut a));
        assert!(a.enabled);
    }
}
