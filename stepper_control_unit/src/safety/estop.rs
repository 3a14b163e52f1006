//! Board-level emergency stop and power signals.
//!
//! The card logic latches an emergency stop per slot and, after a
//! board-level drive reset, raises a recovery bit telling the axis to
//! reprogram its drive. Both are written from outside the axis task and
//! are shared as atomics.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use stepper_common::axis::log::LogEvent;
use stepper_common::consts::MAX_AXES;

use crate::state::{AxisState, Mode};

/// Shared board-wide signals, one handle per card.
#[derive(Debug)]
pub struct BoardSignals {
    power_good: AtomicBool,
    em_stop: [AtomicBool; MAX_AXES],
    /// Per-slot drive-reset recovery request bits.
    recovery: AtomicU8,
    /// Per-slot absolute-encoder error bits.
    board_error: AtomicU8,
}

impl Default for BoardSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardSignals {
    pub fn new() -> Self {
        Self {
            power_good: AtomicBool::new(true),
            em_stop: std::array::from_fn(|_| AtomicBool::new(false)),
            recovery: AtomicU8::new(0),
            board_error: AtomicU8::new(0),
        }
    }

    #[inline]
    pub fn power_good(&self) -> bool {
        self.power_good.load(Ordering::Acquire)
    }

    pub fn set_power_good(&self, good: bool) {
        self.power_good.store(good, Ordering::Release);
    }

    /// Latch an emergency stop for `slot`.
    pub fn raise_em_stop(&self, slot: u8) {
        if let Some(latch) = self.em_stop.get(slot as usize) {
            latch.store(true, Ordering::Release);
        }
    }

    /// Read and clear the emergency-stop latch of `slot`.
    #[inline]
    pub fn take_em_stop(&self, slot: u8) -> bool {
        self.em_stop
            .get(slot as usize)
            .is_some_and(|latch| latch.swap(false, Ordering::AcqRel))
    }

    /// Ask the axis on `slot` to reprogram its drive.
    pub fn request_recovery(&self, slot: u8) {
        if let Some(bit) = slot_bit(slot) {
            self.recovery.fetch_or(bit, Ordering::AcqRel);
        }
    }

    #[inline]
    pub fn recovery_pending(&self, slot: u8) -> bool {
        slot_bit(slot).is_some_and(|bit| self.recovery.load(Ordering::Acquire) & bit != 0)
    }

    pub fn clear_recovery(&self, slot: u8) {
        if let Some(bit) = slot_bit(slot) {
            self.recovery.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    /// Flag a persistent encoder error on `slot`.
    pub fn set_board_error(&self, slot: u8) {
        if let Some(bit) = slot_bit(slot) {
            self.board_error.fetch_or(bit, Ordering::AcqRel);
        }
    }

    /// Per-slot encoder error bits.
    #[inline]
    pub fn board_error(&self) -> u8 {
        self.board_error.load(Ordering::Acquire)
    }
}

#[inline]
fn slot_bit(slot: u8) -> Option<u8> {
    1u8.checked_shl(slot as u32)
}

/// Consume the emergency-stop latch and stop the axis if it was set.
///
/// Also drops the axis out of the active shuttle group. Returns whether
/// the latch was set.
pub fn check_em_stop(axis: &mut AxisState, signals: &BoardSignals) -> bool {
    if !signals.take_em_stop(axis.slot) {
        return false;
    }
    axis.set_mode(Mode::Stop);
    axis.ctrl.selected_stage = false;
    axis.log(LogEvent::EmergencyStop);
    true
}

// ─── Tests ──────────────────────────────────────────────────────────
