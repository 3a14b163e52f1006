//! Status word, event stream and end-of-run reports.

use serde::Serialize;
use stepper_common::axis::log::LogRecord;
use stepper_common::axis::params::AxisFlags;
use stepper_common::axis::status::{ConfigFault, EncoderHealth, StatusBits};
use stepper_common::axis::types::{Direction, HomedStatus};
use stepper_common::consts::STORED_POSITION_NONE;
use tracing::{debug, warn};

use crate::state::{AxisState, HomingMode, Mode};

/// Recompute the status word from the axis state.
///
/// Move bits follow the stage direction, so they swap on reversed
/// steppers. Bits 15 and 16 carry the shuttle group marker unless the
/// stage reports magnetic sensor health there.
pub fn refresh_status(axis: &mut AxisState, connected: bool) -> StatusBits {
    let mut bits = StatusBits::empty();
    let l = &axis.limits;
    bits.set(StatusBits::CW_LIMIT, l.cw);
    bits.set(StatusBits::CCW_LIMIT, l.ccw);
    bits.set(StatusBits::CW_SOFT_LIMIT, l.soft_cw);
    bits.set(StatusBits::CCW_SOFT_LIMIT, l.soft_ccw);
    bits.set(StatusBits::INTERLOCK, l.interlock);
    bits.set(StatusBits::HOMED, l.homed == HomedStatus::Homed);

    if axis.ctrl.cur_vel > 0 {
        let stage_dir = axis
            .ctrl
            .cur_dir
            .reversed_if(axis.has_flag(AxisFlags::STEPPER_REVERSED));
        let jogging = axis.mode() == Mode::Jog;
        match stage_dir {
            Direction::Forward => {
                bits |= StatusBits::CW_MOVE;
                bits.set(StatusBits::CW_JOG, jogging);
            }
            Direction::Reverse => {
                bits |= StatusBits::CCW_MOVE;
                bits.set(StatusBits::CCW_JOG, jogging);
            }
        }
    }

    bits.set(StatusBits::MOTOR_CONNECTED, connected);
    bits.set(StatusBits::HOMING, axis.mode() == Mode::Homing);
    bits.set(StatusBits::CHANNEL_ENABLED, axis.enabled);

    let health = axis.enc.health;
    bits.set(StatusBits::ENC_WARNING, health.contains(EncoderHealth::WARNING));
    bits.set(StatusBits::ENC_ERROR, health.contains(EncoderHealth::ERROR));
    if axis.enc.kind.is_rotary_magnetic() {
        bits.set(StatusBits::ENC_MAG_HIGH, health.contains(EncoderHealth::MAG_HIGH));
        bits.set(StatusBits::ENC_MAG_LOW, health.contains(EncoderHealth::MAG_LOW));
        bits.set(StatusBits::ENC_NOT_READY, !health.contains(EncoderHealth::READY));
    } else if axis.ctrl.selected_stage {
        bits |= StatusBits::SHUTTLE_ACTIVE;
    }

    axis.status = bits;
    bits
}

/// Forward the cycle's log events to `tracing`.
///
/// Returns the number of records forwarded.
pub fn flush_events(axis: &mut AxisState) -> usize {
    let mut n = 0;
    for LogRecord { slot, event, enc_pos } in axis.events.drain() {
        if event.is_safety() {
            warn!(slot, enc_pos, code = event.code(), "{event}");
        } else {
            debug!(slot, enc_pos, code = event.code(), "{event}");
        }
        n += 1;
    }
    n
}

// ─── Reports ────────────────────────────────────────────────────────

/// Per-axis snapshot printed by the binary at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct AxisReport {
    pub slot: u8,
    pub connected: bool,
    pub enabled: bool,
    pub mode: Mode,
    pub homing_mode: HomingMode,
    pub homed: HomedStatus,
    pub enc_pos: i32,
    pub cmnd_pos: i32,
    /// Status word as reported to the host.
    pub status: u32,
    /// Configuration fault word; zero when the axis configured cleanly.
    pub config_fault: u8,
    pub current_stored: Option<u8>,
    pub collision: bool,
    pub events_dropped: u32,
}

impl AxisReport {
    pub fn capture(axis: &AxisState, connected: bool, fault: ConfigFault) -> Self {
        Self {
            slot: axis.slot,
            connected,
            enabled: axis.enabled,
            mode: axis.mode(),
            homing_mode: axis.ctrl.homing_mode,
            homed: axis.enc.homed,
            enc_pos: axis.enc.pos,
            cmnd_pos: axis.counters.cmnd_pos,
            status: axis.status.bits(),
            config_fault: fault.bits(),
            current_stored: (axis.current_stored != STORED_POSITION_NONE)
                .then_some(axis.current_stored),
            collision: axis.collision,
            events_dropped: axis.events.dropped(),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
