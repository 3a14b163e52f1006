//! Encoder read-back and counter re-basing.
//!
//! The counter itself lives on the slot; this module only knows how each
//! encoder type frames its reading and where the zero offset applies.

use stepper_common::axis::params::AxisFlags;
use stepper_common::axis::status::EncoderHealth;
use stepper_common::axis::types::EncoderType;
use stepper_common::consts::RAW_POSITION_MASK;
use tracing::warn;

use crate::error::DriveError;
use crate::hal::ports::AxisIo;
use crate::position::{get_position, sign_extend_raw, steps_in_counts, sync_steps_to_encoder};
use crate::safety::BoardSignals;
use crate::state::AxisState;

/// Consecutive BiSS read errors tolerated before the channel is disabled.
pub const BISS_ERROR_LIMIT: u8 = 10;

/// Read the encoder port into the snapshot.
///
/// Quadrature counters read directly; absolute-index counters are 22-bit
/// two's complement; BiSS readings are offset by the zero; magnetic
/// sensors report their absolute angle.
pub fn read_encoder(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let counts = io.encoder_counts()?;
    let enc = &mut axis.enc;
    match enc.kind {
        EncoderType::None => return Ok(()),
        EncoderType::QuadLinear => {
            enc.raw = counts;
            enc.pos = counts;
        }
        EncoderType::AbsIndexLinear => {
            enc.raw = sign_extend_raw(counts as u32 & RAW_POSITION_MASK);
            enc.pos = enc.raw;
        }
        EncoderType::AbsBissLinear => {
            enc.raw = counts;
            enc.pos = counts.wrapping_sub(enc.zero);
        }
        EncoderType::MagneticRotation
        | EncoderType::MagneticRotationAutoHome
        | EncoderType::MagneticRotationLw
        | EncoderType::MagneticRotationManual => {
            enc.raw = counts;
            enc.pos = counts;
        }
    }
    if axis.has_flag(AxisFlags::ENCODER_REVERSED) {
        axis.enc.pos = axis.enc.pos.wrapping_neg();
    }
    if axis.enc.kind.is_absolute() || axis.enc.kind == EncoderType::MagneticRotationManual {
        axis.enc.health = io.encoder_health()?;
    }
    Ok(())
}

/// Re-base the encoder so that it reads `counts`.
pub fn set_encoder_position(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    counts: i32,
) -> Result<(), DriveError> {
    let wire = if axis.has_flag(AxisFlags::ENCODER_REVERSED) {
        counts.wrapping_neg()
    } else {
        counts
    };
    let enc = &mut axis.enc;
    match enc.kind {
        EncoderType::None => {}
        EncoderType::QuadLinear => {
            io.load_encoder_counts(wire)?;
            enc.raw = wire;
            enc.pos = counts;
        }
        EncoderType::AbsIndexLinear => {
            io.load_encoder_counts((wire as u32 & RAW_POSITION_MASK) as i32)?;
            enc.raw = wire;
            enc.pos = counts;
        }
        EncoderType::AbsBissLinear => {
            enc.zero = enc.raw.wrapping_sub(wire);
            enc.pos = counts;
        }
        EncoderType::MagneticRotation
        | EncoderType::MagneticRotationAutoHome
        | EncoderType::MagneticRotationLw
        | EncoderType::MagneticRotationManual => {
            enc.zero = 0;
        }
    }
    Ok(())
}

/// Per-cycle encoder service.
///
/// Refreshes the step count and the encoder reading. Open-loop axes take
/// their position from the step count. Rotary stages re-sync the step
/// count once it leaves one revolution. Persistent BiSS errors disable the
/// channel and raise the slot's board error bit.
pub fn service_encoder(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    signals: &BoardSignals,
) -> Result<(), DriveError> {
    get_position(axis, io)?;

    if axis.has_flag(AxisFlags::HAS_ENCODER) && axis.enc.kind != EncoderType::None {
        read_encoder(axis, io)?;
    } else {
        axis.enc.pos = steps_in_counts(axis);
        axis.enc.raw = axis.enc.pos;
        axis.enc.health = EncoderHealth::READY;
    }

    if axis.enc.kind.has_arc_limits() && !(0..axis.max_pos()).contains(&steps_in_counts(axis)) {
        sync_steps_to_encoder(axis, io)?;
    }

    if axis.enc.kind == EncoderType::AbsBissLinear {
        if axis.enc.health.contains(EncoderHealth::ERROR) {
            axis.enc.error_count = axis.enc.error_count.saturating_add(1);
        } else {
            axis.enc.error_count = 0;
        }
        if axis.enc.error_count > BISS_ERROR_LIMIT && axis.enabled {
            warn!(slot = axis.slot, "absolute encoder failing, disabling channel");
            axis.enabled = false;
            signals.set_board_error(axis.slot);
        }
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
