//! Drive step-count bookkeeping.
//!
//! The drive's ABS_POS register is 22 bits wide. The engine keeps a 32-bit
//! unwrapped copy by accumulating deltas between reads, and re-derives both
//! from the encoder position on every sync. The two are only consistent
//! right after a sync.

use stepper_common::axis::params::AxisFlags;
use stepper_common::consts::{
    RAW_POSITION_BITS, RAW_POSITION_HALF_SPAN, RAW_POSITION_MASK, RAW_POSITION_SIGN,
};

use crate::error::DriveError;
use crate::hal::drive::StepperDrive;
use crate::hal::ports::AxisIo;
use crate::hal::registers::Register;
use crate::state::AxisState;

const RAW_SPAN: i32 = 1 << RAW_POSITION_BITS;

/// Sign-extend a 22-bit ABS_POS value.
#[inline]
pub const fn sign_extend_raw(raw: u32) -> i32 {
    ((raw << (32 - RAW_POSITION_BITS)) as i32) >> (32 - RAW_POSITION_BITS)
}

/// Frame signed steps as ABS_POS, sign mirrored into bit 22.
#[inline]
pub const fn frame_raw(steps: i32) -> u32 {
    let sign = if steps < 0 { RAW_POSITION_SIGN } else { 0 };
    steps as u32 & (RAW_POSITION_MASK | sign)
}

/// Shortest signed distance between two 22-bit readings.
#[inline]
pub const fn unwrap_delta(previous: i32, current: i32) -> i32 {
    let delta = current.wrapping_sub(previous);
    if delta > RAW_POSITION_HALF_SPAN {
        delta - RAW_SPAN
    } else if delta < -RAW_POSITION_HALF_SPAN {
        delta + RAW_SPAN
    } else {
        delta
    }
}

/// Read ABS_POS and advance the unwrapped step count.
pub fn get_position(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let raw = io.drive().get_param(Register::AbsPos)?;
    let mut steps = sign_extend_raw(raw);
    if axis.has_flag(AxisFlags::STEPPER_REVERSED) {
        steps = -steps;
    }
    let delta = unwrap_delta(axis.counters.last_raw, steps);
    axis.counters.last_raw = steps;
    axis.counters.position = frame_raw(steps);
    axis.counters.position_32 = axis.counters.position_32.wrapping_add(delta);
    Ok(())
}

/// Write the framed position to ABS_POS.
///
/// The drive only accepts ABS_POS while stopped, so it is hard-stopped
/// first.
pub fn set_position(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    io.drive().hard_stop()?;
    let steps = sign_extend_raw(axis.counters.position & RAW_POSITION_MASK);
    let wire = if axis.has_flag(AxisFlags::STEPPER_REVERSED) {
        -steps
    } else {
        steps
    };
    io.drive()
        .set_param(Register::AbsPos, wire as u32 & RAW_POSITION_MASK)?;
    axis.counters.last_raw = steps;
    Ok(())
}

/// Overwrite the drive step counter with a raw value.
pub fn set_position_counter(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    steps: i32,
) -> Result<(), DriveError> {
    axis.counters.position = frame_raw(steps);
    axis.counters.position_32 = sign_extend_raw(axis.counters.position & RAW_POSITION_MASK);
    set_position(axis, io)
}

/// Re-derive the step counts from the encoder position and write them.
pub fn sync_steps_to_encoder(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let steps = (axis.enc.pos as f64 * axis.counts_per_unit() as f64) as i32;
    axis.counters.position_32 = steps;
    axis.counters.position = frame_raw(steps);
    set_position(axis, io)
}

/// Encoder-unit position implied by the step count.
#[inline]
pub fn steps_in_counts(axis: &AxisState) -> i32 {
    (axis.counters.position_32 as f64 / axis.counts_per_unit() as f64) as i32
}

// ─── Tests ──────────────────────────────────────────────────────────
