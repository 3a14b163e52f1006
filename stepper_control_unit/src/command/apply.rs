//! Command entry points.
//!
//! The motion entry points (moves, velocity, jog, stop, home, stored
//! position recall) only write requested fields. A step/encoder re-sync
//! they need is deferred through `sync_requested` and carried out at the
//! start of the next dispatch. Counter writes act on the hardware directly.

use stepper_common::axis::command::AxisCommand;
use stepper_common::axis::log::LogEvent;
use stepper_common::axis::params::AxisFlags;
use stepper_common::axis::types::{Direction, HomedStatus, SpeedChannel, SpeedChannelMask};
use stepper_common::consts::STORED_POSITION_NONE;
use tracing::{debug, warn};

use crate::encoder::set_encoder_position;
use crate::error::DriveError;
use crate::hal::ports::AxisIo;
use crate::persistence::{PositionStore, force_position_save};
use crate::position::{set_position_counter, sync_steps_to_encoder};
use crate::state::{AxisState, HomingMode, Mode, MoveSubMode};

/// Apply one drained command.
pub fn apply_command(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    store: &mut dyn PositionStore,
    command: AxisCommand,
) -> Result<(), DriveError> {
    debug!(slot = axis.slot, command = command.name(), "apply");
    match command {
        AxisCommand::MoveAbsolute { target } => move_absolute(axis, target),
        AxisCommand::MoveRelative { distance } => move_relative(axis, distance),
        AxisCommand::Stop => stop(axis),
        AxisCommand::Velocity { direction } => velocity(axis, direction),
        AxisCommand::VelocityPercent { direction, percent } => {
            velocity_percent(axis, direction, percent)
        }
        AxisCommand::Jog { direction } => jog(axis, direction),
        AxisCommand::Home => {
            home(axis);
        }
        AxisCommand::GotoStored { index } => goto_stored(axis, index),
        AxisCommand::SetChannelEnable { enabled } => set_channel_enable(axis, enabled),
        AxisCommand::SetEncoderCounter { counts } => set_encoder_counter(axis, io, store, counts)?,
        AxisCommand::SetPositionCounter { steps } => {
            axis.log(LogEvent::SetPositionCounter);
            set_position_counter(axis, io, steps)?;
        }
        AxisCommand::SetSpeedLimit { channels, value } => set_speed_limit(axis, channels, value),
        AxisCommand::Joystick { deflection } => joystick(axis, deflection),
        AxisCommand::Unsupported { message_id } => {
            warn!(slot = axis.slot, message_id, "unsupported command dropped");
            axis.log(LogEvent::UnsupportedCommand);
        }
    }
    Ok(())
}

// ─── Motion entry points ────────────────────────────────────────────

/// Start a closed-loop move to the commanded position.
fn start_goto(axis: &mut AxisState, target: i32, channel: SpeedChannel) {
    axis.counters.cmnd_pos = target;
    axis.ctrl.sync_requested = true;
    axis.ctrl.speed_channel = channel;
    axis.pid.max_velocity = 1;
    if axis.has_flag(AxisFlags::USE_PID) {
        axis.set_mode(Mode::Pid);
    } else {
        axis.ctrl.goto_mode = if axis.mode() != Mode::Idle {
            MoveSubMode::Clear
        } else {
            MoveSubMode::Start
        };
        axis.set_mode(Mode::Goto);
    }
}

pub fn move_absolute(axis: &mut AxisState, target: i32) {
    axis.log(LogEvent::MoveAbsolute);
    start_goto(axis, target, SpeedChannel::Absolute);
}

pub fn move_relative(axis: &mut AxisState, distance: i32) {
    axis.log(LogEvent::MoveRelative);
    let target = axis.enc.pos.saturating_add(distance);
    start_goto(axis, target, SpeedChannel::Relative);
}

pub fn stop(axis: &mut AxisState) {
    axis.log(LogEvent::Stop);
    axis.set_mode(Mode::Stop);
}

/// Continuous run on the VELOCITY channel.
///
/// The stepper reversal is applied here, once; RUN dispatch uses the
/// stored direction as is.
pub fn velocity(axis: &mut AxisState, direction: Direction) {
    axis.log(LogEvent::SetVelocity);
    start_run(
        axis,
        direction.reversed_if(axis.has_flag(AxisFlags::STEPPER_REVERSED)),
        SpeedChannel::Velocity,
    );
}

/// Continuous run at a percentage of UNBOUND; zero stops.
pub fn velocity_percent(axis: &mut AxisState, direction: Direction, percent: u8) {
    if percent == 0 {
        stop(axis);
        return;
    }
    let speed = axis.speeds.unbound() * u32::from(percent.min(100)) / 100;
    axis.speeds.set(SpeedChannel::Velocity, speed);
    velocity(axis, direction);
}

fn start_run(axis: &mut AxisState, drive_dir: Direction, channel: SpeedChannel) {
    axis.ctrl.cmd_dir = drive_dir;
    axis.ctrl.speed_channel = channel;
    axis.set_mode(Mode::Run);
}

/// One jog step of `jog.step_size` counts.
pub fn jog(axis: &mut AxisState, direction: Direction) {
    axis.log(LogEvent::Jog);
    axis.ctrl.speed_channel = SpeedChannel::Jog;
    axis.ctrl.cmd_dir = direction;
    let step = axis.params.jog.step_size;
    axis.counters.cmnd_pos = if direction.is_forward() {
        axis.enc.pos.saturating_add(step)
    } else {
        axis.enc.pos.saturating_sub(step)
    };
    axis.pid.max_velocity = 1;
    if axis.has_flag(AxisFlags::USE_PID) {
        axis.set_mode(Mode::Pid);
    } else {
        axis.ctrl.jog_mode = if axis.mode() != Mode::Idle {
            MoveSubMode::Clear
        } else {
            MoveSubMode::Start
        };
        axis.set_mode(Mode::Jog);
    }
}

/// Request homing. Rejected while either soft limit is configured.
///
/// Returns whether homing was started.
pub fn home(axis: &mut AxisState) -> bool {
    if axis.params.limits.has_soft_limits() {
        warn!(slot = axis.slot, "home rejected: soft limits configured");
        axis.log(LogEvent::HomeRejected);
        return false;
    }
    axis.log(LogEvent::Home);
    axis.ctrl.speed_channel = SpeedChannel::Homing;
    axis.set_mode(Mode::Homing);
    axis.ctrl.homing_mode = HomingMode::Start;
    axis.enc.homed = HomedStatus::Homing;
    axis.limits.homed = HomedStatus::Homing;
    true
}

/// Recall a stored position.
///
/// A blank or missing slot changes nothing but the current-stored marker.
pub fn goto_stored(axis: &mut AxisState, index: u8) {
    axis.ctrl.sync_requested = true;
    let slot = index as usize;
    if axis.store.is_blank(slot) {
        axis.current_stored = STORED_POSITION_NONE;
        return;
    }
    axis.log(LogEvent::GotoStored);
    start_goto(axis, axis.store.stored_pos[slot], SpeedChannel::Absolute);
}

/// Velocity run on the JOYSTICK channel, speed proportional to deflection.
///
/// The deflection sign is the drive direction; no reversal is applied.
pub fn joystick(axis: &mut AxisState, deflection: f32) {
    let deflection = if deflection.is_finite() {
        deflection.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let speed = (deflection.abs() * axis.speeds.unbound() as f32) as u32;
    axis.speeds.set(SpeedChannel::Joystick, speed);
    axis.ctrl.speed_channel = SpeedChannel::Joystick;

    if speed == 0 {
        if axis.mode() != Mode::Idle {
            axis.set_mode(Mode::Stop);
        }
        return;
    }
    axis.log(LogEvent::Joystick);
    start_run(axis, Direction::from_bool(deflection > 0.0), SpeedChannel::Joystick);
}

// ─── Channel configuration ──────────────────────────────────────────

pub fn set_channel_enable(axis: &mut AxisState, enabled: bool) {
    axis.log(LogEvent::SetEnable);
    axis.enabled = enabled;
    axis.collision = false;
    axis.ctrl.sync_requested = true;
}

/// Clamp to `[1, UNBOUND]` and set every selected channel.
pub fn set_speed_limit(axis: &mut AxisState, channels: SpeedChannelMask, value: u32) {
    axis.log(LogEvent::SetSpeedLimit);
    let value = value.clamp(1, axis.speeds.unbound().max(1));
    for channel in channels.channels() {
        axis.speeds.set(channel, value);
    }
}

/// Re-base the encoder counter.
///
/// Soft limits of incremental stages move with the counter. The homed
/// marker is cleared and the new position is persisted immediately.
pub fn set_encoder_counter(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    store: &mut dyn PositionStore,
    counts: i32,
) -> Result<(), DriveError> {
    axis.log(LogEvent::SetEncoderCounter);
    if axis.has_flag(AxisFlags::HAS_ENCODER) {
        if axis.enc.kind.is_incremental() {
            let offset = counts.wrapping_sub(axis.enc.raw);
            axis.params.limits.shift_soft_limits(offset);
        }
        set_encoder_position(axis, io, counts)?;
        sync_steps_to_encoder(axis, io)?;
        if axis.has_flag(AxisFlags::USE_PID) {
            axis.counters.cmnd_pos = axis.enc.pos;
        }
    } else {
        axis.enc.pos = counts;
        sync_steps_to_encoder(axis, io)?;
    }
    axis.limits.homed = HomedStatus::NotHomed;
    force_position_save(axis, io, store)
}

// ─── Tests ──────────────────────────────────────────────────────────
