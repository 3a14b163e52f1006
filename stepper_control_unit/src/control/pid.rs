//! Position PID producing a run direction and speed.
//!
//! Works in encoder counts. The derivative acts on the measured input, so
//! setpoint steps do not kick the output. Output is scaled down by 10 and
//! quantized to the drive's MAX_SPEED unit.

use stepper_common::axis::params::{AxisFlags, PidParams};
use stepper_common::axis::types::Direction;
use stepper_common::consts::{
    MAX_SPEED_LSB_STEPS_PER_SEC, SPEED_LSB_STEPS_PER_SEC, SPEED_QUANTIZED_MAX, SPEED_REGISTER_SCALE,
};

use crate::control::movement::{configure_movement, run_ctl};
use crate::error::DriveError;
use crate::hal::drive::StepperDrive;
use crate::hal::ports::AxisIo;
use crate::state::{AxisState, Mode};

/// Internal state of the position controller.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidState {
    /// Integral accumulator.
    pub iterm: f32,
    /// Previous input, for the derivative.
    pub last_input: f32,
    /// Error of the last cycle [counts].
    pub error: i32,
    /// Velocity cap as a multiple of UNBOUND.
    pub max_velocity: u32,
    /// Consecutive cycles inside the deadband.
    pub kickout_count: u8,
}

impl PidState {
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Gains as used by the controller.
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Integral clamp (symmetric).
    pub imax: f32,
}

impl From<&PidParams> for PidGains {
    fn from(p: &PidParams) -> Self {
        Self {
            kp: p.kp as f32,
            ki: p.ki as f32,
            kd: p.kd as f32,
            imax: p.imax as f32,
        }
    }
}

/// Per-cycle bounds on the controller output.
#[derive(Debug, Clone, Copy)]
pub struct PidBounds {
    /// Settle window [counts].
    pub deadband: u16,
    /// Settled cycles before kickout.
    pub kickout_time: u8,
    /// UNBOUND speed channel (MAX_SPEED units).
    pub unbound: u32,
    /// Microstep exponent.
    pub step_mode: u8,
    /// Rotary wrap point when the error folds onto the short arc.
    pub wrap: Option<i32>,
}

/// One cycle of controller output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidOutput {
    pub direction: Direction,
    /// Quantized speed (MAX_SPEED units).
    pub speed: u32,
    /// Deadband held for `kickout_time` cycles.
    pub kickout: bool,
}

/// Position error, folded onto the shorter arc across `wrap`.
#[inline]
pub fn position_error(commanded: i32, input: i32, wrap: Option<i32>) -> f32 {
    let cmd = commanded as f32;
    let input_f = input as f32;
    let error = cmd - input_f;
    match wrap {
        Some(max) if error.abs() > max as f32 / 2.0 => {
            let max = max as f32;
            if cmd < input_f {
                cmd + (max - input_f)
            } else {
                -(input_f + (max - cmd))
            }
        }
        _ => error,
    }
}

/// Compute one controller cycle.
pub fn pid_compute(
    state: &mut PidState,
    gains: &PidGains,
    bounds: &PidBounds,
    commanded: i32,
    input: i32,
) -> PidOutput {
    let error = position_error(commanded, input, bounds.wrap);
    state.error = error as i32;

    // ── I term, clamped ──
    state.iterm = (state.iterm + gains.ki * error).clamp(-gains.imax, gains.imax);

    // ── D term on input ──
    let input_f = input as f32;
    let d_input = input_f - state.last_input;
    state.last_input = input_f;

    let mut out = (gains.kp * error + state.iterm - gains.kd * d_input) / 10.0;

    // ── Deadband kickout ──
    let mut kickout = false;
    if error.abs() <= bounds.deadband as f32 {
        state.kickout_count = state.kickout_count.saturating_add(1);
        if state.kickout_count >= bounds.kickout_time {
            kickout = true;
            out = 0.0;
        }
    } else {
        state.kickout_count = 0;
    }

    let direction = Direction::from_bool(out >= 0.0);
    let mut out = out.abs();

    // ── Velocity cap ──
    let microsteps = (1u32 << bounds.step_mode.min(7)) as f32;
    let max_v = state.max_velocity.saturating_mul(bounds.unbound) as f32;
    let max_steps_per_sec = microsteps * MAX_SPEED_LSB_STEPS_PER_SEC * max_v;
    if out * microsteps * SPEED_LSB_STEPS_PER_SEC > max_steps_per_sec {
        out = max_steps_per_sec / (SPEED_LSB_STEPS_PER_SEC * microsteps);
    }

    let speed = (out / SPEED_REGISTER_SCALE as f32)
        .ceil()
        .clamp(0.0, SPEED_QUANTIZED_MAX as f32) as u32;

    PidOutput {
        direction,
        speed,
        kickout,
    }
}

/// Run the controller for an axis and issue its speed command.
///
/// On kickout the drive is hard-stopped and, outside homing, the axis
/// drops to STOP. The run-limit check still gates the final RUN.
pub fn pid_ctrl(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    let gains = PidGains::from(&axis.params.pid);
    let bounds = PidBounds {
        deadband: axis.params.drive.deadband,
        kickout_time: axis.params.drive.kickout_time,
        unbound: axis.speeds.unbound(),
        step_mode: axis.params.drive.step_mode,
        wrap: axis
            .enc
            .kind
            .folds_pid_error()
            .then_some(axis.max_pos()),
    };
    let out = pid_compute(
        &mut axis.pid,
        &gains,
        &bounds,
        axis.counters.cmnd_pos,
        axis.enc.pos,
    );

    if out.kickout {
        io.drive().hard_stop()?;
        if axis.mode() != Mode::Homing {
            axis.set_mode(Mode::Stop);
        }
    }

    configure_movement(axis, out.direction, out.speed, true);
    run_ctl(axis, io)?;
    Ok(())
}

/// Whether an axis keeps its PID loop engaged after settling.
#[inline]
pub fn holds_position(flags: AxisFlags) -> bool {
    flags.contains(AxisFlags::USE_PID) && !flags.contains(AxisFlags::PID_KICKOUT)
}

// ─── Tests ──────────────────────────────────────────────────────────
