//! Per-axis state aggregate.
//!
//! One [`AxisState`] per physical channel, owned by that axis' cycle and
//! passed by exclusive reference into every service routine. Command
//! mutations are applied to it only at the start of a cycle.

pub mod events;
pub mod mode;

use stepper_common::axis::log::LogEvent;
use stepper_common::axis::params::{AxisFlags, AxisParameters, StoredState};
use stepper_common::axis::status::{EncoderHealth, StatusBits};
use stepper_common::axis::types::{Direction, DriveChip, EncoderType, HomedStatus, SpeedChannel};
use stepper_common::consts::STORED_POSITION_NONE;

use crate::control::pid::PidState;
use crate::speed::SpeedChannelRegistry;

pub use events::EventLog;
pub use mode::{HomingMode, LimitPhase, Mode, MoveSubMode, RotationPhase, TurretPhase};

/// Position counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    /// Commanded position [counts].
    pub cmnd_pos: i32,
    /// Drive ABS_POS as framed on the wire (22 bits, sign mirrored in bit 22).
    pub position: u32,
    /// Unwrapped drive position [microsteps].
    pub position_32: i32,
    /// Last signed 22-bit reading, for delta tracking.
    pub last_raw: i32,
    /// Drive electrical position.
    pub el_pos: u16,
}

/// Limit flags and homed marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LimitState {
    pub cw: bool,
    pub ccw: bool,
    pub soft_cw: bool,
    pub soft_ccw: bool,
    /// Latched stop request, honoured by the next run-limit check.
    pub hard_stop: bool,
    pub index: bool,
    pub interlock: bool,
    pub homed: HomedStatus,
    /// Consecutive cycles with a pending limit interrupt.
    pub debounce: u8,
    /// Run-limit check fired during the last cycle.
    pub limit_hit: bool,
}

/// Mode, direction and velocity bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    pub mode: Mode,
    /// Direction for the next RUN, already reversal-adjusted.
    pub cmd_dir: Direction,
    pub cur_dir: Direction,
    /// Speed for the next RUN (SPEED register units).
    pub cmd_vel: u32,
    pub cur_vel: u32,
    pub goto_mode: MoveSubMode,
    pub jog_mode: MoveSubMode,
    pub homing_mode: HomingMode,
    /// Reusable homing phase timer [cycles].
    pub homing_counter: u32,
    /// Reusable homing phase ordinal.
    pub homing_control: u8,
    pub speed_channel: SpeedChannel,
    /// Member of the active shuttle group.
    pub selected_stage: bool,
    /// Flag byte parked while calibration moves run open loop.
    pub prev_flags: u8,
    /// Re-sync the step count to the encoder before the next dispatch.
    pub sync_requested: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            mode: Mode::Stop,
            cmd_dir: Direction::Reverse,
            cur_dir: Direction::Reverse,
            cmd_vel: 0,
            cur_vel: 0,
            goto_mode: MoveSubMode::Idle,
            jog_mode: MoveSubMode::Idle,
            homing_mode: HomingMode::Idle,
            homing_counter: 0,
            homing_control: 0,
            speed_channel: SpeedChannel::Unbound,
            selected_stage: false,
            prev_flags: 0,
            sync_requested: false,
        }
    }
}

/// Latest encoder reading and sensor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncoderSnapshot {
    pub kind: EncoderType,
    /// Position [counts].
    pub pos: i32,
    /// Reading before the zero offset.
    pub raw: i32,
    pub zero: i32,
    pub health: EncoderHealth,
    pub homed: HomedStatus,
    /// Cycles since the sensor asked for a re-home.
    pub home_delay: u32,
    /// Consecutive absolute-encoder read errors.
    pub error_count: u8,
}

/// Idle-after-motion save tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdleSave {
    /// Cycles since the last move bit.
    pub elapsed: u32,
    /// Position already flushed for this idle period.
    pub saved: bool,
}

/// Complete state of one axis.
#[derive(Debug, Clone)]
pub struct AxisState {
    pub slot: u8,
    pub chip: DriveChip,
    pub enabled: bool,
    /// Enable flag remembered across a disconnection.
    pub last_enabled: bool,
    pub params: AxisParameters,
    pub store: StoredState,
    pub speeds: SpeedChannelRegistry,
    pub counters: Counters,
    pub limits: LimitState,
    pub ctrl: ControlState,
    pub pid: PidState,
    pub enc: EncoderSnapshot,
    pub collision: bool,
    /// Stored-position slot the axis rests at, or [`STORED_POSITION_NONE`].
    pub current_stored: u8,
    pub idle_save: IdleSave,
    pub events: EventLog,
    pub status: StatusBits,
}

impl AxisState {
    pub fn new(slot: u8, chip: DriveChip, params: AxisParameters, store: StoredState) -> Self {
        Self {
            slot,
            chip,
            enabled: false,
            last_enabled: false,
            speeds: SpeedChannelRegistry::from_params(&params),
            enc: EncoderSnapshot {
                kind: params.encoder.kind,
                ..Default::default()
            },
            params,
            store,
            counters: Counters::default(),
            limits: LimitState::default(),
            ctrl: ControlState::default(),
            pid: PidState::default(),
            collision: false,
            current_stored: STORED_POSITION_NONE,
            idle_save: IdleSave::default(),
            events: EventLog::default(),
            status: StatusBits::empty(),
        }
    }

    /// Reset transient fields on (re)connection.
    pub fn reset_transient(&mut self) {
        self.enabled = false;
        self.counters = Counters::default();
        self.limits = LimitState::default();
        self.enc.homed = HomedStatus::NotHomed;
        self.ctrl = ControlState::default();
        self.speeds.clear_motion();
        self.collision = false;
        self.pid.reset();
        self.events.reset();
    }

    #[inline]
    pub fn flags(&self) -> AxisFlags {
        self.params.flags()
    }

    #[inline]
    pub fn has_flag(&self, flag: AxisFlags) -> bool {
        self.params.flags().contains(flag)
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.ctrl.mode
    }

    #[inline]
    pub fn set_mode(&mut self, mode: Mode) {
        self.ctrl.mode = mode;
    }

    #[inline]
    pub fn counts_per_unit(&self) -> f32 {
        self.params.stage.counts_per_unit
    }

    /// Travel range / rotary wrap [counts].
    #[inline]
    pub fn max_pos(&self) -> i32 {
        self.params.stage.max_pos as i32
    }

    /// Record a log event stamped with the encoder position.
    #[inline]
    pub fn log(&mut self, event: LogEvent) {
        self.events.emit(self.slot, event, self.enc.pos);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
