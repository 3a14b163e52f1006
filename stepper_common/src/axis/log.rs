//! Log-event taxonomy.
//!
//! Every event the control engine reports to the host log stream carries a
//! fixed code and the encoder position at the time of emission.

use serde::Serialize;

/// Bounded set of events an axis reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum LogEvent {
    // ── Controller ──
    ControllerStop = 0x0001,
    ControllerPid = 0x0002,
    ControllerRun = 0x0003,
    ControllerHoming = 0x0004,

    // ── Safety ──
    LimitHit = 0x0010,
    CollisionStop = 0x0011,
    EmergencyStop = 0x0012,

    // ── Commands ──
    MoveAbsolute = 0x0020,
    MoveRelative = 0x0021,
    Stop = 0x0022,
    SetVelocity = 0x0023,
    Home = 0x0024,
    HomeRejected = 0x0025,
    Jog = 0x0026,
    SetEnable = 0x0027,
    GotoStored = 0x0028,
    SetEncoderCounter = 0x0029,
    SetPositionCounter = 0x002A,
    SetSpeedLimit = 0x002B,
    Joystick = 0x002C,
    UnsupportedCommand = 0x00FF,
}

impl LogEvent {
    /// Wire code.
    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Safety events are reported at warning level.
    #[inline]
    pub const fn is_safety(self) -> bool {
        matches!(
            self,
            Self::LimitHit | Self::CollisionStop | Self::EmergencyStop | Self::HomeRejected
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ControllerStop => "controller_stop",
            Self::ControllerPid => "controller_pid",
            Self::ControllerRun => "controller_run",
            Self::ControllerHoming => "controller_homing",
            Self::LimitHit => "limit_hit",
            Self::CollisionStop => "collision_stop",
            Self::EmergencyStop => "emergency_stop",
            Self::MoveAbsolute => "move_absolute",
            Self::MoveRelative => "move_relative",
            Self::Stop => "stop",
            Self::SetVelocity => "set_velocity",
            Self::Home => "home",
            Self::HomeRejected => "home_rejected",
            Self::Jog => "jog",
            Self::SetEnable => "set_enable",
            Self::GotoStored => "goto_stored",
            Self::SetEncoderCounter => "set_encoder_counter",
            Self::SetPositionCounter => "set_position_counter",
            Self::SetSpeedLimit => "set_speed_limit",
            Self::Joystick => "joystick",
            Self::UnsupportedCommand => "unsupported_command",
        }
    }
}

impl std::fmt::Display for LogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub slot: u8,
    pub event: LogEvent,
    /// Encoder position at emission [counts].
    pub enc_pos: i32,
}
