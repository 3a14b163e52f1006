//! Movement mode and homing sub-state machines.

use serde::Serialize;

// ─── Movement Mode ──────────────────────────────────────────────────

/// Top-level movement mode of an axis.
///
/// Ordering matters: everything above [`Mode::Idle`] is an active mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Mode {
    /// Halt the drive, then settle to IDLE (or PID).
    #[default]
    Stop = 0,
    Idle = 1,
    Goto = 2,
    Run = 3,
    Jog = 4,
    Pid = 5,
    Homing = 6,
    /// Reserved; never entered.
    SoftStopStart = 7,
    /// Reserved; never entered.
    SoftStopWait = 8,
}

impl Mode {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Stop),
            1 => Some(Self::Idle),
            2 => Some(Self::Goto),
            3 => Some(Self::Run),
            4 => Some(Self::Jog),
            5 => Some(Self::Pid),
            6 => Some(Self::Homing),
            7 => Some(Self::SoftStopStart),
            8 => Some(Self::SoftStopWait),
            _ => None,
        }
    }

    /// Any mode past IDLE.
    #[inline]
    pub const fn is_active(self) -> bool {
        self as u8 > Self::Idle as u8
    }
}

/// Sub-mode of the non-PID goto and jog paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveSubMode {
    #[default]
    Idle,
    Start,
    /// Motion in progress must be cleared before restarting.
    Clear,
}

// ─── Homing ─────────────────────────────────────────────────────────

/// Phases of limit / index homing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitPhase {
    /// Driving towards the home limit.
    WaitLimit,
    /// Driving off the opposing limit before waiting for the home edge.
    ExitLimit,
    /// Started while resting on the opposing limit.
    DelayedStart,
    CwDirFirst,
    CcwDir,
    ReturnCw,
    CcwDirFirst,
    CwDir,
    ReturnCcw,
    IndexNotFound,
    Clear,
}

/// Phases of magnetic two-point calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPhase {
    MoveLow,
    WaitLow,
    MoveHigh,
    WaitHigh,
    Complete,
    Failed,
}

/// Phases of epi-turret calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurretPhase {
    /// Short move away to prove the stage turns freely.
    CheckNoCollision,
    Begin,
    SpinFast,
    WaitFirstEdge,
    SettleDelay,
    CheckPassedSlot,
    GetInSlot,
    BackToEdge,
    EdgeDelay,
    GotoNext,
    SaveDelay,
    SavePosition,
    Complete,
    Failed,
}

/// Homing sub-mode. Meaningful only while the mode is [`Mode::Homing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "strategy", content = "phase")]
pub enum HomingMode {
    #[default]
    Idle,
    /// Requested; the strategy picks its first phase.
    Start,
    Limit(LimitPhase),
    Rotation(RotationPhase),
    Turret(TurretPhase),
}

impl HomingMode {
    #[inline]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
