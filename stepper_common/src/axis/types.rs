//! Axis enumerations.
//!
//! Every enum carries the numeric value used by the persisted parameter
//! blocks and the host protocol, with a `const fn from_u8` decoder.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ─── Direction ──────────────────────────────────────────────────────

/// Travel direction as seen by the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum Direction {
    /// Counter-clockwise / decreasing counts.
    Reverse = 0,
    /// Clockwise / increasing counts.
    #[default]
    Forward = 1,
}

impl Direction {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Reverse),
            1 => Some(Self::Forward),
            _ => None,
        }
    }

    #[inline]
    pub const fn from_bool(forward: bool) -> Self {
        if forward { Self::Forward } else { Self::Reverse }
    }

    #[inline]
    pub const fn is_forward(self) -> bool {
        matches!(self, Self::Forward)
    }

    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }

    /// Apply the stepper reversal flag.
    #[inline]
    pub const fn reversed_if(self, reversed: bool) -> Self {
        if reversed { self.opposite() } else { self }
    }
}

impl std::ops::Not for Direction {
    type Output = Self;

    fn not(self) -> Self {
        self.opposite()
    }
}

// ─── Encoder Type ───────────────────────────────────────────────────

/// Position feedback hardware fitted to the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EncoderType {
    /// Open loop; position derived from step counts.
    #[default]
    None = 0,
    /// Incremental quadrature encoder on a linear stage.
    QuadLinear = 1,
    /// Absolute linear encoder with index.
    AbsIndexLinear = 2,
    /// Absolute BiSS linear encoder.
    AbsBissLinear = 3,
    /// Absolute magnetic rotary sensor (light path plate).
    MagneticRotation = 4,
    /// Absolute magnetic rotary sensor with motorized auto-homing (epi turret).
    MagneticRotationAutoHome = 5,
    /// Absolute magnetic rotary sensor, long-way travel (switcher).
    MagneticRotationLw = 6,
    /// Absolute magnetic rotary sensor without a motor.
    MagneticRotationManual = 7,
}

impl EncoderType {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::QuadLinear),
            2 => Some(Self::AbsIndexLinear),
            3 => Some(Self::AbsBissLinear),
            4 => Some(Self::MagneticRotation),
            5 => Some(Self::MagneticRotationAutoHome),
            6 => Some(Self::MagneticRotationLw),
            7 => Some(Self::MagneticRotationManual),
            _ => None,
        }
    }

    /// Motorized magnetic rotary types whose positions wrap at `max_pos`.
    #[inline]
    pub const fn is_rotary_magnetic(self) -> bool {
        matches!(
            self,
            Self::MagneticRotation | Self::MagneticRotationAutoHome | Self::MagneticRotationLw
        )
    }

    /// Types for which the PID folds its error onto the shorter arc.
    #[inline]
    pub const fn folds_pid_error(self) -> bool {
        matches!(self, Self::MagneticRotation | Self::MagneticRotationAutoHome)
    }

    /// Absolute types never need their position persisted on idle.
    #[inline]
    pub const fn is_absolute(self) -> bool {
        matches!(
            self,
            Self::AbsIndexLinear
                | Self::AbsBissLinear
                | Self::MagneticRotation
                | Self::MagneticRotationAutoHome
                | Self::MagneticRotationLw
        )
    }

    /// Incremental types whose soft limits move with the encoder counter.
    #[inline]
    pub const fn is_incremental(self) -> bool {
        matches!(self, Self::None | Self::QuadLinear)
    }

    /// Types on which limit switches are derived from the absolute reading.
    #[inline]
    pub const fn has_absolute_limits(self) -> bool {
        matches!(self, Self::AbsIndexLinear | Self::AbsBissLinear)
    }

    /// Rotary types whose limits are an allowed arc.
    #[inline]
    pub const fn has_arc_limits(self) -> bool {
        matches!(
            self,
            Self::MagneticRotation
                | Self::MagneticRotationAutoHome
                | Self::MagneticRotationLw
                | Self::MagneticRotationManual
        )
    }
}

// ─── Homing Configuration ───────────────────────────────────────────

/// What a limit/index homing run drives towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HomeTarget {
    /// Encoder index pulse.
    Index = 0,
    /// Limit switch edge.
    #[default]
    Limit = 1,
    /// Mechanical hard stop (detected as a limit or collision).
    HardStop = 2,
}

impl HomeTarget {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Index),
            1 => Some(Self::Limit),
            2 => Some(Self::HardStop),
            _ => None,
        }
    }

    /// Targets reached by driving until a limit edge.
    #[inline]
    pub const fn drives_to_limit(self) -> bool {
        matches!(self, Self::Limit | Self::HardStop)
    }
}

/// Configured homing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HomeDirection {
    /// Home towards the clockwise end.
    #[default]
    Cw = 0,
    /// Home towards the counter-clockwise end.
    Ccw = 1,
    /// Index search starting clockwise.
    CwFirst = 2,
    /// Index search starting counter-clockwise.
    CcwFirst = 3,
}

impl HomeDirection {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Cw),
            1 => Some(Self::Ccw),
            2 => Some(Self::CwFirst),
            3 => Some(Self::CcwFirst),
            _ => None,
        }
    }
}

/// Tri-state homed marker plus the distinguishable failure marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HomedStatus {
    #[default]
    NotHomed = 0,
    Homed = 1,
    Homing = 2,
    Failed = 3,
}

impl HomedStatus {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotHomed),
            1 => Some(Self::Homed),
            2 => Some(Self::Homing),
            3 => Some(Self::Failed),
            _ => None,
        }
    }
}

// ─── Speed Channels ─────────────────────────────────────────────────

/// Named per-motion-kind speed ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SpeedChannel {
    #[default]
    Absolute = 0,
    Relative = 1,
    Jog = 2,
    Velocity = 3,
    Homing = 4,
    Joystick = 5,
    SyncMotion = 6,
    /// Hardware maximum. Read-only.
    Unbound = 7,
}

impl SpeedChannel {
    /// Number of channels.
    pub const COUNT: usize = 8;

    /// All channels in index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Absolute,
        Self::Relative,
        Self::Jog,
        Self::Velocity,
        Self::Homing,
        Self::Joystick,
        Self::SyncMotion,
        Self::Unbound,
    ];

    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::COUNT {
            Some(Self::ALL[value as usize])
        } else {
            None
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// Channel selector used by speed-limit commands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SpeedChannelMask: u8 {
        const ABSOLUTE    = 1 << 0;
        const RELATIVE    = 1 << 1;
        const JOG         = 1 << 2;
        const VELOCITY    = 1 << 3;
        const HOMING      = 1 << 4;
        const JOYSTICK    = 1 << 5;
        const SYNC_MOTION = 1 << 6;
        const UNBOUND     = 1 << 7;
    }
}

impl SpeedChannelMask {
    /// Iterate over the selected channels.
    pub fn channels(self) -> impl Iterator<Item = SpeedChannel> {
        SpeedChannel::ALL
            .into_iter()
            .filter(move |c| self.bits() & (1 << c.index()) != 0)
    }
}

// ─── Drive Chip ─────────────────────────────────────────────────────

/// Microstepping drive IC variant fitted to the axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DriveChip {
    /// Voltage-mode driver with integrated power stage.
    #[default]
    L6470 = 0,
    /// Gate-driver variant with external MOSFETs.
    L6480 = 1,
}

impl DriveChip {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::L6470),
            1 => Some(Self::L6480),
            _ => None,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
