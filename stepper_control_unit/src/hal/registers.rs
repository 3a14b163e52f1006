//! Drive IC register model.
//!
//! The two supported drive variants share most of their register file but
//! differ in where CONFIG lives and in the gate-driver configuration
//! registers only the L6480 implements. A [`RegisterMap`] strategy is
//! chosen once per axis from its [`DriveChip`].

use static_assertions::const_assert_eq;
use stepper_common::axis::types::DriveChip;
use stepper_common::consts::RAW_POSITION_BITS;

/// Drive parameter registers addressed by the control engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    AbsPos,
    ElPos,
    Speed,
    Acc,
    Dec,
    MaxSpeed,
    MinSpeed,
    FsSpd,
    KvalHold,
    KvalRun,
    KvalAcc,
    KvalDec,
    IntSpd,
    StSlp,
    FnSlpAcc,
    FnSlpDec,
    OcdTh,
    StallTh,
    StepMode,
    Config,
    GateCfg1,
    GateCfg2,
}

impl Register {
    pub const ALL: [Self; 22] = [
        Self::AbsPos,
        Self::ElPos,
        Self::Speed,
        Self::Acc,
        Self::Dec,
        Self::MaxSpeed,
        Self::MinSpeed,
        Self::FsSpd,
        Self::KvalHold,
        Self::KvalRun,
        Self::KvalAcc,
        Self::KvalDec,
        Self::IntSpd,
        Self::StSlp,
        Self::FnSlpAcc,
        Self::FnSlpDec,
        Self::OcdTh,
        Self::StallTh,
        Self::StepMode,
        Self::Config,
        Self::GateCfg1,
        Self::GateCfg2,
    ];

    /// Register width [bits]. Identical on both variants.
    pub const fn width_bits(self) -> u8 {
        match self {
            Self::AbsPos => 22,
            Self::ElPos => 9,
            Self::Speed => 20,
            Self::Acc | Self::Dec => 12,
            Self::MaxSpeed | Self::FsSpd => 10,
            Self::MinSpeed => 13,
            Self::IntSpd => 14,
            Self::KvalHold
            | Self::KvalRun
            | Self::KvalAcc
            | Self::KvalDec
            | Self::StSlp
            | Self::FnSlpAcc
            | Self::FnSlpDec
            | Self::StepMode
            | Self::GateCfg2 => 8,
            Self::OcdTh => 5,
            Self::StallTh => 7,
            Self::Config => 16,
            Self::GateCfg1 => 11,
        }
    }

    /// Bytes on the wire after the command byte.
    #[inline]
    pub const fn frame_bytes(self) -> usize {
        (self.width_bits() as usize).div_ceil(8)
    }

    /// Largest value the register holds.
    #[inline]
    pub const fn max_value(self) -> u32 {
        ((1u64 << self.width_bits()) - 1) as u32
    }
}

const_assert_eq!(Register::AbsPos.width_bits() as u32, RAW_POSITION_BITS);
const_assert_eq!(Register::AbsPos.frame_bytes(), 3);
const_assert_eq!(Register::Speed.frame_bytes(), 3);

/// Address strategy for one drive variant.
pub trait RegisterMap: Send + Sync {
    /// Drive variant this map describes.
    fn chip(&self) -> DriveChip;

    /// Register address, or `None` when the variant lacks the register.
    fn address(&self, register: Register) -> Option<u8>;

    /// Register living at `address`, if any.
    fn register_at(&self, address: u8) -> Option<Register> {
        Register::ALL
            .into_iter()
            .find(|&r| self.address(r) == Some(address))
    }
}

/// Address of a register common to both variants.
const fn common_address(register: Register) -> Option<u8> {
    match register {
        Register::AbsPos => Some(0x01),
        Register::ElPos => Some(0x02),
        Register::Speed => Some(0x04),
        Register::Acc => Some(0x05),
        Register::Dec => Some(0x06),
        Register::MaxSpeed => Some(0x07),
        Register::MinSpeed => Some(0x08),
        Register::KvalHold => Some(0x09),
        Register::KvalRun => Some(0x0A),
        Register::KvalAcc => Some(0x0B),
        Register::KvalDec => Some(0x0C),
        Register::IntSpd => Some(0x0D),
        Register::StSlp => Some(0x0E),
        Register::FnSlpAcc => Some(0x0F),
        Register::FnSlpDec => Some(0x10),
        Register::OcdTh => Some(0x13),
        Register::StallTh => Some(0x14),
        Register::FsSpd => Some(0x15),
        Register::StepMode => Some(0x16),
        Register::Config | Register::GateCfg1 | Register::GateCfg2 => None,
    }
}

/// Integrated power-stage variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct L6470Map;

impl RegisterMap for L6470Map {
    fn chip(&self) -> DriveChip {
        DriveChip::L6470
    }

    fn address(&self, register: Register) -> Option<u8> {
        match register {
            Register::Config => Some(0x18),
            Register::GateCfg1 | Register::GateCfg2 => None,
            other => common_address(other),
        }
    }
}

/// Gate-driver variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct L6480Map;

impl RegisterMap for L6480Map {
    fn chip(&self) -> DriveChip {
        DriveChip::L6480
    }

    fn address(&self, register: Register) -> Option<u8> {
        match register {
            Register::GateCfg1 => Some(0x18),
            Register::GateCfg2 => Some(0x19),
            Register::Config => Some(0x1A),
            other => common_address(other),
        }
    }
}

static L6470: L6470Map = L6470Map;
static L6480: L6480Map = L6480Map;

/// Map for the fitted drive variant.
pub fn register_map(chip: DriveChip) -> &'static dyn RegisterMap {
    match chip {
        DriveChip::L6470 => &L6470,
        DriveChip::L6480 => &L6480,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
