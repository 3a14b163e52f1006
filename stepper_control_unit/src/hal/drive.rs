//! Drive IC command set and parameter programming.
//!
//! Frames are MSB-first: one command byte followed by the register or
//! argument bytes. Reads clock out zeros and take the reply from the same
//! frame.

use stepper_common::axis::params::DriveParams;
use stepper_common::axis::types::{Direction, DriveChip};

use crate::error::DriveError;
use crate::hal::ports::SpiBus;
use crate::hal::registers::{Register, RegisterMap};

// ── Command bytes ──
pub(crate) const CMD_SET_PARAM: u8 = 0x00;
pub(crate) const CMD_GET_PARAM: u8 = 0x20;
pub(crate) const CMD_RUN: u8 = 0x50;
pub(crate) const CMD_SOFT_HIZ: u8 = 0xA0;
pub(crate) const CMD_HARD_HIZ: u8 = 0xA8;
pub(crate) const CMD_SOFT_STOP: u8 = 0xB0;
pub(crate) const CMD_HARD_STOP: u8 = 0xB8;
pub(crate) const CMD_GET_STATUS: u8 = 0xD0;

/// Operations the control engine issues to a drive IC.
pub trait StepperDrive {
    /// Run continuously at `speed` (SPEED register units).
    fn run(&mut self, dir: Direction, speed: u32) -> Result<(), DriveError>;

    fn hard_stop(&mut self) -> Result<(), DriveError>;

    /// Decelerate to zero.
    fn soft_stop(&mut self) -> Result<(), DriveError>;

    /// Decelerate, then release the bridges.
    fn soft_hiz(&mut self) -> Result<(), DriveError>;

    /// Release the bridges immediately.
    fn hard_hiz(&mut self) -> Result<(), DriveError>;

    fn set_param(&mut self, register: Register, value: u32) -> Result<(), DriveError>;

    fn get_param(&mut self, register: Register) -> Result<u32, DriveError>;

    /// STATUS word (clears latched flags).
    fn status(&mut self) -> Result<u16, DriveError>;
}

/// L6470 / L6480 drive on one slot of a [`SpiBus`].
pub struct L64xxDrive<'b, B: SpiBus + ?Sized> {
    bus: &'b mut B,
    slot: u8,
    map: &'static dyn RegisterMap,
}

impl<'b, B: SpiBus + ?Sized> L64xxDrive<'b, B> {
    pub fn new(bus: &'b mut B, slot: u8, map: &'static dyn RegisterMap) -> Self {
        Self { bus, slot, map }
    }

    fn address(&self, register: Register) -> Result<u8, DriveError> {
        self.map
            .address(register)
            .ok_or(DriveError::UnsupportedRegister {
                register,
                chip: self.map.chip(),
            })
    }

    fn command(&mut self, byte: u8) -> Result<(), DriveError> {
        let mut frame = [byte];
        self.bus.transfer(self.slot, &mut frame)?;
        Ok(())
    }
}

/// Write `value` MSB-first into `out`.
#[inline]
pub(crate) fn pack_be(value: u32, out: &mut [u8]) {
    let n = out.len();
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = (value >> (8 * (n - 1 - i))) as u8;
    }
}

#[inline]
pub(crate) fn unpack_be(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

impl<B: SpiBus + ?Sized> StepperDrive for L64xxDrive<'_, B> {
    fn run(&mut self, dir: Direction, speed: u32) -> Result<(), DriveError> {
        if speed > Register::Speed.max_value() {
            return Err(DriveError::ValueTooWide {
                register: Register::Speed,
                value: speed,
                bits: Register::Speed.width_bits(),
            });
        }
        let mut frame = [CMD_RUN | dir as u8, 0, 0, 0];
        pack_be(speed, &mut frame[1..]);
        self.bus.transfer(self.slot, &mut frame)?;
        Ok(())
    }

    fn hard_stop(&mut self) -> Result<(), DriveError> {
        self.command(CMD_HARD_STOP)
    }

    fn soft_stop(&mut self) -> Result<(), DriveError> {
        self.command(CMD_SOFT_STOP)
    }

    fn soft_hiz(&mut self) -> Result<(), DriveError> {
        self.command(CMD_SOFT_HIZ)
    }

    fn hard_hiz(&mut self) -> Result<(), DriveError> {
        self.command(CMD_HARD_HIZ)
    }

    fn set_param(&mut self, register: Register, value: u32) -> Result<(), DriveError> {
        if value > register.max_value() {
            return Err(DriveError::ValueTooWide {
                register,
                value,
                bits: register.width_bits(),
            });
        }
        let addr = self.address(register)?;
        let mut frame = [0u8; 4];
        let len = 1 + register.frame_bytes();
        frame[0] = CMD_SET_PARAM | addr;
        pack_be(value, &mut frame[1..len]);
        self.bus.transfer(self.slot, &mut frame[..len])?;
        Ok(())
    }

    fn get_param(&mut self, register: Register) -> Result<u32, DriveError> {
        let addr = self.address(register)?;
        let mut frame = [0u8; 4];
        let len = 1 + register.frame_bytes();
        frame[0] = CMD_GET_PARAM | addr;
        self.bus.transfer(self.slot, &mut frame[..len])?;
        Ok(unpack_be(&frame[1..len]) & register.max_value())
    }

    fn status(&mut self) -> Result<u16, DriveError> {
        let mut frame = [CMD_GET_STATUS, 0, 0];
        self.bus.transfer(self.slot, &mut frame)?;
        Ok(unpack_be(&frame[1..]) as u16)
    }
}

// ─── Arm Sequence ───────────────────────────────────────────────────

/// Program the drive from a parameter set.
///
/// Bridges are released first; parameters only latch in high impedance.
/// KVAL_ACC and KVAL_DEC take the run value.
pub fn program_drive<D: StepperDrive + ?Sized>(
    drive: &mut D,
    chip: DriveChip,
    params: &DriveParams,
) -> Result<(), DriveError> {
    drive.hard_hiz()?;

    drive.set_param(Register::Acc, params.acc)?;
    drive.set_param(Register::Dec, params.dec)?;
    drive.set_param(Register::MaxSpeed, params.max_speed)?;
    drive.set_param(Register::MinSpeed, params.min_speed as u32)?;
    drive.set_param(Register::FsSpd, params.fs_spd as u32)?;
    drive.set_param(Register::KvalRun, params.kval_run as u32)?;
    drive.set_param(Register::KvalHold, params.kval_hold as u32)?;
    drive.set_param(Register::KvalAcc, params.kval_run as u32)?;
    drive.set_param(Register::KvalDec, params.kval_run as u32)?;
    drive.set_param(Register::IntSpd, params.int_speed as u32)?;
    drive.set_param(Register::StallTh, params.stall_th as u32)?;
    drive.set_param(Register::StSlp, params.st_slp as u32)?;
    drive.set_param(Register::FnSlpAcc, params.fn_slp_acc as u32)?;
    drive.set_param(Register::FnSlpDec, params.fn_slp_dec as u32)?;
    drive.set_param(Register::OcdTh, params.ocd_th as u32)?;
    drive.set_param(Register::StepMode, params.step_mode as u32)?;
    drive.set_param(Register::Config, params.config as u32)?;

    if chip == DriveChip::L6480 {
        drive.set_param(Register::GateCfg1, params.gatecfg1 as u32)?;
        drive.set_param(Register::GateCfg2, params.gatecfg2 as u32)?;
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
