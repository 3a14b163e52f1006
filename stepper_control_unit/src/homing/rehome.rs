//! Spontaneous re-homing of magnetic rotary stages.
//!
//! A turret that is pulled out and re-inserted, or a rotary stage that
//! powers up without a reference, homes itself once the magnet reads good
//! again. Manual (motorless) stages are homed by definition.

use stepper_common::axis::status::EncoderHealth;
use stepper_common::axis::types::{EncoderType, HomedStatus};
use tracing::info;

use crate::error::DriveError;
use crate::hal::ports::AxisIo;
use crate::state::{AxisState, HomingMode, Mode};

/// Cycles with a good magnet before homing starts on its own.
pub const REHOME_DELAY: u32 = 200;

/// Stored slot that must be calibrated before any automatic homing.
const CALIBRATED_SLOT: usize = 1;

/// Run once per cycle, before mode dispatch.
pub fn check_spontaneous_rehome(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    if axis.mode() == Mode::Homing || axis.store.is_blank(CALIBRATED_SLOT) {
        return Ok(());
    }

    let kind = axis.enc.kind;
    if kind == EncoderType::MagneticRotationManual {
        axis.enc.homed = HomedStatus::Homed;
        axis.set_mode(Mode::Stop);
        return Ok(());
    }

    if kind == EncoderType::MagneticRotationAutoHome
        && axis.enc.health.contains(EncoderHealth::MAG_LOW)
        && axis.enc.homed == HomedStatus::Homed
    {
        axis.limits.homed = HomedStatus::NotHomed;
        // Magnet too far may be a weak reading; the opto sensor sees the
        // turret lip unless the turret is out or parked in the slot.
        io.set_opto_power(true)?;
        let in_slot = !io.read_limit_switches()?.index;
        if in_slot {
            info!(slot = axis.slot, "turret removed");
            axis.enc.homed = HomedStatus::NotHomed;
            axis.enc.home_delay = 0;
            axis.set_mode(Mode::Stop);
        } else {
            io.set_opto_power(false)?;
        }
    }

    if kind.is_rotary_magnetic()
        && axis.enc.health.contains(EncoderHealth::MAG_GOOD)
        && matches!(axis.enc.homed, HomedStatus::NotHomed | HomedStatus::Failed)
    {
        if axis.enc.home_delay >= REHOME_DELAY {
            info!(slot = axis.slot, homed = ?axis.enc.homed, "starting automatic homing");
            axis.set_mode(Mode::Homing);
            axis.ctrl.homing_mode = HomingMode::Start;
            axis.enc.homed = HomedStatus::Homing;
            axis.limits.homed = HomedStatus::Homing;
            axis.enc.home_delay = 0;
        } else {
            axis.enc.home_delay += 1;
        }
    }
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
