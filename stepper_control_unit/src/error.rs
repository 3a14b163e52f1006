//! Error types for the stepper control unit.
//!
//! Motion-safety violations are never errors here: limits, collisions and
//! emergency stops are state transitions. These types cover the seams that
//! can genuinely fail: the shared bus, drive register framing, persistence
//! and scheduler setup.

use stepper_common::axis::status::ConfigFault;
use stepper_common::axis::types::DriveChip;
use stepper_common::config::ConfigError;
use thiserror::Error;

use crate::hal::registers::Register;

/// Failure of one transfer on the shared card bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Transfer to a slot failed at the transport level.
    #[error("Bus transfer to slot {slot} failed: {reason}")]
    Transfer {
        /// Target slot
        slot: u8,
        /// Transport diagnostic
        reason: String,
    },

    /// Nothing answers on the addressed slot.
    #[error("No device on slot {0}")]
    NoDevice(u8),
}

/// Drive register access errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriveError {
    /// Underlying bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Register not implemented by this drive variant.
    #[error("Register {register:?} not available on {chip:?}")]
    UnsupportedRegister {
        /// Requested register
        register: Register,
        /// Drive variant
        chip: DriveChip,
    },

    /// Value does not fit the register width.
    #[error("Value {value:#x} exceeds {bits}-bit register {register:?}")]
    ValueTooWide {
        /// Target register
        register: Register,
        /// Rejected value
        value: u32,
        /// Register width
        bits: u8,
    },
}

/// Persistence collaborator failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Backing storage could not be read or written.
    #[error("Position store I/O failed: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("Position store corrupt: {0}")]
    Corrupt(String),
}

/// Command channel errors. The command is dropped, never applied.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Queue full; the named command was not enqueued.
    #[error("Command queue full, dropped {0}")]
    QueueFull(&'static str),

    /// The axis task has gone away.
    #[error("Command channel closed")]
    Closed,
}

/// Scheduler setup and lifecycle errors.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),

    /// Card or axis configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Connected device could not be configured.
    #[error("Axis configuration rejected: {0:?}")]
    Rejected(ConfigFault),

    /// Drive programming failed.
    #[error(transparent)]
    Drive(#[from] DriveError),

    /// Position store failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A lock was poisoned by a panicking thread.
    #[error("Lock poisoned: {0}")]
    Poisoned(&'static str),
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_converts_into_drive_error() {
        let err: DriveError = BusError::NoDevice(3).into();
        assert_eq!(err.to_string(), "No device on slot 3");
    }

    #[test]
    fn queue_full_names_command() {
        assert_eq!(
            CommandError::QueueFull("jog").to_string(),
            "Command queue full, dropped jog"
        );
    }

    #[test]
    fn value_too_wide_formats_hex() {
        let err = DriveError::ValueTooWide {
            register: Register::MaxSpeed,
            value: 0x400,
            bits: 10,
        };
        assert!(err.to_string().contains("0x400"));
    }
}
