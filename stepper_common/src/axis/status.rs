//! Status and fault words reported to the host.
//!
//! [`StatusBits`] is refreshed every cycle; [`ConfigFault`] records why an
//! axis is gated off; [`EncoderHealth`] is the encoder collaborator's view
//! of its own sensor.

use bitflags::bitflags;

bitflags! {
    /// Per-axis status bitfield.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusBits: u32 {
        const CW_LIMIT       = 1 << 0;
        const CCW_LIMIT      = 1 << 1;
        const CW_SOFT_LIMIT  = 1 << 2;
        const CCW_SOFT_LIMIT = 1 << 3;
        const CW_MOVE        = 1 << 4;
        const CCW_MOVE       = 1 << 5;
        const CW_JOG         = 1 << 6;
        const CCW_JOG        = 1 << 7;
        /// Physical device present on the slot.
        const MOTOR_CONNECTED = 1 << 8;
        const HOMING         = 1 << 9;
        const HOMED          = 1 << 10;
        const INTERLOCK      = 1 << 11;
        const ENC_WARNING    = 1 << 12;
        const ENC_ERROR      = 1 << 13;
        /// Magnet too close.
        const ENC_MAG_HIGH   = 1 << 14;
        /// Magnet too far.
        const ENC_MAG_LOW    = 1 << 15;
        /// Sensor not ready.
        const ENC_NOT_READY  = 1 << 16;
        /// Stage belongs to the active shuttle group (shares bits 15–16).
        const SHUTTLE_ACTIVE = 0x0001_8000;
        const CHANNEL_ENABLED = 1 << 31;
    }
}

impl StatusBits {
    /// Either move bit.
    pub const MOVING: Self = Self::from_bits_truncate(Self::CW_MOVE.bits() | Self::CCW_MOVE.bits());

    /// Whether the axis reported motion.
    #[inline]
    pub const fn is_moving(&self) -> bool {
        self.intersects(Self::MOVING)
    }
}

bitflags! {
    /// Why an axis failed to arm.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConfigFault: u8 {
        /// Persisted parameters belong to another device.
        const SERIAL_MISMATCH   = 0x01;
        /// No lookup-table entry for the device.
        const LUT_MISSING       = 0x02;
        /// Lookup-table entry has malformed section markers.
        const LUT_MARKERS       = 0x04;
        /// Parameter set failed semantic validation.
        const INVALID_PARAMS    = 0x08;
        /// Persistence collaborator failed.
        const STORE_UNAVAILABLE = 0x10;
    }
}

bitflags! {
    /// Encoder sensor health as reported by the encoder collaborator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EncoderHealth: u8 {
        /// Magnet too close.
        const MAG_HIGH = 0x01;
        /// Magnet too far.
        const MAG_LOW  = 0x02;
        /// Sensor ready.
        const READY    = 0x04;
        /// Magnet field within range.
        const MAG_GOOD = 0x08;
        const WARNING  = 0x10;
        const ERROR    = 0x20;
    }
}
