//! Card bus and per-slot side-channel ports.
//!
//! The drive IC is reached through [`SpiBus`]; everything else the engine
//! touches on a slot (encoder counter, limit interrupt latch, homing and
//! optical-sensor outputs, card mode) goes through [`SlotPorts`]. A real
//! card implements both on the same object, so the engine sees one
//! [`CardBus`] guarded by one mutex.

use stepper_common::axis::status::EncoderHealth;

use crate::error::BusError;
use crate::hal::drive::L64xxDrive;
use crate::hal::registers::RegisterMap;

/// Full-duplex frame transport to the drive on a slot.
pub trait SpiBus: Send {
    /// Clock `frame` out to `slot`; bytes shifted back overwrite `frame`.
    fn transfer(&mut self, slot: u8, frame: &mut [u8]) -> Result<(), BusError>;
}

/// Raw limit-switch sample as latched by the slot logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LimitSample {
    pub cw: bool,
    pub ccw: bool,
    /// Index / optical slot line.
    pub index: bool,
}

/// Slot operating mode selected by the card logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardMode {
    /// Outputs disabled.
    #[default]
    Disabled,
    /// Stepper with quadrature or no encoder.
    Stepper,
    /// Stepper with a magnetic rotary sensor.
    Magnetic,
    /// Stepper with a BiSS absolute encoder.
    Biss,
    /// Device detection over one-wire (disconnected slot).
    OneWire,
}

/// Side channels of one slot beyond the drive IC.
pub trait SlotPorts: Send {
    /// Encoder counter reading.
    fn encoder_counts(&mut self, slot: u8) -> Result<i32, BusError>;

    /// Load the encoder counter.
    fn load_encoder_counts(&mut self, slot: u8, counts: i32) -> Result<(), BusError>;

    fn encoder_health(&mut self, slot: u8) -> Result<EncoderHealth, BusError>;

    /// Whether a limit edge has been latched since the last acknowledge.
    fn limit_interrupt_pending(&mut self, slot: u8) -> Result<bool, BusError>;

    /// Acknowledge the latched edge and sample the switch lines.
    fn read_limit_switches(&mut self, slot: u8) -> Result<LimitSample, BusError>;

    /// Arm or disarm "zero encoder on limit/index".
    fn set_zero_on_limit(&mut self, slot: u8, armed: bool) -> Result<(), BusError>;

    /// Power the auxiliary optical sensor.
    fn set_opto_power(&mut self, slot: u8, on: bool) -> Result<(), BusError>;

    fn set_card_mode(&mut self, slot: u8, mode: CardMode) -> Result<(), BusError>;
}

/// Drive transport plus slot ports, as one lockable resource.
pub trait CardBus: SpiBus + SlotPorts {}

impl<T: SpiBus + SlotPorts> CardBus for T {}

// ─── Slot-bound handle ──────────────────────────────────────────────

/// Borrowed bus bound to one axis' slot and register map.
///
/// Only exists while the bus mutex is held.
pub struct AxisIo<'a> {
    bus: &'a mut dyn CardBus,
    slot: u8,
    map: &'static dyn RegisterMap,
}

impl<'a> AxisIo<'a> {
    pub fn new(bus: &'a mut dyn CardBus, slot: u8, map: &'static dyn RegisterMap) -> Self {
        Self { bus, slot, map }
    }

    #[inline]
    pub fn slot(&self) -> u8 {
        self.slot
    }

    #[inline]
    pub fn map(&self) -> &'static dyn RegisterMap {
        self.map
    }

    /// Drive IC on this slot.
    #[inline]
    pub fn drive(&mut self) -> L64xxDrive<'_, dyn CardBus + 'a> {
        L64xxDrive::new(&mut *self.bus, self.slot, self.map)
    }

    #[inline]
    pub fn encoder_counts(&mut self) -> Result<i32, BusError> {
        self.bus.encoder_counts(self.slot)
    }

    #[inline]
    pub fn load_encoder_counts(&mut self, counts: i32) -> Result<(), BusError> {
        self.bus.load_encoder_counts(self.slot, counts)
    }

    #[inline]
    pub fn encoder_health(&mut self) -> Result<EncoderHealth, BusError> {
        self.bus.encoder_health(self.slot)
    }

    #[inline]
    pub fn limit_interrupt_pending(&mut self) -> Result<bool, BusError> {
        self.bus.limit_interrupt_pending(self.slot)
    }

    #[inline]
    pub fn read_limit_switches(&mut self) -> Result<LimitSample, BusError> {
        self.bus.read_limit_switches(self.slot)
    }

    #[inline]
    pub fn set_zero_on_limit(&mut self, armed: bool) -> Result<(), BusError> {
        self.bus.set_zero_on_limit(self.slot, armed)
    }

    #[inline]
    pub fn set_opto_power(&mut self, on: bool) -> Result<(), BusError> {
        self.bus.set_opto_power(self.slot, on)
    }

    #[inline]
    pub fn set_card_mode(&mut self, mode: CardMode) -> Result<(), BusError> {
        self.bus.set_card_mode(self.slot, mode)
    }
}
