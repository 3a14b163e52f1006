//! Simulated stepper card.
//!
//! Emulates the drive register file, integrates motor motion from the
//! commanded SPEED value and derives encoder, limit-switch and index
//! signals from a simple stage model. Used by the binary, the integration
//! tests and the benchmark.

use serde::Deserialize;
use stepper_common::axis::status::EncoderHealth;
use stepper_common::axis::types::{Direction, DriveChip, EncoderType};
use stepper_common::consts::{
    MAX_AXES, RAW_POSITION_MASK, SPEED_LSB_STEPS_PER_SEC, SPEED_REGISTER_SCALE,
};

use crate::error::BusError;
use crate::hal::drive::{
    CMD_GET_PARAM, CMD_GET_STATUS, CMD_HARD_HIZ, CMD_HARD_STOP, CMD_RUN, CMD_SET_PARAM,
    CMD_SOFT_HIZ, CMD_SOFT_STOP, pack_be, unpack_be,
};
use crate::hal::ports::{AxisIo, CardMode, LimitSample, SlotPorts, SpiBus};
use crate::hal::registers::{Register, RegisterMap, register_map};

// ─── Configuration ──────────────────────────────────────────────────

/// Physical description of one simulated axis.
///
/// Positions are stage positions in encoder counts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimAxisConfig {
    pub chip: DriveChip,
    pub encoder: EncoderType,
    /// Microsteps per encoder count.
    pub counts_per_unit: f64,
    /// Motor wired backwards relative to the stage.
    pub stepper_reversed: bool,
    /// Encoder counts run opposite to the stage.
    pub encoder_reversed: bool,
    /// Magnetic sensor wrap [counts].
    pub max_pos: i32,
    /// CW switch closes at or above this position.
    pub cw_limit: Option<i32>,
    /// CCW switch closes at or below this position.
    pub ccw_limit: Option<i32>,
    /// Index pulse position.
    pub index_at: Option<i32>,
    /// Optical slot (sensor reading range) on a turret.
    pub slot_window: Option<(i32, i32)>,
    /// Mechanical obstruction the stage cannot pass going CW.
    pub cw_wall: Option<i32>,
    pub start_pos: i32,
}

impl Default for SimAxisConfig {
    fn default() -> Self {
        Self {
            chip: DriveChip::L6470,
            encoder: EncoderType::QuadLinear,
            counts_per_unit: 1.0,
            stepper_reversed: false,
            encoder_reversed: false,
            max_pos: 100_000,
            cw_limit: None,
            ccw_limit: None,
            index_at: None,
            slot_window: None,
            cw_wall: None,
            start_pos: 0,
        }
    }
}

// ─── Per-slot model ─────────────────────────────────────────────────

struct SimSlot {
    cfg: SimAxisConfig,
    map: &'static dyn RegisterMap,
    regs: [u32; 0x20],
    /// Drive position [microsteps], unwrapped.
    motor: f64,
    /// Stage position [counts].
    stage: f64,
    running: bool,
    dir: Direction,
    speed: u32,
    hiz: bool,
    enc_offset: i64,
    zero_on_limit: bool,
    opto: bool,
    card_mode: CardMode,
    health: EncoderHealth,
    pending: bool,
    index_latch: bool,
    last_sample: LimitSample,
    fail: bool,
    max_speed_issued: u32,
    runs: u64,
}

impl SimSlot {
    fn new(cfg: SimAxisConfig) -> Self {
        let mut slot = Self {
            cfg,
            map: register_map(cfg.chip),
            regs: [0; 0x20],
            motor: 0.0,
            stage: cfg.start_pos as f64,
            running: false,
            dir: Direction::Forward,
            speed: 0,
            hiz: true,
            enc_offset: 0,
            zero_on_limit: false,
            opto: false,
            card_mode: CardMode::Disabled,
            health: EncoderHealth::READY | EncoderHealth::MAG_GOOD,
            pending: false,
            index_latch: false,
            last_sample: LimitSample::default(),
            fail: false,
            max_speed_issued: 0,
            runs: 0,
        };
        slot.motor = slot.stage * slot.step_sign() * cfg.counts_per_unit;
        slot.last_sample = slot.sample();
        slot
    }

    fn step_sign(&self) -> f64 {
        if self.cfg.stepper_reversed { -1.0 } else { 1.0 }
    }

    fn encoder_sign(&self) -> f64 {
        if self.cfg.encoder_reversed { -1.0 } else { 1.0 }
    }

    fn reg(&self, register: Register) -> u32 {
        self.map
            .address(register)
            .map_or(0, |a| self.regs[a as usize])
    }

    /// Encoder hardware reading before any counter offset.
    fn encoder_base(&self) -> i64 {
        (self.stage * self.encoder_sign()).round() as i64
    }

    fn encoder_counts(&self) -> i32 {
        let value = self.encoder_base() + self.enc_offset;
        match self.cfg.encoder {
            EncoderType::AbsIndexLinear => (value as u32 & RAW_POSITION_MASK) as i32,
            EncoderType::MagneticRotation
            | EncoderType::MagneticRotationAutoHome
            | EncoderType::MagneticRotationLw
            | EncoderType::MagneticRotationManual => {
                value.rem_euclid(self.cfg.max_pos.max(1) as i64) as i32
            }
            _ => value as i32,
        }
    }

    fn in_slot_window(&self) -> bool {
        self.cfg.slot_window.is_some_and(|(lo, hi)| {
            let reading = self.encoder_counts();
            reading >= lo && reading <= hi
        })
    }

    fn sample(&self) -> LimitSample {
        let pos = self.stage;
        LimitSample {
            cw: self.cfg.cw_limit.is_some_and(|l| pos >= l as f64),
            ccw: self.cfg.ccw_limit.is_some_and(|l| pos <= l as f64),
            index: if self.cfg.slot_window.is_some() {
                !self.in_slot_window()
            } else {
                self.index_latch
            },
        }
    }

    fn abs_pos(&self) -> u32 {
        (self.motor.round() as i64) as u32 & RAW_POSITION_MASK
    }

    fn stop(&mut self) {
        self.running = false;
        self.speed = 0;
    }

    fn execute(&mut self, frame: &mut [u8]) {
        let Some((&mut cmd, args)) = frame.split_first_mut() else {
            return;
        };
        match cmd {
            c if c & 0xFE == CMD_RUN => {
                self.dir = Direction::from_bool(c & 1 == 1);
                self.speed = unpack_be(args);
                self.running = true;
                self.hiz = false;
                self.runs += 1;
                self.max_speed_issued = self.max_speed_issued.max(self.speed);
            }
            CMD_SOFT_STOP | CMD_HARD_STOP => self.stop(),
            CMD_SOFT_HIZ | CMD_HARD_HIZ => {
                self.stop();
                self.hiz = true;
            }
            CMD_GET_STATUS => {
                let word = (self.hiz as u32) | ((self.running as u32) << 5);
                pack_be(word, args);
            }
            c if c & 0xE0 == CMD_GET_PARAM => {
                let value = match self.map.register_at(c & 0x1F) {
                    Some(Register::AbsPos) => self.abs_pos(),
                    Some(Register::Speed) => self.speed,
                    Some(_) => self.regs[(c & 0x1F) as usize],
                    None => 0,
                };
                pack_be(value, args);
            }
            c if c & 0xE0 == CMD_SET_PARAM => {
                let addr = c & 0x1F;
                let value = unpack_be(args);
                if self.map.register_at(addr) == Some(Register::AbsPos) {
                    self.motor = (((value << 10) as i32) >> 10) as f64;
                } else {
                    self.regs[addr as usize] = value;
                }
            }
            _ => {}
        }
    }

    fn advance(&mut self, dt: f64) {
        if self.running && !self.hiz {
            let ceiling = self.reg(Register::MaxSpeed) * SPEED_REGISTER_SCALE;
            let speed = self.speed.min(ceiling) as f64;
            let microsteps = 1u32 << (self.reg(Register::StepMode) & 0x07);
            let rate = speed * SPEED_LSB_STEPS_PER_SEC as f64 * microsteps as f64;
            let delta = if self.dir.is_forward() { rate * dt } else { -rate * dt };
            self.motor += delta;

            let before = self.stage;
            let mut after = before + delta * self.step_sign() / self.cfg.counts_per_unit;
            if let Some(wall) = self.cfg.cw_wall {
                after = after.min(wall as f64);
            }
            self.stage = after;

            if let Some(index) = self.cfg.index_at {
                let index = index as f64;
                if (before < index && after >= index) || (before > index && after <= index) {
                    self.index_latch = true;
                    self.pending = true;
                    if self.zero_on_limit {
                        self.enc_offset = -self.encoder_base();
                    }
                }
            }
        }

        let sample = self.sample();
        let edge = sample.cw != self.last_sample.cw
            || sample.ccw != self.last_sample.ccw
            || (self.cfg.slot_window.is_some() && sample.index != self.last_sample.index);
        if edge {
            self.pending = true;
            let limit_rose =
                (sample.cw && !self.last_sample.cw) || (sample.ccw && !self.last_sample.ccw);
            if limit_rose && self.zero_on_limit {
                self.enc_offset = -self.encoder_base();
            }
        }
        self.last_sample = sample;
    }
}

// ─── Bus ────────────────────────────────────────────────────────────

/// Simulated card bus hosting up to [`MAX_AXES`] slots.
pub struct SimBus {
    slots: Vec<Option<SimSlot>>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_AXES).map(|_| None).collect(),
        }
    }

    /// Fit a simulated axis on `slot`.
    pub fn with_axis(mut self, slot: u8, cfg: SimAxisConfig) -> Self {
        self.insert(slot, cfg);
        self
    }

    pub fn insert(&mut self, slot: u8, cfg: SimAxisConfig) {
        if let Some(entry) = self.slots.get_mut(slot as usize) {
            *entry = Some(SimSlot::new(cfg));
        }
    }

    fn slot(&self, slot: u8) -> Result<&SimSlot, BusError> {
        self.slots
            .get(slot as usize)
            .and_then(Option::as_ref)
            .ok_or(BusError::NoDevice(slot))
    }

    fn slot_mut(&mut self, slot: u8) -> Result<&mut SimSlot, BusError> {
        let s = self
            .slots
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(BusError::NoDevice(slot))?;
        if s.fail {
            return Err(BusError::Transfer {
                slot,
                reason: "injected fault".to_string(),
            });
        }
        Ok(s)
    }

    /// Slot-bound handle, as the scheduler builds it under the bus lock.
    pub fn io(&mut self, slot: u8, chip: DriveChip) -> AxisIo<'_> {
        AxisIo::new(self, slot, register_map(chip))
    }

    /// Advance every slot by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        for s in self.slots.iter_mut().flatten() {
            s.advance(dt);
        }
    }

    // ── Inspection and fault injection ──

    /// Stage position [counts].
    pub fn stage_position(&self, slot: u8) -> Option<f64> {
        self.slot(slot).ok().map(|s| s.stage)
    }

    /// Move the stage without the motor (manual handling, removed parts).
    pub fn set_stage_position(&mut self, slot: u8, counts: f64) {
        if let Some(s) = self.slots.get_mut(slot as usize).and_then(Option::as_mut) {
            s.stage = counts;
        }
    }

    /// Signed 22-bit drive position.
    pub fn motor_position(&self, slot: u8) -> Option<i32> {
        self.slot(slot)
            .ok()
            .map(|s| ((s.abs_pos() << 10) as i32) >> 10)
    }

    /// Direction and speed of the current RUN, if running.
    pub fn running(&self, slot: u8) -> Option<(Direction, u32)> {
        self.slot(slot)
            .ok()
            .filter(|s| s.running)
            .map(|s| (s.dir, s.speed))
    }

    pub fn is_hiz(&self, slot: u8) -> bool {
        self.slot(slot).is_ok_and(|s| s.hiz)
    }

    /// Highest SPEED value ever sent with RUN.
    pub fn max_speed_issued(&self, slot: u8) -> u32 {
        self.slot(slot).map_or(0, |s| s.max_speed_issued)
    }

    /// Number of RUN commands received.
    pub fn run_count(&self, slot: u8) -> u64 {
        self.slot(slot).map_or(0, |s| s.runs)
    }

    pub fn register(&self, slot: u8, register: Register) -> u32 {
        self.slot(slot).map_or(0, |s| s.reg(register))
    }

    pub fn zero_on_limit_armed(&self, slot: u8) -> bool {
        self.slot(slot).is_ok_and(|s| s.zero_on_limit)
    }

    pub fn opto_powered(&self, slot: u8) -> bool {
        self.slot(slot).is_ok_and(|s| s.opto)
    }

    pub fn card_mode(&self, slot: u8) -> Option<CardMode> {
        self.slot(slot).ok().map(|s| s.card_mode)
    }

    pub fn set_health(&mut self, slot: u8, health: EncoderHealth) {
        if let Some(s) = self.slots.get_mut(slot as usize).and_then(Option::as_mut) {
            s.health = health;
        }
    }

    /// Make every transfer to `slot` fail.
    pub fn inject_fault(&mut self, slot: u8, fail: bool) {
        if let Some(s) = self.slots.get_mut(slot as usize).and_then(Option::as_mut) {
            s.fail = fail;
        }
    }
}

impl SpiBus for SimBus {
    fn transfer(&mut self, slot: u8, frame: &mut [u8]) -> Result<(), BusError> {
        self.slot_mut(slot)?.execute(frame);
        Ok(())
    }
}

impl SlotPorts for SimBus {
    fn encoder_counts(&mut self, slot: u8) -> Result<i32, BusError> {
        Ok(self.slot_mut(slot)?.encoder_counts())
    }

    fn load_encoder_counts(&mut self, slot: u8, counts: i32) -> Result<(), BusError> {
        let s = self.slot_mut(slot)?;
        s.enc_offset = counts as i64 - s.encoder_base();
        Ok(())
    }

    fn encoder_health(&mut self, slot: u8) -> Result<EncoderHealth, BusError> {
        Ok(self.slot_mut(slot)?.health)
    }

    fn limit_interrupt_pending(&mut self, slot: u8) -> Result<bool, BusError> {
        Ok(self.slot_mut(slot)?.pending)
    }

    fn read_limit_switches(&mut self, slot: u8) -> Result<LimitSample, BusError> {
        let s = self.slot_mut(slot)?;
        let sample = s.sample();
        s.pending = false;
        s.index_latch = false;
        Ok(sample)
    }

    fn set_zero_on_limit(&mut self, slot: u8, armed: bool) -> Result<(), BusError> {
        self.slot_mut(slot)?.zero_on_limit = armed;
        Ok(())
    }

    fn set_opto_power(&mut self, slot: u8, on: bool) -> Result<(), BusError> {
        self.slot_mut(slot)?.opto = on;
        Ok(())
    }

    fn set_card_mode(&mut self, slot: u8, mode: CardMode) -> Result<(), BusError> {
        self.slot_mut(slot)?.card_mode = mode;
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
