//! Shared bench for the integration suites.

mod homing_flows;
mod lifecycle;
mod motion;
mod safety_envelope;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use stepper_common::axis::command::AxisCommand;
use stepper_common::axis::params::{AxisFlags, AxisParameters};
use stepper_common::axis::types::{DriveChip, EncoderType};
use stepper_control_unit::command::{CommandSender, command_channel};
use stepper_control_unit::config::AxisEntry;
use stepper_control_unit::cycle::{AxisCycleScheduler, AxisLinks, AxisPhase, CycleTiming, SharedGate};
use stepper_control_unit::hal::sim::{SimAxisConfig, SimBus};
use stepper_control_unit::persistence::{MemoryStore, PositionStore};
use stepper_control_unit::safety::BoardSignals;
use stepper_control_unit::state::AxisState;

/// Simulated time per cycle [s].
pub const DT: f64 = 0.001;

pub const SERIAL: u32 = 45_000_001;

/// Closed-loop linear stage with a quadrature encoder.
pub fn linear_params(flags: AxisFlags) -> AxisParameters {
    let mut p = AxisParameters::default();
    p.flags = (AxisFlags::HAS_ENCODER | flags).bits();
    p.encoder.kind = EncoderType::QuadLinear;
    p.drive.deadband = 5;
    p
}

pub fn linear_sim() -> SimAxisConfig {
    SimAxisConfig {
        encoder: EncoderType::QuadLinear,
        ..Default::default()
    }
}

pub struct Bench {
    pub sched: AxisCycleScheduler<SimBus>,
    pub bus: Arc<Mutex<SimBus>>,
    pub gate: SharedGate,
    pub signals: Arc<BoardSignals>,
    pub tx: CommandSender,
}

impl Bench {
    pub fn new(params: AxisParameters, sim: SimAxisConfig) -> Self {
        Self::with_store(params, sim, Box::new(MemoryStore::new()))
    }

    pub fn with_store(params: AxisParameters, sim: SimAxisConfig, store: Box<dyn PositionStore>) -> Self {
        let bus = Arc::new(Mutex::new(SimBus::new().with_axis(0, sim)));
        let gate = SharedGate::default();
        let signals = Arc::new(BoardSignals::new());
        let (tx, rx) = command_channel();
        let entry = AxisEntry {
            slot: 0,
            serial: SERIAL,
            chip: DriveChip::L6470,
            device: None,
            params: Some(params),
            enable: true,
            sim,
        };
        let timing = CycleTiming {
            cycle: Duration::from_millis(1),
            config_cycle: Duration::from_millis(1),
        };
        let links = AxisLinks {
            bus: Arc::clone(&bus),
            gate: Arc::clone(&gate),
            signals: Arc::clone(&signals),
            commands: rx,
        };
        Self {
            sched: AxisCycleScheduler::new(entry, timing, links, store),
            bus,
            gate,
            signals,
            tx,
        }
    }

    /// Plug the device in and run the arming cycle.
    pub fn connect(&mut self) {
        self.gate.lock().unwrap().attach(SERIAL);
        self.tick();
        assert_eq!(self.sched.phase(), AxisPhase::Running);
    }

    pub fn disconnect(&mut self) {
        self.gate.lock().unwrap().detach();
        self.tick();
        assert_eq!(self.sched.phase(), AxisPhase::WaitConnect);
    }

    pub fn send(&self, command: AxisCommand) {
        self.tx.send(command).unwrap();
    }

    /// One control cycle followed by one physics step.
    pub fn tick(&mut self) {
        self.sched.cycle().unwrap();
        self.bus.lock().unwrap().step(DT);
    }

    pub fn ticks(&mut self, n: usize) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Tick until `done` holds; false if it never did within `max` cycles.
    pub fn run_until(&mut self, max: usize, mut done: impl FnMut(&AxisState) -> bool) -> bool {
        for _ in 0..max {
            self.tick();
            if done(self.sched.axis()) {
                return true;
            }
        }
        false
    }

    pub fn axis(&self) -> &AxisState {
        self.sched.axis()
    }

    pub fn stage(&self) -> f64 {
        self.bus.lock().unwrap().stage_position(0).unwrap()
    }
}
