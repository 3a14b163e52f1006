//! Card configuration, persistence across restarts and concurrent axes.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use stepper_common::axis::command::AxisCommand;
use stepper_common::axis::params::AxisFlags;
use stepper_common::axis::types::DriveChip;
use stepper_control_unit::command::command_channel;
use stepper_control_unit::config::{AxisEntry, DeviceLut, load_card, resolve_parameters};
use stepper_control_unit::cycle::{AxisCycleScheduler, AxisLinks, AxisPhase, ConnectionGate, CycleTiming};
use stepper_control_unit::hal::sim::SimBus;
use stepper_control_unit::persistence::{MemoryStore, PositionStore, TomlFileStore};
use stepper_control_unit::safety::BoardSignals;
use stepper_control_unit::state::Mode;
use tempfile::tempdir;

use super::{Bench, linear_params, linear_sim};

#[test]
fn shipped_card_resolves_every_axis() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/card.toml");
    let card = load_card(&path).unwrap();
    let lut = DeviceLut::load_dir(card.card.lut_dir.as_deref().unwrap()).unwrap();
    assert!(!lut.is_empty());

    for entry in &card.axes {
        let resolved = resolve_parameters(entry, entry.serial, &lut)
            .unwrap_or_else(|f| panic!("slot {} rejected: {f:?}", entry.slot));
        assert_eq!(resolved.from_lut, entry.device.is_some(), "slot {}", entry.slot);
    }
    for step in &card.script {
        assert!(card.axes.iter().any(|a| a.slot == step.slot));
    }
}

#[test]
fn position_survives_a_restart() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("axis_0.toml");

    let mut b = Bench::with_store(
        linear_params(AxisFlags::empty()),
        linear_sim(),
        Box::new(TomlFileStore::new(&file)),
    );
    b.connect();
    b.send(AxisCommand::MoveAbsolute { target: 2500 });
    assert!(b.run_until(2000, |a| a.mode() == Mode::Idle));
    let parked = b.axis().enc.pos;
    b.disconnect();

    let saved = TomlFileStore::new(&file).load().unwrap().unwrap();
    assert_eq!(saved.enc_pos, parked);

    // A fresh controller on a stage that powered up elsewhere.
    let mut b = Bench::with_store(
        linear_params(AxisFlags::empty()),
        linear_sim(),
        Box::new(TomlFileStore::new(&file)),
    );
    b.connect();
    assert_eq!(b.axis().enc.pos, parked);
    assert_eq!(b.axis().counters.cmnd_pos, parked);
}

#[test]
fn reconnect_restores_the_channel_enable() {
    let mut b = Bench::new(linear_params(AxisFlags::empty()), linear_sim());
    b.connect();
    b.send(AxisCommand::SetChannelEnable { enabled: false });
    b.tick();
    assert!(!b.axis().enabled);

    b.disconnect();
    b.connect();
    assert!(!b.axis().enabled);
    assert_eq!(b.sched.report().unwrap().config_fault, 0);
}

#[test]
fn axes_share_the_bus_concurrently() {
    let bus = Arc::new(Mutex::new(
        SimBus::new().with_axis(0, linear_sim()).with_axis(1, linear_sim()),
    ));
    let signals = Arc::new(BoardSignals::new());
    let timing = CycleTiming {
        cycle: Duration::from_millis(1),
        config_cycle: Duration::from_millis(1),
    };

    let mut scheds: Vec<_> = (0..2u8)
        .map(|slot| {
            let serial = 100 + u32::from(slot);
            let mut gate = ConnectionGate::default();
            gate.attach(serial);
            let (_tx, rx) = command_channel();
            let entry = AxisEntry {
                slot,
                serial,
                chip: DriveChip::L6470,
                device: None,
                params: Some(linear_params(AxisFlags::empty())),
                enable: true,
                sim: linear_sim(),
            };
            let links = AxisLinks {
                bus: Arc::clone(&bus),
                gate: Arc::new(Mutex::new(gate)),
                signals: Arc::clone(&signals),
                commands: rx,
            };
            let store: Box<dyn PositionStore> = Box::new(MemoryStore::new());
            AxisCycleScheduler::new(entry, timing, links, store)
        })
        .collect();

    let running = AtomicBool::new(true);
    thread::scope(|s| {
        for sched in &mut scheds {
            let running = &running;
            s.spawn(move || sched.run(Some(50), running).unwrap());
        }
    });

    for sched in &scheds {
        assert_eq!(sched.phase(), AxisPhase::Running);
        assert_eq!(sched.stats().cycle_count, 50);
        assert_eq!(sched.drive_errors(), 0);
        assert!(sched.report().unwrap().connected);
    }
}
