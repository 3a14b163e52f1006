//! # Stepper Control Unit
//!
//! Runs every axis of a card file against the simulated card: one cycle
//! thread per axis plus a physics thread that advances the stage model and
//! injects the card's scripted host commands. A JSON report per axis is
//! printed when the run ends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use clap::Parser;
use stepper_common::config::LogLevel;
use stepper_control_unit::command::{CommandSender, command_channel};
use stepper_control_unit::config::{CardConfig, DeviceLut, ScriptStep, load_card};
use stepper_control_unit::cycle::{
    AxisCycleScheduler, AxisLinks, ConnectionGate, CycleTiming, rt_setup,
};
use stepper_control_unit::error::SchedulerError;
use stepper_control_unit::hal::sim::SimBus;
use stepper_control_unit::persistence::{MemoryStore, PositionStore, TomlFileStore};
use stepper_control_unit::safety::BoardSignals;
use stepper_control_unit::telemetry::AxisReport;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Stepper Control Unit: per-axis motion control on a simulated card
#[derive(Parser, Debug)]
#[command(name = "stepper_control_unit")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Per-axis stepper control cycles against a simulated card")]
struct Args {
    /// Path to the card configuration TOML.
    #[arg(default_value = "config/card.toml")]
    config: PathBuf,

    /// Cycles to run per axis; 0 runs until killed.
    #[arg(long, default_value_t = 2000)]
    cycles: u64,

    /// CPU core to pin the axis threads to (default: 1).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (default: 80).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let card = load_card(&args.config);
    let level = card
        .as_ref()
        .map_or(LogLevel::default(), |card| card.shared.log_level);
    setup_tracing(&args, level);

    info!("Stepper Control Unit v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = match card {
        Ok(card) => run(&args, &card),
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(reports) => match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to serialize reports: {e}"),
        },
        Err(e) => {
            error!("FATAL: {e}");
            process::exit(1);
        }
    }

    info!("Stepper Control Unit shutdown complete");
}

fn run(args: &Args, card: &CardConfig) -> Result<Vec<AxisReport>, Box<dyn std::error::Error>> {
    let lut = Arc::new(match &card.card.lut_dir {
        Some(dir) => DeviceLut::load_dir(dir)?,
        None => DeviceLut::new(),
    });
    info!(
        "Config OK: cycle_time={}ms, axes={}, profiles={}",
        card.card.cycle_time_ms,
        card.axes.len(),
        lut.len()
    );

    let mut sim = SimBus::new();
    for entry in &card.axes {
        sim.insert(entry.slot, entry.sim);
    }
    let bus = Arc::new(Mutex::new(sim));
    let signals = Arc::new(BoardSignals::new());
    let running = AtomicBool::new(true);
    let timing = CycleTiming::from_card(&card.card);
    let max_cycles = (args.cycles > 0).then_some(args.cycles);

    let mut senders = HashMap::new();
    let mut schedulers = Vec::with_capacity(card.axes.len());
    for entry in &card.axes {
        let (tx, rx) = command_channel();
        senders.insert(entry.slot, tx);

        // The simulated device is present from power-up.
        let mut gate = ConnectionGate::default();
        gate.attach(entry.serial);

        let links = AxisLinks {
            bus: Arc::clone(&bus),
            gate: Arc::new(Mutex::new(gate)),
            signals: Arc::clone(&signals),
            commands: rx,
        };
        let store = open_store(card, entry.slot);
        schedulers.push(
            AxisCycleScheduler::new(entry.clone(), timing, links, store).with_lut(Arc::clone(&lut)),
        );
    }

    let reports = thread::scope(|s| {
        let handles: Vec<_> = schedulers
            .into_iter()
            .map(|mut sched| {
                let running = &running;
                s.spawn(move || -> Result<AxisReport, SchedulerError> {
                    rt_setup(args.cpu_core, args.rt_priority)?;
                    let result = sched.run(max_cycles, running);
                    if result.is_err() {
                        running.store(false, Ordering::Release);
                    }
                    result?;
                    sched.report()
                })
            })
            .collect();

        let (script, sim, running_ref) = (&card.script, &*bus, &running);
        let physics =
            s.spawn(move || drive_physics(sim, script, senders, timing, max_cycles, running_ref));

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().map_err(|_| SchedulerError::Poisoned("axis thread")))
            .collect();
        running.store(false, Ordering::Release);
        if physics.join().is_err() {
            warn!("physics thread panicked");
        }
        results
    });

    let mut out = Vec::with_capacity(reports.len());
    for report in reports {
        out.push(report??);
    }
    Ok(out)
}

fn open_store(card: &CardConfig, slot: u8) -> Box<dyn PositionStore> {
    match &card.card.store_dir {
        Some(dir) => Box::new(TomlFileStore::new(dir.join(format!("axis_{slot}.toml")))),
        None => Box::new(MemoryStore::new()),
    }
}

/// Advance the stage model once per cycle period and send scripted commands.
fn drive_physics(
    bus: &Mutex<SimBus>,
    script: &[ScriptStep],
    senders: HashMap<u8, CommandSender>,
    timing: CycleTiming,
    max_cycles: Option<u64>,
    running: &AtomicBool,
) {
    let dt = timing.cycle.as_secs_f64();
    let mut tick = 0u64;
    while running.load(Ordering::Acquire) && max_cycles.is_none_or(|n| tick < n) {
        for step in script.iter().filter(|step| step.at_cycle == tick) {
            let Some(tx) = senders.get(&step.slot) else {
                continue;
            };
            match tx.send(step.command) {
                Ok(()) => info!(slot = step.slot, tick, command = step.command.name(), "script"),
                Err(e) => warn!(slot = step.slot, tick, error = %e, "script command dropped"),
            }
        }
        match bus.lock() {
            Ok(mut sim) => sim.step(dt),
            Err(_) => {
                error!("card bus poisoned, physics stopped");
                return;
            }
        }
        tick += 1;
        thread::sleep(timing.cycle);
    }
}

/// Setup tracing subscriber from the CLI and the card's log level.
///
/// `--verbose` raises the card level to DEBUG.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive: Directive = if args.verbose {
        Level::DEBUG.into()
    } else {
        level
            .as_directive()
            .parse()
            .unwrap_or_else(|_| Level::INFO.into())
    };

    let filter = EnvFilter::from_default_env().add_directive(directive);

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}
