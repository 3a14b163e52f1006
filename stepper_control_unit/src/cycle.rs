//! Per-axis cycle scheduler.
//!
//! Each fitted axis runs its own [`AxisCycleScheduler`] on its own thread.
//! All axes share one [`CardBus`] behind a mutex; every bus access of a
//! cycle happens inside a single lock section.
//!
//! ## Lifecycle
//! 1. **Waiting** for a device: commands are discarded, the status word
//!    reports the axis disconnected. Paced at the configuration period.
//! 2. **Connect**: resolve parameters, load the position store, program
//!    the drive, restore the position, then enter STOP.
//! 3. **Running**: recovery, commands, encoder, limits, rehome check and
//!    mode dispatch, in that order. Paced at the cycle period.
//! 4. **Disconnect**: stop, flush the position, one last dispatch, gate
//!    the channel off and return the slot to device detection.
//!
//! A connected device whose configuration is rejected is held **Faulted**
//! with the fault bits on its [`ConnectionGate`] until it is unplugged or
//! the fault is cleared.
//!
//! ## RT Setup
//! Memory locking, stack prefault, CPU pinning and `SCHED_FIFO` are only
//! performed with the `rt` feature; without it they are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use stepper_common::axis::params::{AxisFlags, StoredState};
use stepper_common::axis::status::ConfigFault;
use stepper_common::axis::types::EncoderType;
use tracing::{debug, error, info, warn};

use crate::command::{CommandReceiver, apply_command};
use crate::config::{AxisEntry, CardSection, DeviceLut, resolve_parameters};
use crate::encoder::{read_encoder, service_encoder, set_encoder_position};
use crate::error::{DriveError, SchedulerError};
use crate::hal::drive::{StepperDrive, program_drive};
use crate::hal::ports::{AxisIo, CardBus, CardMode};
use crate::hal::registers::{Register, register_map};
use crate::homing::rehome::check_spontaneous_rehome;
use crate::mode::service_stepper;
use crate::persistence::{PositionStore, force_position_save};
use crate::position::sync_steps_to_encoder;
use crate::safety::{BoardSignals, service_limits};
use crate::state::{AxisState, HomingMode, Mode};
use crate::telemetry::{AxisReport, flush_events, refresh_status};

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Running sum of squares for stddev computation.
    pub sum_sq_cycle_ns: i128,
    /// Cycles that took longer than their period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns].
    pub max_latency_ns: i64,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            sum_sq_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record a cycle duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns;
        self.sum_sq_cycle_ns += i128::from(duration_ns) * i128::from(duration_ns);
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    /// Average cycle time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), SchedulerError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| SchedulerError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), SchedulerError> {
    Ok(())
}

/// Touch 1 MB of stack so the loop never faults a page in.
fn prefault_stack() {
    let mut buf = [0u8; 1024 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, exclusively borrowed stack location.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), SchedulerError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| SchedulerError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| SchedulerError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), SchedulerError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), SchedulerError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(SchedulerError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), SchedulerError> {
    Ok(())
}

/// Prepare the calling thread for cycle execution.
///
/// Must be called on the axis thread before [`AxisCycleScheduler::run`].
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), SchedulerError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Connection gate ────────────────────────────────────────────────

/// Device presence as seen by the slot's detection logic.
///
/// Written by whoever watches the slot (the one-wire poller, the
/// simulator, tests); read by the scheduler once per cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionGate {
    pub connected: bool,
    /// Serial number reported by the connected device.
    pub serial: u32,
    /// Configuration fault latched by the scheduler.
    pub fault: ConfigFault,
    /// Running cycles completed since start.
    pub heartbeat: u64,
}

impl ConnectionGate {
    /// A device reporting `serial` was plugged in.
    pub fn attach(&mut self, serial: u32) {
        self.connected = true;
        self.serial = serial;
        self.fault = ConfigFault::empty();
    }

    pub fn detach(&mut self) {
        self.connected = false;
    }
}

pub type SharedGate = Arc<Mutex<ConnectionGate>>;

fn lock<'m, T>(m: &'m Mutex<T>, what: &'static str) -> Result<MutexGuard<'m, T>, SchedulerError> {
    m.lock().map_err(|_| SchedulerError::Poisoned(what))
}

// ─── Scheduler ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisPhase {
    WaitConnect,
    Faulted,
    Running,
}

/// Cycle periods for the two lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    /// Period while running.
    pub cycle: Duration,
    /// Period while waiting for, or rejecting, a device.
    pub config_cycle: Duration,
}

impl CycleTiming {
    pub fn from_card(card: &CardSection) -> Self {
        Self {
            cycle: Duration::from_millis(card.cycle_time_ms),
            config_cycle: Duration::from_millis(card.config_cycle_time_ms),
        }
    }
}

/// Shared handles an axis thread needs.
pub struct AxisLinks<B> {
    pub bus: Arc<Mutex<B>>,
    pub gate: SharedGate,
    pub signals: Arc<BoardSignals>,
    pub commands: CommandReceiver,
}

/// Drives one axis through its lifecycle, one cycle at a time.
pub struct AxisCycleScheduler<B: CardBus + 'static> {
    entry: AxisEntry,
    lut: Arc<DeviceLut>,
    timing: CycleTiming,
    links: AxisLinks<B>,
    store: Box<dyn PositionStore>,
    axis: AxisState,
    phase: AxisPhase,
    connected_before: bool,
    stats: CycleStats,
    drive_errors: u64,
}

impl<B: CardBus + 'static> AxisCycleScheduler<B> {
    pub fn new(
        entry: AxisEntry,
        timing: CycleTiming,
        links: AxisLinks<B>,
        store: Box<dyn PositionStore>,
    ) -> Self {
        let axis = AxisState::new(
            entry.slot,
            entry.chip,
            entry.params.unwrap_or_default(),
            StoredState::default(),
        );
        Self {
            entry,
            lut: Arc::new(DeviceLut::new()),
            timing,
            links,
            store,
            axis,
            phase: AxisPhase::WaitConnect,
            connected_before: false,
            stats: CycleStats::new(),
            drive_errors: 0,
        }
    }

    /// Use `lut` for devices without usable persisted parameters.
    pub fn with_lut(mut self, lut: Arc<DeviceLut>) -> Self {
        self.lut = lut;
        self
    }

    pub fn slot(&self) -> u8 {
        self.entry.slot
    }

    pub fn phase(&self) -> AxisPhase {
        self.phase
    }

    pub fn axis(&self) -> &AxisState {
        &self.axis
    }

    pub fn axis_mut(&mut self) -> &mut AxisState {
        &mut self.axis
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Cycles abandoned on a bus or drive failure.
    pub fn drive_errors(&self) -> u64 {
        self.drive_errors
    }

    /// Period until the next cycle is due.
    pub fn period(&self) -> Duration {
        match self.phase {
            AxisPhase::Running => self.timing.cycle,
            AxisPhase::WaitConnect | AxisPhase::Faulted => self.timing.config_cycle,
        }
    }

    pub fn report(&self) -> Result<AxisReport, SchedulerError> {
        let gate = lock(&self.links.gate, "connection gate")?;
        Ok(AxisReport::capture(&self.axis, gate.connected, gate.fault))
    }

    /// Execute one cycle.
    ///
    /// Bus and drive failures abandon the rest of the cycle and are
    /// counted; only setup and lock failures are returned.
    pub fn cycle(&mut self) -> Result<(), SchedulerError> {
        let gate = *lock(&self.links.gate, "connection gate")?;

        match (self.phase, gate.connected) {
            (AxisPhase::Running, false) => self.disconnect()?,
            (AxisPhase::Faulted, false) => {
                info!(slot = self.slot(), "faulted device removed");
                self.phase = AxisPhase::WaitConnect;
            }
            (AxisPhase::WaitConnect | AxisPhase::Faulted, true)
                if gate.fault.is_empty() && self.links.signals.power_good() =>
            {
                self.connect(gate.serial)?;
            }
            _ => {}
        }

        if self.phase == AxisPhase::Running {
            self.running_cycle()?;
            lock(&self.links.gate, "connection gate")?.heartbeat += 1;
        } else {
            let dropped = self.links.commands.discard();
            if dropped > 0 {
                warn!(slot = self.slot(), dropped, "commands discarded, axis not running");
            }
            refresh_status(&mut self.axis, gate.connected);
            flush_events(&mut self.axis);
        }
        Ok(())
    }

    fn running_cycle(&mut self) -> Result<(), SchedulerError> {
        let bus = Arc::clone(&self.links.bus);
        let mut guard = lock(&bus, "card bus")?;
        let mut io = AxisIo::new(&mut *guard, self.entry.slot, register_map(self.entry.chip));

        if let Err(e) = self.service(&mut io) {
            self.drive_errors += 1;
            warn!(slot = self.slot(), error = %e, "cycle abandoned");
        }
        drop(io);
        drop(guard);

        refresh_status(&mut self.axis, true);
        flush_events(&mut self.axis);
        Ok(())
    }

    fn service(&mut self, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
        let axis = &mut self.axis;
        let signals = &*self.links.signals;

        if signals.recovery_pending(axis.slot) {
            recover_drive(axis, io)?;
            signals.clear_recovery(axis.slot);
        }
        // A failing command does not drop the ones queued behind it.
        let mut failed = None;
        for command in self.links.commands.drain() {
            if let Err(e) = apply_command(axis, io, self.store.as_mut(), command) {
                warn!(slot = axis.slot, command = command.name(), error = %e, "command failed");
                failed.get_or_insert(e);
            }
        }
        if let Some(e) = failed {
            return Err(e);
        }
        service_encoder(axis, io, signals)?;
        service_limits(axis, io)?;
        check_spontaneous_rehome(axis, io)?;
        service_stepper(axis, io, self.store.as_mut(), signals)
    }

    // ── Lifecycle transitions ──

    fn connect(&mut self, serial: u32) -> Result<(), SchedulerError> {
        info!(slot = self.slot(), serial, "device connected");
        match self.configure(serial) {
            Ok(()) => {
                info!(
                    slot = self.slot(),
                    enc_pos = self.axis.enc.pos,
                    enabled = self.axis.enabled,
                    "axis running"
                );
                self.phase = AxisPhase::Running;
                Ok(())
            }
            Err(SchedulerError::Rejected(fault)) => self.reject(fault),
            Err(SchedulerError::Persistence(e)) => {
                warn!(slot = self.slot(), error = %e, "position store unavailable");
                self.reject(ConfigFault::STORE_UNAVAILABLE)
            }
            Err(SchedulerError::Drive(e)) => {
                warn!(slot = self.slot(), error = %e, "drive setup failed, retrying");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn reject(&mut self, fault: ConfigFault) -> Result<(), SchedulerError> {
        error!(slot = self.slot(), fault = ?fault, "configuration rejected, axis gated off");
        lock(&self.links.gate, "connection gate")?.fault = fault;
        self.axis.enabled = false;
        self.phase = AxisPhase::Faulted;
        Ok(())
    }

    fn configure(&mut self, serial: u32) -> Result<(), SchedulerError> {
        let resolved =
            resolve_parameters(&self.entry, serial, &self.lut).map_err(SchedulerError::Rejected)?;
        let stored = self.store.load()?.unwrap_or(resolved.default_store);
        debug!(
            slot = self.slot(),
            from_lut = resolved.from_lut,
            enc_pos = stored.enc_pos,
            "parameters resolved"
        );

        let enabled = if self.connected_before {
            self.axis.last_enabled
        } else {
            self.entry.enable
        };
        let mut axis = AxisState::new(self.entry.slot, self.entry.chip, resolved.params, stored);

        let bus = Arc::clone(&self.links.bus);
        let mut guard = lock(&bus, "card bus")?;
        let mut io = AxisIo::new(&mut *guard, self.entry.slot, register_map(self.entry.chip));
        arm_axis(&mut axis, &mut io)?;
        drop(io);
        drop(guard);

        axis.enabled = enabled;
        axis.last_enabled = enabled;
        self.axis = axis;
        self.connected_before = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SchedulerError> {
        info!(slot = self.slot(), enc_pos = self.axis.enc.pos, "device disconnected");
        let bus = Arc::clone(&self.links.bus);
        let mut guard = lock(&bus, "card bus")?;
        let mut io = AxisIo::new(&mut *guard, self.entry.slot, register_map(self.entry.chip));

        if let Err(e) = shut_down(
            &mut self.axis,
            &mut io,
            self.store.as_mut(),
            &self.links.signals,
        ) {
            warn!(slot = self.slot(), error = %e, "shutdown incomplete");
        }
        drop(io);
        drop(guard);

        self.axis.last_enabled = self.axis.enabled;
        self.axis.enabled = false;
        self.links.commands.discard();
        refresh_status(&mut self.axis, false);
        flush_events(&mut self.axis);
        self.phase = AxisPhase::WaitConnect;
        Ok(())
    }

    // ── Pacing loops ──

    /// Run until `running` clears or `max_cycles` have executed.
    pub fn run(&mut self, max_cycles: Option<u64>, running: &AtomicBool) -> Result<(), SchedulerError> {
        info!(slot = self.slot(), "axis scheduler started");

        #[cfg(feature = "rt")]
        let result = self.run_rt_loop(max_cycles, running);
        #[cfg(not(feature = "rt"))]
        let result = self.run_sim_loop(max_cycles, running);

        info!(
            slot = self.slot(),
            cycles = self.stats.cycle_count,
            overruns = self.stats.overruns,
            avg_ns = self.stats.avg_cycle_ns(),
            max_ns = self.stats.max_cycle_ns,
            drive_errors = self.drive_errors,
            "axis scheduler stopped"
        );
        result
    }

    fn keep_going(&self, max_cycles: Option<u64>, running: &AtomicBool) -> bool {
        running.load(Ordering::Acquire) && max_cycles.is_none_or(|n| self.stats.cycle_count < n)
    }

    fn note_overrun(&mut self, duration_ns: i64, period: Duration) {
        if duration_ns > period.as_nanos() as i64 {
            self.stats.overruns += 1;
            debug!(slot = self.slot(), duration_ns, "cycle overrun");
        }
    }

    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self, max_cycles: Option<u64>, running: &AtomicBool) -> Result<(), SchedulerError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let now = || clock_gettime(clock).map_err(|e| SchedulerError::RtSetup(format!("clock_gettime: {e}")));
        let mut next_wake = now()?;

        while self.keep_going(max_cycles, running) {
            let period = self.period();
            next_wake = timespec_add_ns(next_wake, period.as_nanos() as i64);

            let start = now()?;
            self.cycle()?;
            let end = now()?;

            let duration_ns = timespec_diff_ns(&end, &start);
            self.stats.record(duration_ns, 0);
            self.note_overrun(duration_ns, period);

            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
            let woke = now()?;
            self.stats.max_latency_ns = self.stats.max_latency_ns.max(timespec_diff_ns(&woke, &next_wake));
        }
        Ok(())
    }

    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self, max_cycles: Option<u64>, running: &AtomicBool) -> Result<(), SchedulerError> {
        use std::time::Instant;

        while self.keep_going(max_cycles, running) {
            let period = self.period();
            let start = Instant::now();
            self.cycle()?;
            let elapsed = start.elapsed();

            let duration_ns = elapsed.as_nanos() as i64;
            self.stats.record(duration_ns, 0);
            self.note_overrun(duration_ns, period);

            if let Some(remaining) = period.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
        Ok(())
    }
}

// ─── Bus-locked steps ───────────────────────────────────────────────

fn card_mode(kind: EncoderType) -> CardMode {
    match kind {
        EncoderType::AbsBissLinear => CardMode::Biss,
        k if k.is_rotary_magnetic() => CardMode::Magnetic,
        _ => CardMode::Stepper,
    }
}

/// Bring a freshly connected axis to a known state, ready for STOP.
fn arm_axis(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    io.set_card_mode(card_mode(axis.enc.kind))?;
    program_drive(&mut io.drive(), axis.chip, &axis.params.drive)?;

    let stored = axis.store;
    axis.enc.zero = stored.enc_zero;
    if axis.enc.kind.is_absolute() {
        read_encoder(axis, io)?;
    } else if axis.enc.kind != EncoderType::None && axis.has_flag(AxisFlags::HAS_ENCODER) {
        set_encoder_position(axis, io, stored.enc_pos)?;
    } else {
        axis.enc.pos = stored.enc_pos;
    }
    io.drive().set_param(Register::ElPos, u32::from(stored.el_pos))?;
    axis.counters.el_pos = stored.el_pos;

    axis.speeds.reset_all_to_unbound();
    sync_steps_to_encoder(axis, io)?;
    axis.counters.cmnd_pos = axis.enc.pos;
    axis.set_mode(Mode::Stop);
    Ok(())
}

/// Reprogram a drive that reset under us.
fn recover_drive(axis: &mut AxisState, io: &mut AxisIo<'_>) -> Result<(), DriveError> {
    warn!(slot = axis.slot, "drive reset detected, reprogramming");
    axis.set_mode(Mode::Stop);
    axis.ctrl.homing_mode = HomingMode::Idle;
    program_drive(&mut io.drive(), axis.chip, &axis.params.drive)?;
    sync_steps_to_encoder(axis, io)
}

fn shut_down(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    store: &mut dyn PositionStore,
    signals: &BoardSignals,
) -> Result<(), DriveError> {
    axis.set_mode(Mode::Stop);
    axis.ctrl.homing_mode = HomingMode::Idle;
    force_position_save(axis, io, store)?;
    sync_steps_to_encoder(axis, io)?;
    service_stepper(axis, io, store, signals)?;
    io.set_card_mode(CardMode::OneWire)?;
    Ok(())
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    while nanos < 0 {
        secs -= 1;
        nanos += 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

/// Difference (a - b) in nanoseconds.
#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

// ─── Tests ──────────────────────────────────────────────────────────
