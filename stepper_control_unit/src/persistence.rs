//! Stored positions and their persistence.
//!
//! The engine decides *when* the high-frequency store is flushed (idle
//! after motion, explicit position sets, disconnect); a [`PositionStore`]
//! decides *where*.

use std::fs;
use std::path::{Path, PathBuf};

use stepper_common::axis::params::StoredState;
use stepper_common::consts::{NUM_STORED_POSITIONS, STORED_POSITION_NONE};
use tracing::{debug, info, warn};

use crate::error::{DriveError, PersistenceError};
use crate::hal::drive::StepperDrive;
use crate::hal::ports::AxisIo;
use crate::hal::registers::Register;
use crate::state::AxisState;

/// Idle cycles after motion before the position is flushed.
pub const IDLE_SAVE_CYCLES: u32 = 1000;

// ─── Store backends ─────────────────────────────────────────────────

/// Non-volatile home of one axis' [`StoredState`].
pub trait PositionStore: Send {
    /// Load the persisted state; `None` when nothing was ever saved.
    fn load(&mut self) -> Result<Option<StoredState>, PersistenceError>;

    fn save(&mut self, state: &StoredState) -> Result<(), PersistenceError>;
}

/// Volatile store for tests and the simulator.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Option<StoredState>,
    saves: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds `state`.
    pub fn with_state(state: StoredState) -> Self {
        Self {
            state: Some(state),
            saves: 0,
        }
    }

    pub fn saved(&self) -> Option<&StoredState> {
        self.state.as_ref()
    }

    /// Number of saves so far.
    pub fn save_count(&self) -> u32 {
        self.saves
    }
}

impl PositionStore for MemoryStore {
    fn load(&mut self) -> Result<Option<StoredState>, PersistenceError> {
        Ok(self.state)
    }

    fn save(&mut self, state: &StoredState) -> Result<(), PersistenceError> {
        self.state = Some(*state);
        self.saves += 1;
        Ok(())
    }
}

/// One TOML file per axis.
#[derive(Debug, Clone)]
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PositionStore for TomlFileStore {
    fn load(&mut self) -> Result<Option<StoredState>, PersistenceError> {
        if !self.path.exists() {
            debug!("Position store {:?} does not exist", self.path);
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .map_err(|e| PersistenceError::Io(format!("{}: {e}", self.path.display())))?;
        let state = toml::from_str(&text)
            .map_err(|e| PersistenceError::Corrupt(format!("{}: {e}", self.path.display())))?;
        Ok(Some(state))
    }

    fn save(&mut self, state: &StoredState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Io(format!("Failed to create directory: {e}")))?;
        }
        let text = toml::to_string(state)
            .map_err(|e| PersistenceError::Corrupt(format!("Failed to serialize store: {e}")))?;
        fs::write(&self.path, text)
            .map_err(|e| PersistenceError::Io(format!("{}: {e}", self.path.display())))?;
        debug!("Saved position store to {:?}", self.path);
        Ok(())
    }
}

// ─── Stored-position proximity ──────────────────────────────────────

/// Mark the first stored slot within the deadband as current, else none.
pub fn check_if_at_stored_position(axis: &mut AxisState) {
    let deadband = i64::from(axis.store.stored_pos_deadband);
    let pos = i64::from(axis.enc.pos);
    axis.current_stored = axis
        .store
        .stored_pos
        .iter()
        .take(NUM_STORED_POSITIONS)
        .position(|&stored| (pos - i64::from(stored)).abs() <= deadband)
        .map_or(STORED_POSITION_NONE, |i| i as u8);
}

// ─── Idle-after-motion save ─────────────────────────────────────────

/// Advance the idle timer and flush once the axis has rested long enough.
///
/// Absolute encoders keep their position across power cycles and are
/// never flushed here.
pub fn check_save_position(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    store: &mut dyn PositionStore,
) -> Result<(), DriveError> {
    if axis.enc.kind.is_absolute() {
        return Ok(());
    }
    if axis.status.is_moving() {
        axis.idle_save.elapsed = 0;
        axis.idle_save.saved = false;
    } else {
        position_save_check(axis, io, store)?;
        axis.idle_save.elapsed = axis.idle_save.elapsed.saturating_add(1);
    }
    Ok(())
}

/// Flush the position once per idle period.
pub fn position_save_check(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    store: &mut dyn PositionStore,
) -> Result<(), DriveError> {
    if axis.idle_save.elapsed <= IDLE_SAVE_CYCLES || axis.idle_save.saved {
        return Ok(());
    }
    let el_pos = io.drive().get_param(Register::ElPos)?;
    axis.counters.el_pos = el_pos as u16;
    axis.store.el_pos = axis.counters.el_pos;
    axis.store.enc_pos = axis.enc.pos;
    axis.store.enc_zero = axis.enc.zero;
    axis.idle_save.saved = true;

    match store.save(&axis.store) {
        Ok(()) => info!(slot = axis.slot, enc_pos = axis.enc.pos, "position saved"),
        Err(e) => warn!(slot = axis.slot, error = %e, "position save failed"),
    }
    Ok(())
}

/// Flush now, regardless of the idle timer.
pub fn force_position_save(
    axis: &mut AxisState,
    io: &mut AxisIo<'_>,
    store: &mut dyn PositionStore,
) -> Result<(), DriveError> {
    axis.idle_save.saved = false;
    axis.idle_save.elapsed = IDLE_SAVE_CYCLES + 1;
    position_save_check(axis, io, store)
}

// ─── Tests ──────────────────────────────────────────────────────────
