//! Bounded per-cycle event buffer.
//!
//! Controller events are not repeated while the controller stays in the
//! same state; everything else is recorded every time it is raised.

use heapless::Vec;
use stepper_common::axis::log::{LogEvent, LogRecord};

/// Events one cycle may raise before the buffer is flushed.
pub const EVENT_CAPACITY: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    pending: Vec<LogRecord, EVENT_CAPACITY>,
    last_controller: Option<LogEvent>,
    dropped: u32,
}

#[inline]
const fn is_controller(event: LogEvent) -> bool {
    matches!(
        event,
        LogEvent::ControllerStop
            | LogEvent::ControllerPid
            | LogEvent::ControllerRun
            | LogEvent::ControllerHoming
    )
}

impl EventLog {
    pub fn emit(&mut self, slot: u8, event: LogEvent, enc_pos: i32) {
        if is_controller(event) {
            if self.last_controller == Some(event) {
                return;
            }
            self.last_controller = Some(event);
        }
        if self.pending.push(LogRecord { slot, event, enc_pos }).is_err() {
            self.dropped += 1;
        }
    }

    /// Take the events raised since the last drain.
    pub fn drain(&mut self) -> impl Iterator<Item = LogRecord> + '_ {
        let records = core::mem::take(&mut self.pending);
        records.into_iter()
    }

    pub fn pending(&self) -> &[LogRecord] {
        &self.pending
    }

    /// Records lost to a full buffer.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Forget the repeat filter (connection reset).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.last_controller = None;
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_events_do_not_repeat() {
        let mut log = EventLog::default();
        log.emit(1, LogEvent::ControllerPid, 10);
        log.emit(1, LogEvent::ControllerPid, 11);
        log.emit(1, LogEvent::ControllerStop, 12);
        log.emit(1, LogEvent::ControllerPid, 13);
        let events: std::vec::Vec<_> = log.drain().map(|r| r.event).collect();
        assert_eq!(
            events,
            [
                LogEvent::ControllerPid,
                LogEvent::ControllerStop,
                LogEvent::ControllerPid
            ]
        );
    }

    #[test]
    fn safety_events_always_recorded() {
        let mut log = EventLog::default();
        log.emit(0, LogEvent::LimitHit, 0);
        log.emit(0, LogEvent::LimitHit, 0);
        assert_eq!(log.pending().len(), 2);
    }

    #[test]
    fn overflow_counts_dropped() {
        let mut log = EventLog::default();
        for _ in 0..EVENT_CAPACITY + 3 {
            log.emit(0, LogEvent::CollisionStop, 0);
        }
        assert_eq!(log.pending().len(), EVENT_CAPACITY);
        assert_eq!(log.dropped(), 3);
        assert_eq!(log.drain().count(), EVENT_CAPACITY);
        assert!(log.pending().is_empty());
    }
}
