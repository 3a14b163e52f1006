//! Single-producer / single-consumer command queue.
//!
//! A fixed-capacity `heapless` queue behind a mutex, so neither side ever
//! allocates. The receiver empties the queue in one short critical section
//! and applies the batch afterwards.

use std::sync::{Arc, Mutex, MutexGuard};

use heapless::spsc::Queue;
use stepper_common::axis::command::AxisCommand;

use crate::error::CommandError;

/// Queue storage size.
pub const COMMAND_QUEUE_DEPTH: usize = 16;

type SharedQueue = Arc<Mutex<Queue<AxisCommand, COMMAND_QUEUE_DEPTH>>>;

fn lock(queue: &SharedQueue) -> MutexGuard<'_, Queue<AxisCommand, COMMAND_QUEUE_DEPTH>> {
    // A panicking producer cannot leave the queue half-written.
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Create a connected sender/receiver pair.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let queue: SharedQueue = Arc::new(Mutex::new(Queue::new()));
    (
        CommandSender {
            queue: Arc::clone(&queue),
        },
        CommandReceiver { queue },
    )
}

/// Producer half, held by the protocol collaborator.
pub struct CommandSender {
    queue: SharedQueue,
}

impl CommandSender {
    /// Enqueue a command for the next cycle.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the axis has not drained the queue in time;
    /// `Closed` once the receiver is gone.
    pub fn send(&self, command: AxisCommand) -> Result<(), CommandError> {
        if Arc::strong_count(&self.queue) < 2 {
            return Err(CommandError::Closed);
        }
        lock(&self.queue)
            .enqueue(command)
            .map_err(|rejected| CommandError::QueueFull(rejected.name()))
    }

    /// Commands waiting to be applied.
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }
}

/// Consumer half, owned by the axis task.
pub struct CommandReceiver {
    queue: SharedQueue,
}

impl CommandReceiver {
    /// Take every command queued so far, oldest first.
    pub fn drain(&self) -> heapless::Vec<AxisCommand, COMMAND_QUEUE_DEPTH> {
        let mut batch = heapless::Vec::new();
        let mut queue = lock(&self.queue);
        while let Some(command) = queue.dequeue() {
            if batch.push(command).is_err() {
                break;
            }
        }
        batch
    }

    /// Drop everything queued (disconnected axis).
    pub fn discard(&self) -> usize {
        let mut queue = lock(&self.queue);
        let mut dropped = 0;
        while queue.dequeue().is_some() {
            dropped += 1;
        }
        dropped
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use stepper_common::axis::types::Direction;

    #[test]
    fn drain_preserves_order() {
        let (tx, rx) = command_channel();
        tx.send(AxisCommand::MoveAbsolute { target: 10 }).unwrap();
        tx.send(AxisCommand::Stop).unwrap();
        tx.send(AxisCommand::Jog {
            direction: Direction::Forward,
        })
        .unwrap();
        assert_eq!(tx.pending(), 3);

        let batch = rx.drain();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0], AxisCommand::MoveAbsolute { target: 10 });
        assert_eq!(batch[1], AxisCommand::Stop);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn full_queue_rejects_and_names_command() {
        let (tx, rx) = command_channel();
        let mut accepted = 0;
        let err = loop {
            match tx.send(AxisCommand::Home) {
                Ok(()) => accepted += 1,
                Err(e) => break e,
            }
        };
        assert_eq!(err, CommandError::QueueFull("home"));
        assert!(accepted > 0 && accepted <= COMMAND_QUEUE_DEPTH);
        assert_eq!(rx.drain().len(), accepted);
    }

    #[test]
    fn dropped_receiver_closes_channel() {
        let (tx, rx) = command_channel();
        drop(rx);
        assert_eq!(tx.send(AxisCommand::Stop), Err(CommandError::Closed));
    }

    #[test]
    fn discard_empties_queue() {
        let (tx, rx) = command_channel();
        tx.send(AxisCommand::Stop).unwrap();
        tx.send(AxisCommand::Home).unwrap();
        assert_eq!(rx.discard(), 2);
        assert_eq!(tx.pending(), 0);
    }
}
