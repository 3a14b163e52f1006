//! Command-mutation channel and entry points.
//!
//! The protocol side pushes [`AxisCommand`](stepper_common::axis::command::AxisCommand)
//! values through a [`CommandSender`]; the axis cycle drains them under the
//! bus lock and applies each one to the axis state before dispatch.

pub mod apply;
pub mod queue;

pub use apply::apply_command;
pub use queue::{COMMAND_QUEUE_DEPTH, CommandReceiver, CommandSender, command_channel};
