//! Safety envelope.
//!
//! Limit switches and soft limits, step/encoder divergence (collision) and
//! the board emergency stop. Every violation is resolved locally by forcing
//! a safe mode; none of it is reported as an error.

pub mod collision;
pub mod estop;
pub mod limits;

pub use collision::check_for_collision;
pub use estop::{BoardSignals, check_em_stop};
pub use limits::{check_goto_limits, check_run_limits, service_limits};
