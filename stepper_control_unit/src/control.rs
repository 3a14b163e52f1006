//! Motion output: position PID and RUN configuration.

pub mod movement;
pub mod pid;
