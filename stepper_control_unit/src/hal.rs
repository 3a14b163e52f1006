//! Hardware access layer.
//!
//! Register maps for the two drive IC variants, the drive command set,
//! the card bus and slot port traits, and a simulated card.

pub mod drive;
pub mod ports;
pub mod registers;
pub mod sim;
