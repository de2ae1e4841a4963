//! Application layer - Use cases and port definitions.

pub mod families;
pub mod ports;
pub mod supervisor;
