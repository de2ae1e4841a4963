//! Domain layer - Core resource and payload types.

pub mod resource;
pub mod streaming;
