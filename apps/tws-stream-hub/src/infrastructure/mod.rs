//! Infrastructure layer - Adapters and external integrations.

pub mod config;
pub mod facade;
pub mod health;
pub mod metrics;
pub mod notify;
pub mod telemetry;
