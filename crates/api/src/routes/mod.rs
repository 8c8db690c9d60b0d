//! HTTP route handlers.

pub mod breakers;
pub mod health;
pub mod metrics;
pub mod sagas;
