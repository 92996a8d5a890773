//! This crate contains the Tracing and OpenTelemetry setup used by the app
//! restart controller binary.
pub mod tracing;

pub use crate::tracing::{TelemetryOptions, Tracing};
