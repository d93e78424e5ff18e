//! Observability setup for kbchat: structured logging via `tracing` with an
//! optional OpenTelemetry span bridge.

pub mod tracing_setup;
