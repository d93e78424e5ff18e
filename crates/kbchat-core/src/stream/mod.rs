//! Per-session stream consumption.
//!
//! A [`consumer::StreamConsumer`] owns the transient stream state for one
//! session and drives at most one turn at a time through the
//! `idle -> sending -> streaming -> terminal -> idle` state machine.

pub mod consumer;
