//! Exam lifecycle and result aggregation engine.
//!
//! Derives exam status from enrollment completion, aggregates raw answers into category scores,
//! and reconciles computed pass/fail outcomes against administrator declarations.

pub mod config;
pub mod error;
pub mod exams;
pub mod telemetry;
