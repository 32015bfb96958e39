#![forbid(unsafe_code)]

//! Drive an interactive Magma engine over its tagged-line protocol.
//!
//! [`proc`] launches the engine and turns its output into typed events, one
//! [`Output`](proc::Output) per submitted command. [`parse`] turns the
//! multi-line structured output (tracebacks, error positions, signatures)
//! into records.

pub mod config;
pub mod errors;
pub mod parse;
pub mod proc;

pub use config::ProcessConfig;
pub use errors::{AppError, Result};
