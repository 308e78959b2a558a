//! Mutant execution engine: runs externally generated mutants against a
//! real test suite inside a pool of isolated, reusable sandboxes, each
//! driving a crash-recoverable worker-process test runner.
//!
//! The engine never interprets the code it manipulates; it moves opaque
//! named byte buffers and delegates "did tests pass" to a pluggable test
//! runner hosted in a worker process.

pub mod baseline;
pub mod cache;
pub mod channel;
pub mod config;
pub mod coverage;
pub mod engine;
pub mod file;
pub mod input;
pub mod mutant;
pub mod output;
pub mod protocol;
pub mod resilient;
pub mod sandbox;
pub mod schedule;
pub mod scripted;
pub mod test_framework;
pub mod test_runner;
pub mod transpile;
pub mod worker;
