//! Test utilities for kvbench.
//!
//! This crate provides utilities to facilitate testing of the benchmark harness. See the modules
//! for all available utilities.

pub mod sink;
pub mod store;
pub mod tracing;
