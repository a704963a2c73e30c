//! Math utilities for the SMPS regulator.
//!
//! This module provides the clamping primitive and the incremental PID stage
//! shared by the voltage and current loops.

pub mod limiter;
pub mod pid;
