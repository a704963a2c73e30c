//! Core control loop for the rover's switched-mode power supply on no-std embedded platforms.
//!
//! For a host-side run against a simulated buck stage, see `smps-app/sim-mcu`.
#![no_std]

pub mod utils;

#[doc(hidden)]
pub use static_cell as __static_cell;
