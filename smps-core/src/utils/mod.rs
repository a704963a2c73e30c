//! Utility re-exports and helper macros for the SMPS regulator.
//!
//! - `config`: calibrated tuning constants and the `SmpsConfig` override layer
//! - `controllers`: sampling, modulation, peripheral bring-up and the cascaded loop
//! - `math`: the clamping primitive and the incremental PID stage
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod config;
pub mod controllers;
pub mod math;

pub use config::SmpsConfig;
pub use controllers::{setpoint_ch, Setpoint, SmpsCommand, SmpsController, SMPS_CHANNEL};
pub use math::{limiter::clamp, pid::PidController};

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::__static_cell::StaticCell<$t> =
            $crate::__static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
