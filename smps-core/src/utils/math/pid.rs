//! Incremental (velocity-form) discrete PID with conditional-integration anti-windup.
//!
//! Each step computes an output *increment* from the last three errors and adds
//! it to the previous output:
//!
//! ```text
//! Δu = kp·(e0 − e1) + ki·Ts·e_int + (kd/Ts)·(e0 − 2·e1 + e2)
//! u0 = clamp(u1 + Δu, max, min)
//! ```
//!
//! `e_int` is `e0`, or zero while the previous output sits on either bound.
//! The stored output is always the clamped one, so state stays bounded without
//! a running integral sum. A non-finite error or increment never reaches the
//! stored output: the stage holds its previous output for that cycle.
//!
//! # Example
//! ```rust
//! use smps_core::utils::config::{PidConfig, SAMPLE_PERIOD_S};
//! use smps_core::utils::math::pid::PidController;
//! let mut voltage_loop = PidController::new(PidConfig::VOLTAGE, SAMPLE_PERIOD_S);
//! let current_demand = voltage_loop.step(3.3);
//! assert!(current_demand > 0.2 && current_demand < 0.21);
//! ```

use crate::utils::{config::PidConfig, math::limiter::clamp};

/// History of one PID stage.
///
/// `Default` is the power-on state: all zero and no cycle executed yet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    /// Output stored by the previous cycle (already clamped).
    pub u_prev: f32,
    /// Error of the previous cycle.
    pub e_prev: f32,
    /// Error of the cycle before that.
    pub e_prev2: f32,
    /// Set once a cycle has stored an output.
    primed: bool,
}

impl ControllerState {
    /// State as left behind by an earlier cycle.
    pub fn new(
        u_prev: f32,
        e_prev: f32,
        e_prev2: f32,
    ) -> Self {
        Self {
            u_prev,
            e_prev,
            e_prev2,
            primed: true,
        }
    }

    /// Whether any cycle has run since power-on or the last reset.
    pub fn is_primed(&self) -> bool {
        self.primed
    }
}

/// One stage of the cascade: gains, bounds, sample period and history.
#[derive(Debug, Clone, Copy)]
pub struct PidController {
    config: PidConfig,
    ts: f32,
    state: ControllerState,
}

impl PidController {
    /// Create a stage with zeroed history.
    pub fn new(
        config: PidConfig,
        ts: f32,
    ) -> Self {
        Self {
            config,
            ts,
            state: ControllerState::default(),
        }
    }

    /// Replace the stage history, e.g. to resume from a known operating point.
    pub fn with_state(
        mut self,
        state: ControllerState,
    ) -> Self {
        self.state = state;
        self
    }

    pub fn config(&self) -> &PidConfig {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn sample_period(&self) -> f32 {
        self.ts
    }

    /// Whether the previous cycle's output sits on (or past) a bound.
    ///
    /// Before the first cycle there is no previous output to be saturated.
    pub fn is_saturated(&self) -> bool {
        self.state.primed
            && (self.state.u_prev >= self.config.out_max || self.state.u_prev <= self.config.out_min)
    }

    /// Output increment for error `e0` given the current history. Pure.
    pub fn increment(
        &self,
        e0: f32,
    ) -> f32 {
        let PidConfig { kp, ki, kd, .. } = self.config;
        let ControllerState {
            e_prev: e1,
            e_prev2: e2,
            ..
        } = self.state;

        let e_integration = if self.is_saturated() { 0.0 } else { e0 };

        kp * (e0 - e1) + ki * self.ts * e_integration + kd / self.ts * (e0 - 2.0 * e1 + e2)
    }

    /// Advance the stage by one sample with error `e0`, returning the clamped output.
    pub fn step(
        &mut self,
        e0: f32,
    ) -> f32 {
        let e0 = finite_error(e0);
        let du = self.increment(e0);
        let unclamped = if du.is_finite() {
            self.state.u_prev + du
        } else {
            tracing::warn!(e0, du, "non-finite PID increment, holding output");
            self.state.u_prev
        };
        let u0 = clamp(unclamped, self.config.out_max, self.config.out_min);

        self.state = ControllerState {
            u_prev: u0,
            e_prev: e0,
            e_prev2: self.state.e_prev,
            primed: true,
        };
        u0
    }

    /// Return to the power-on state.
    pub fn reset(&mut self) {
        self.state = ControllerState::default();
    }
}

/// NaN carries no information and becomes zero; infinities saturate to the f32 range.
fn finite_error(e: f32) -> f32 {
    if e.is_nan() {
        0.0
    } else if e > f32::MAX {
        f32::MAX
    } else if e < f32::MIN {
        f32::MIN
    } else {
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::SAMPLE_PERIOD_S;

    fn approx(
        a: f32,
        b: f32,
        eps: f32,
    ) -> bool {
        let d = a - b;
        d < eps && d > -eps
    }

    #[test]
    fn test_first_step_integrates() {
        let mut v = PidController::new(PidConfig::VOLTAGE, SAMPLE_PERIOD_S);
        let u = v.step(3.3);
        // 0.05024·3.3 + 15.78·0.0008·3.3
        assert!(approx(u, 0.207_451_2, 1e-5), "u = {}", u);
        assert_eq!(v.state().u_prev, u);
        assert_eq!(v.state().e_prev, 3.3);
        assert_eq!(v.state().e_prev2, 0.0);
    }

    #[test]
    fn test_anti_windup_at_upper_bound_matches_zero_ki() {
        let state = ControllerState::new(4.0, 0.5, 0.25);
        let gated = PidController::new(PidConfig::VOLTAGE, SAMPLE_PERIOD_S).with_state(state);
        let no_ki = PidController::new(
            PidConfig {
                ki: 0.0,
                ..PidConfig::VOLTAGE
            },
            SAMPLE_PERIOD_S,
        )
        .with_state(state);

        for e in [-2.0, -0.1, 0.0, 0.7, 5.0] {
            assert_eq!(gated.increment(e), no_ki.increment(e));
            let (mut a, mut b) = (gated, no_ki);
            assert_eq!(a.step(e), b.step(e));
        }
    }

    #[test]
    fn test_anti_windup_at_lower_bound() {
        let state = ControllerState::new(0.0, 0.2, 0.2);
        let c = PidController::new(PidConfig::CURRENT, SAMPLE_PERIOD_S).with_state(state);
        assert!(c.is_saturated());
        // only the proportional change survives
        assert!(approx(c.increment(0.3), 0.02512 * 0.1, 1e-7));
    }

    #[test]
    fn test_inside_bounds_gate_is_open() {
        let c = PidController::new(PidConfig::CURRENT, SAMPLE_PERIOD_S)
            .with_state(ControllerState::new(0.5, 0.1, 0.1));
        assert!(!c.is_saturated());
        assert!(approx(c.increment(0.1), 39.4 * SAMPLE_PERIOD_S * 0.1, 1e-7));
    }

    #[test]
    fn test_history_converges_under_constant_error() {
        let mut c = PidController::new(
            PidConfig {
                kd: 0.0001,
                out_max: 1000.0,
                ..PidConfig::CURRENT
            },
            SAMPLE_PERIOD_S,
        );
        let e = 0.05;
        c.step(e);
        c.step(e);
        assert_eq!(c.state().e_prev, e);
        assert_eq!(c.state().e_prev2, e);

        let expected = 39.4 * SAMPLE_PERIOD_S * e;
        for _ in 0..5 {
            let before = c.state().u_prev;
            let du = c.increment(e);
            assert!(approx(du, expected, 1e-7), "du = {}", du);
            let after = c.step(e);
            assert!(approx(after - before, expected, 1e-6));
        }
    }

    #[test]
    fn test_stored_output_is_clamped() {
        let mut v = PidController::new(PidConfig::VOLTAGE, SAMPLE_PERIOD_S);
        let u = v.step(1000.0);
        assert_eq!(u, 4.0);
        assert_eq!(v.state().u_prev, 4.0);

        let u = v.step(-5000.0);
        assert_eq!(u, 0.0);
        assert_eq!(v.state().u_prev, 0.0);
    }

    #[test]
    fn test_huge_error_never_poisons_history() {
        let mut v = PidController::new(PidConfig::VOLTAGE, SAMPLE_PERIOD_S);
        for _ in 0..3 {
            let u = v.step(3.0e38);
            assert!(u.is_finite() && u >= 0.0 && u <= 4.0, "u = {}", u);
        }
        let u = v.step(3.3);
        assert!(u.is_finite() && u >= 0.0 && u <= 4.0, "u = {}", u);
        assert!(v.state().u_prev.is_finite());
        // history flushes after two ordinary samples
        v.step(3.3);
        v.step(3.3);
        assert!(v.increment(3.3).is_finite());
    }

    #[test]
    fn test_non_finite_error_stays_bounded() {
        let mut c = PidController::new(PidConfig::CURRENT, SAMPLE_PERIOD_S)
            .with_state(ControllerState::new(0.5, 0.1, 0.1));
        // NaN error counts as zero error
        assert!(approx(c.step(f32::NAN), 0.5 - 0.02512 * 0.1, 1e-6));
        assert!(c.state().e_prev.is_finite());
        assert!(c.step(f32::INFINITY).is_finite());
        assert!(c.step(f32::NEG_INFINITY).is_finite());
        assert!(c.state().u_prev >= 0.0 && c.state().u_prev <= 1.0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut v = PidController::new(PidConfig::VOLTAGE, SAMPLE_PERIOD_S);
        v.step(1.0);
        v.reset();
        assert_eq!(*v.state(), ControllerState::default());
        assert!(!v.state().is_primed());
    }
}
