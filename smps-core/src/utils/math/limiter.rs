//! Saturation primitive used by every stage of the cascade.

/// Restrict `value` to the closed interval `[lower, upper]`.
///
/// Values above `upper` become `upper`, values below `lower` become `lower`,
/// NaN becomes `lower`, everything else passes through untouched. The caller
/// must use the returned value; nothing is clamped in place.
///
/// # Example
/// ```rust
/// use smps_core::utils::math::limiter::clamp;
/// assert_eq!(clamp(5.0, 4.0, 0.0), 4.0);
/// assert_eq!(clamp(-1.0, 4.0, 0.0), 0.0);
/// assert_eq!(clamp(2.0, 4.0, 0.0), 2.0);
/// ```
#[must_use]
#[inline]
pub fn clamp(
    value: f32,
    upper: f32,
    lower: f32,
) -> f32 {
    if value > upper {
        upper
    } else if value >= lower {
        value
    } else {
        // below range, or NaN
        lower
    }
}
