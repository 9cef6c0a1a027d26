//! Sigma schedule construction for the Mochi sampler
//!
//! Mochi drives its denoising loop with a linear-quadratic noise schedule:
//! a linear ramp up to `threshold_noise` for the first half of the steps,
//! then a quadratic segment that reaches 1.0 smoothly. The curve is built in
//! "progress" space and inverted at the end, so the returned sigmas run from
//! 1.0 (pure noise) down to 0.0 (clean).
//!
//! The schedule is consumed read-only by the external sampler; this module
//! only constructs it.

use candle_core::{Result, bail};

/// Threshold noise used by the Mochi sampler node.
pub const DEFAULT_THRESHOLD_NOISE: f64 = 0.025;

/// Build the linear-quadratic sigma schedule.
///
/// Returns `num_steps + 1` sigmas, monotonically non-increasing from 1.0 to
/// exactly 0.0.
///
/// # Arguments
/// * `num_steps` - Number of denoising steps (at least 2)
/// * `threshold_noise` - Noise level where the linear segment hands over to
///   the quadratic one, in (0, 1)
/// * `linear_steps` - Length of the linear segment; defaults to
///   `num_steps / 2`. Must leave at least one quadratic step.
pub fn linear_quadratic_schedule(
    num_steps: usize,
    threshold_noise: f64,
    linear_steps: Option<usize>,
) -> Result<Vec<f64>> {
    if num_steps < 2 {
        bail!("num_steps must be at least 2, got {num_steps}");
    }
    if !(0.0..1.0).contains(&threshold_noise) || threshold_noise == 0.0 {
        bail!("threshold_noise must be in (0, 1), got {threshold_noise}");
    }

    let linear_steps = linear_steps.unwrap_or(num_steps / 2);
    if linear_steps == 0 || linear_steps > num_steps {
        bail!("linear_steps must be in [1, num_steps], got {linear_steps}");
    }
    // An empty quadratic segment would divide by zero below.
    if linear_steps == num_steps {
        bail!("linear_steps must be smaller than num_steps ({num_steps}) to leave a quadratic segment");
    }

    let quadratic_steps = num_steps - linear_steps;

    let mut schedule: Vec<f64> = (0..linear_steps)
        .map(|i| i as f64 * threshold_noise / linear_steps as f64)
        .collect();

    // Quadratic coefficients chosen so the curve is continuous at the
    // handover and reaches 1.0 at step num_steps.
    let threshold_noise_step_diff = linear_steps as f64 - threshold_noise * num_steps as f64;
    let quadratic_coef =
        threshold_noise_step_diff / (linear_steps as f64 * (quadratic_steps as f64).powi(2));
    let linear_coef = threshold_noise / linear_steps as f64
        - 2.0 * threshold_noise_step_diff / (quadratic_steps as f64).powi(2);
    let const_term = quadratic_coef * (linear_steps as f64).powi(2);

    for i in linear_steps..num_steps {
        schedule.push(quadratic_coef * (i as f64).powi(2) + linear_coef * i as f64 + const_term);
    }
    schedule.push(1.0);

    // Invert: sigma_i = 1 - progress_i, so the schedule runs noise -> clean.
    Ok(schedule.into_iter().map(|x| 1.0 - x).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_endpoints() -> Result<()> {
        let schedule = linear_quadratic_schedule(50, DEFAULT_THRESHOLD_NOISE, None)?;

        assert_eq!(schedule.len(), 51);
        assert!((schedule[0] - 1.0).abs() < 1e-12, "first sigma should be 1.0");
        assert!(schedule[50].abs() < 1e-12, "last sigma should be 0.0");
        Ok(())
    }

    #[test]
    fn test_schedule_monotonic() -> Result<()> {
        for num_steps in [2usize, 3, 10, 50, 64] {
            let schedule = linear_quadratic_schedule(num_steps, DEFAULT_THRESHOLD_NOISE, None)?;
            assert_eq!(schedule.len(), num_steps + 1);
            for i in 1..schedule.len() {
                assert!(
                    schedule[i] <= schedule[i - 1] + 1e-12,
                    "sigma[{}]={} > sigma[{}]={} for num_steps={}",
                    i,
                    schedule[i],
                    i - 1,
                    schedule[i - 1],
                    num_steps
                );
            }
            for &s in schedule.iter() {
                assert!((0.0..=1.0).contains(&s), "sigma {} out of [0,1]", s);
            }
        }
        Ok(())
    }

    #[test]
    fn test_linear_segment_values() -> Result<()> {
        // With linear_steps = 4, the first four progress values are
        // i * threshold / 4, inverted.
        let schedule = linear_quadratic_schedule(8, 0.1, Some(4))?;
        for i in 0..4 {
            let expected = 1.0 - i as f64 * 0.1 / 4.0;
            assert!(
                (schedule[i] - expected).abs() < 1e-12,
                "sigma[{}]={}, expected {}",
                i,
                schedule[i],
                expected
            );
        }
        Ok(())
    }

    #[test]
    fn test_degenerate_parameters_rejected() {
        assert!(linear_quadratic_schedule(1, 0.025, None).is_err());
        assert!(linear_quadratic_schedule(0, 0.025, None).is_err());
        // Empty quadratic segment divides by zero.
        assert!(linear_quadratic_schedule(10, 0.025, Some(10)).is_err());
        assert!(linear_quadratic_schedule(10, 0.025, Some(11)).is_err());
        assert!(linear_quadratic_schedule(10, 0.025, Some(0)).is_err());
        assert!(linear_quadratic_schedule(10, 0.0, None).is_err());
        assert!(linear_quadratic_schedule(10, 1.0, None).is_err());
    }

    #[test]
    fn test_explicit_linear_steps_matches_default() -> Result<()> {
        let a = linear_quadratic_schedule(50, 0.025, None)?;
        let b = linear_quadratic_schedule(50, 0.025, Some(25))?;
        assert_eq!(a, b);
        Ok(())
    }
}
