//! Small descriptive statistics used by photometry and cube collapsing.

use thiserror::Error;

/// Errors from descriptive statistics.
#[derive(Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("cannot compute statistics of an empty sample")]
    Empty,
    #[error("need more than {ddof} samples for ddof={ddof}, got {len}")]
    InsufficientSamples { len: usize, ddof: usize },
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Result<f64, StatsError> {
    if values.is_empty() {
        return Err(StatsError::Empty);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of a sample. Even-sized samples average the two middle values.
///
/// NaN values sort last and are not filtered out.
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    if values.is_empty() {
        return Err(StatsError::Empty);
    }
    let mut sorted = values.to_vec();
    Ok(median_in_place(&mut sorted))
}

/// Median that reorders `values` instead of allocating.
///
/// Callers must guarantee a non-empty slice.
pub(crate) fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    let mid = n / 2;
    let (_, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        // Largest element of the lower half
        let lower = values[..mid]
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        0.5 * (lower + upper)
    }
}

/// Standard deviation with `ddof` delta degrees of freedom (1 for the sample estimator).
pub fn std_dev(values: &[f64], ddof: usize) -> Result<f64, StatsError> {
    if values.is_empty() {
        return Err(StatsError::Empty);
    }
    if values.len() <= ddof {
        return Err(StatsError::InsufficientSamples {
            len: values.len(),
            ddof,
        });
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Ok((ss / (values.len() - ddof) as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_and_median() {
        let values = [3.0, 1.0, 4.0, 1.0, 5.0];
        assert_relative_eq!(mean(&values).unwrap(), 2.8);
        assert_eq!(median(&values).unwrap(), 3.0);
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]).unwrap(), 2.5);
        assert_eq!(median(&[7.0, 7.0]).unwrap(), 7.0);
    }

    #[test]
    fn test_std_dev_sample_estimator() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(std_dev(&values, 0).unwrap(), 2.0);
        assert_relative_eq!(
            std_dev(&values, 1).unwrap(),
            (32.0_f64 / 7.0).sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_empty_and_short_samples() {
        assert_eq!(mean(&[]), Err(StatsError::Empty));
        assert_eq!(median(&[]), Err(StatsError::Empty));
        assert_eq!(
            std_dev(&[1.0], 1),
            Err(StatsError::InsufficientSamples { len: 1, ddof: 1 })
        );
    }
}
