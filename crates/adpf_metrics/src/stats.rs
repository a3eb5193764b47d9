//! Order statistics and dispersion over raw nanosecond samples

use std::fmt::Display;

/// Upper median: the element at `len / 2` after sorting. Empty input gives 0.
pub fn median(values: &[i64]) -> i64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

pub fn sum(values: &[i64]) -> f64 {
    values.iter().map(|&v| v as f64).sum()
}

pub fn mean(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    sum(values) / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator). Fewer than two samples give 0.
pub fn sample_deviation(values: &[i64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let variance_sum: f64 = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum();
    (variance_sum / (values.len() - 1) as f64).sqrt()
}

/// Comma-separated list, the format the result map carries sequences in.
pub fn serialize_values<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_takes_upper_middle() {
        assert_eq!(median(&[5, 1, 3]), 3);
        assert_eq!(median(&[4, 1, 3, 2]), 3);
        assert_eq!(median(&[]), 0);
    }

    #[test]
    fn deviation_uses_sample_denominator() {
        // mean 5, squared deviations sum to 32, 32 / 7
        let values = [2, 4, 4, 4, 5, 5, 7, 9];
        let expected = (32.0f64 / 7.0).sqrt();
        assert!((sample_deviation(&values) - expected).abs() < 1e-12);
        assert_eq!(sample_deviation(&[42]), 0.0);
    }

    #[test]
    fn serializes_without_trailing_comma() {
        assert_eq!(serialize_values(&[1, 2, 3]), "1,2,3");
        assert_eq!(serialize_values::<i64>(&[]), "");
    }
}
