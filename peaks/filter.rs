use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    #[error("filter width must be odd and positive, got {0}")]
    InvalidWidth(usize),
    #[error("norm order must be positive and finite, got {0}")]
    InvalidNormOrder(f64),
    #[error("value {value} at index {index} is negative; enable the absolute transform for signed input")]
    NegativeValue { index: usize, value: f64 },
}

/// p-norm moving average: `(sum over the window of v^p / k)^(1/p)`, zero-padded so the
/// output has the input's length.
///
/// With `absolute` set the values are replaced by their magnitudes first. A width of 1
/// returns the input unchanged.
pub fn moving_average_filter(
    weights: &[f64],
    width: usize,
    p: f64,
    absolute: bool,
) -> Result<Vec<f64>, FilterError> {
    if width == 0 || width % 2 == 0 {
        return Err(FilterError::InvalidWidth(width));
    }
    if !(p.is_finite() && p > 0.0) {
        return Err(FilterError::InvalidNormOrder(p));
    }
    if width == 1 {
        return Ok(weights.to_vec());
    }
    if !absolute {
        if let Some((index, &value)) = weights.iter().enumerate().find(|(_, v)| **v < 0.0) {
            return Err(FilterError::NegativeValue { index, value });
        }
    }

    let half = (width - 1) / 2;
    let n = weights.len();
    // cumsum[i] = sum of powered values over padded positions [0, i).
    let mut cumsum = Vec::with_capacity(n + 2 * half + 1);
    cumsum.push(0.0);
    let mut running = 0.0;
    let padded = std::iter::repeat_n(0.0, half)
        .chain(weights.iter().map(|w| w.abs()))
        .chain(std::iter::repeat_n(0.0, half));
    for value in padded {
        running += value.powf(p);
        cumsum.push(running);
    }

    let scale = (width as f64).powf(1.0 / p);
    Ok((0..n)
        .map(|i| {
            // Subtraction can drift slightly below zero.
            let window = (cumsum[i + width] - cumsum[i]).max(0.0);
            window.powf(1.0 / p) / scale
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(weights: &[f64], width: usize, p: f64) -> Vec<f64> {
        let half = (width - 1) / 2;
        (0..weights.len())
            .map(|i| {
                let sum: f64 = (0..width)
                    .filter_map(|k| (i + k).checked_sub(half))
                    .filter_map(|j| weights.get(j))
                    .map(|w| w.abs().powf(p))
                    .sum();
                (sum / width as f64).powf(1.0 / p)
            })
            .collect()
    }

    #[test]
    fn width_one_is_identity() {
        let weights = [0.3, -0.1, 2.0];
        assert_eq!(moving_average_filter(&weights, 1, 2.0, true).unwrap(), weights.to_vec());
    }

    #[test]
    fn matches_worked_example() {
        let weights = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = moving_average_filter(&weights, 3, 2.0, true).unwrap();
        assert_eq!(out.len(), 5);
        let expected = [
            (5.0f64 / 3.0).sqrt(),
            (14.0f64 / 3.0).sqrt(),
            (29.0f64 / 3.0).sqrt(),
            (50.0f64 / 3.0).sqrt(),
            (41.0f64 / 3.0).sqrt(),
        ];
        for (got, want) in out.iter().zip(expected) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn cumulative_sum_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(11);
        let weights: Vec<f64> = (0..200).map(|_| rng.gen_range(-1.0..1.0)).collect();
        for (width, p) in [(3, 2.0), (7, 1.0), (35, 2.0), (9, 3.5)] {
            let fast = moving_average_filter(&weights, width, p, true).unwrap();
            let slow = brute_force(&weights, width, p);
            assert_eq!(fast.len(), weights.len());
            for (a, b) in fast.iter().zip(&slow) {
                assert_relative_eq!(*a, *b, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn window_wider_than_input_still_has_input_length() {
        let out = moving_average_filter(&[1.0, 1.0], 5, 2.0, true).unwrap();
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out[0], (2.0f64 / 5.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        assert_eq!(
            moving_average_filter(&[1.0], 4, 2.0, true),
            Err(FilterError::InvalidWidth(4))
        );
        assert_eq!(
            moving_average_filter(&[1.0], 0, 2.0, true),
            Err(FilterError::InvalidWidth(0))
        );
        assert_eq!(
            moving_average_filter(&[1.0, 2.0], 3, 0.0, true),
            Err(FilterError::InvalidNormOrder(0.0))
        );
        assert_eq!(
            moving_average_filter(&[1.0, -2.0], 3, 2.0, false),
            Err(FilterError::NegativeValue { index: 1, value: -2.0 })
        );
    }
}
