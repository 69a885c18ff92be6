//! Small shared helpers.

/// Converts a duration in seconds to a sample count at `sample_rate` Sa/s,
/// rounding to the nearest sample.
pub fn samps(seconds: f64, sample_rate: f64) -> usize {
    (seconds * sample_rate).round() as usize
}

/// Converts a sample count back to seconds.
pub fn seconds(n_samps: usize, sample_rate: f64) -> f64 {
    n_samps as f64 / sample_rate
}
