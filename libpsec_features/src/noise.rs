use ndarray::ArrayView1;

/// Baseline and dispersion of a quiet reference channel.
///
/// Recomputed for every event; the noise floor of the PSEC4 drifts between frames.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NoiseStatistics {
    pub baseline: f64,
    pub dispersion: f64,
}

/// Single pass (Welford) mean and population standard deviation.
///
/// None for an empty input. A constant input yields a deviation of exactly 0.
pub fn mean_and_deviation<'a, I>(samples: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut count = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for value in samples {
        count += 1;
        let delta = value - mean;
        mean += delta / count as f64;
        m2 += delta * (value - mean);
    }
    if count == 0 {
        None
    } else {
        Some((mean, (m2 / count as f64).sqrt()))
    }
}

impl NoiseStatistics {
    /// Baseline and dispersion of all samples. An empty input yields zeros.
    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a f64>,
    {
        mean_and_deviation(samples)
            .map(|(baseline, dispersion)| Self {
                baseline,
                dispersion,
            })
            .unwrap_or_default()
    }

    pub fn from_waveform(waveform: ArrayView1<'_, f64>) -> Self {
        Self::from_samples(waveform.iter())
    }

    /// The lower detection threshold `baseline - k * dispersion`
    pub fn threshold(&self, sigma_multiplier: f64) -> f64 {
        self.baseline - sigma_multiplier * self.dispersion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;

    #[test]
    fn test_constant_channel() {
        let wave = Array1::from_elem(256, -0.0042);
        let noise = NoiseStatistics::from_waveform(wave.view());
        assert_eq!(noise.dispersion, 0.0);
        assert_eq!(noise.baseline, -0.0042);
        assert_eq!(noise.threshold(3.5), -0.0042);
    }

    #[test]
    fn test_alternating_channel() {
        let wave = Array1::from_iter((0..256).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }));
        let noise = NoiseStatistics::from_waveform(wave.view());
        assert!(noise.baseline.abs() < 1e-12);
        assert!((noise.dispersion - 1.0).abs() < 1e-12);
        assert!((noise.threshold(3.0) + 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_matches_two_pass() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let noise = NoiseStatistics::from_samples(values.iter());
        assert!((noise.baseline - 5.0).abs() < 1e-12);
        assert!((noise.dispersion - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty() {
        let noise = NoiseStatistics::from_samples(std::iter::empty());
        assert_eq!(noise, NoiseStatistics::default());
        assert!(mean_and_deviation(std::iter::empty()).is_none());
    }
}
