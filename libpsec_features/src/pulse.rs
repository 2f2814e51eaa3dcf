use ndarray::ArrayView1;

use super::noise::NoiseStatistics;

/// Index of the first sample strictly below `threshold`.
///
/// Pulses are negative going. `None` means the waveform never crosses; `Some(0)` is a
/// genuine crossing at the first sample.
pub fn first_crossing(waveform: ArrayView1<'_, f64>, threshold: f64) -> Option<usize> {
    waveform.iter().position(|v| *v < threshold)
}

/// Index of the last sample strictly below `threshold`
pub fn last_crossing(waveform: ArrayView1<'_, f64>, threshold: f64) -> Option<usize> {
    waveform.iter().rposition(|v| *v < threshold)
}

/// Fixed threshold leading edge detection, used for the laser reference channel.
///
/// Only the first crossing is considered. Its time must lie strictly inside
/// (window_start, window_end) or the event has no valid trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerDetector {
    pub threshold: f64,
    pub window_start: f64,
    pub window_end: f64,
}

impl TriggerDetector {
    pub fn new(threshold: f64, window_start: f64, window_end: f64) -> Self {
        Self {
            threshold,
            window_start,
            window_end,
        }
    }

    /// Timestamp of the leading edge, if it falls inside the window
    pub fn detect(&self, waveform: ArrayView1<'_, f64>, times: ArrayView1<'_, f64>) -> Option<f64> {
        let index = first_crossing(waveform, self.threshold)?;
        let time = *times.get(index)?;
        if time > self.window_start && time < self.window_end {
            Some(time)
        } else {
            None
        }
    }
}

/// Leading edge detection against a noise derived threshold `baseline - k * sigma`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveDetector {
    pub sigma_multiplier: f64,
}

impl AdaptiveDetector {
    pub fn new(sigma_multiplier: f64) -> Self {
        Self { sigma_multiplier }
    }

    pub fn threshold(&self, noise: &NoiseStatistics) -> f64 {
        noise.threshold(self.sigma_multiplier)
    }

    pub fn detect_index(
        &self,
        waveform: ArrayView1<'_, f64>,
        noise: &NoiseStatistics,
    ) -> Option<usize> {
        first_crossing(waveform, self.threshold(noise))
    }

    /// Timestamp of the first sample below the noise threshold
    pub fn detect(
        &self,
        waveform: ArrayView1<'_, f64>,
        times: ArrayView1<'_, f64>,
        noise: &NoiseStatistics,
    ) -> Option<f64> {
        let index = self.detect_index(waveform, noise)?;
        times.get(index).copied()
    }
}
