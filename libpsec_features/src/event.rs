use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use super::constants::MV_PER_V;

/// The unit that waveform samples are expressed in.
///
/// PSEC4 logs are always written in volts. A reader may rescale to millivolts at
/// ingestion; every event remembers which unit it carries so that thresholds and
/// integrals can be converted at the boundary rather than by convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VoltageUnit {
    #[default]
    Volts,
    Millivolts,
}

impl VoltageUnit {
    /// Factor which converts a value in volts to this unit
    pub fn from_volts(&self) -> f64 {
        match self {
            Self::Volts => 1.0,
            Self::Millivolts => MV_PER_V,
        }
    }

    /// Factor which converts a value in this unit back to volts
    pub fn to_volts(&self) -> f64 {
        1.0 / self.from_volts()
    }

    /// Express a voltage given in volts in this unit
    pub fn convert_volts(&self, volts: f64) -> f64 {
        volts * self.from_volts()
    }
}

/// Build the time axis of a single event: `t[i] = i * step` ns
pub fn time_axis(samples_per_event: usize, time_step_ns: f64) -> Array1<f64> {
    Array1::from_iter((0..samples_per_event).map(|i| i as f64 * time_step_ns))
}

/// Build a time axis spanning several concatenated events
pub fn global_time_axis(samples_per_event: usize, n_events: usize, time_step_ns: f64) -> Array1<f64> {
    time_axis(samples_per_event * n_events, time_step_ns)
}

/// One PSEC4 acquisition frame.
///
/// Data is stored as a `[channel, sample]` matrix. Events are immutable once built
/// by the log reader.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleEvent {
    index: usize,
    unit: VoltageUnit,
    time_step_ns: f64,
    data: Array2<f64>,
}

impl SampleEvent {
    pub fn new(index: usize, unit: VoltageUnit, time_step_ns: f64, data: Array2<f64>) -> Self {
        Self {
            index,
            unit,
            time_step_ns,
            data,
        }
    }

    /// Position of the event within its file, starting from 0
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn unit(&self) -> VoltageUnit {
        self.unit
    }

    pub fn time_step_ns(&self) -> f64 {
        self.time_step_ns
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// View a single channel waveform. Returns None for an invalid channel.
    pub fn channel(&self, channel: usize) -> Option<ArrayView1<'_, f64>> {
        if channel < self.n_channels() {
            Some(self.data.row(channel))
        } else {
            None
        }
    }

    /// The shared time axis of this event in ns
    pub fn time_axis(&self) -> Array1<f64> {
        time_axis(self.n_samples(), self.time_step_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_axis() {
        let t = time_axis(256, 0.1);
        assert_eq!(t.len(), 256);
        assert_eq!(t[0], 0.0);
        assert!((t[255] - 25.5).abs() < 1e-12);

        let global = global_time_axis(256, 3, 0.1);
        assert_eq!(global.len(), 768);
        assert!((global[767] - 76.7).abs() < 1e-9);
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(VoltageUnit::Volts.convert_volts(-0.1), -0.1);
        assert!((VoltageUnit::Millivolts.convert_volts(-0.1) + 100.0).abs() < 1e-12);
        assert!((VoltageUnit::Millivolts.to_volts() - 1.0e-3).abs() < 1e-18);
    }

    #[test]
    fn test_channel_view() {
        let data = Array2::from_shape_fn((6, 4), |(ch, i)| (ch * 10 + i) as f64);
        let event = SampleEvent::new(0, VoltageUnit::Volts, 0.1, data);
        let ch2 = event.channel(2).unwrap();
        assert_eq!(ch2.to_vec(), vec![20.0, 21.0, 22.0, 23.0]);
        assert!(event.channel(6).is_none());
        assert_eq!(event.time_axis().len(), event.n_samples());
    }
}
