use ndarray::ArrayView1;

use super::config::{ChargeConfig, GainPrescription};
use super::constants::ELEMENTARY_CHARGE;
use super::event::VoltageUnit;

/// Integrates the negative excursion of a waveform into collected charge.
///
/// The unit of the waveform is an explicit parameter; the integral is always
/// returned in volt-seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeIntegrator {
    pub time_step_s: f64,
    pub unit: VoltageUnit,
    pub load_resistance: f64,
}

impl ChargeIntegrator {
    pub fn new(time_step_s: f64, unit: VoltageUnit, config: &ChargeConfig) -> Self {
        Self {
            time_step_s,
            unit,
            load_resistance: config.load_resistance,
        }
    }

    /// Sum of every sample strictly below `threshold`, times the sample width, in V s.
    ///
    /// Zero when nothing crosses.
    pub fn integrate(&self, waveform: ArrayView1<'_, f64>, threshold: f64) -> f64 {
        let sum: f64 = waveform.iter().filter(|v| **v < threshold).sum();
        sum * self.time_step_s * self.unit.to_volts()
    }

    /// Gain assuming a single photoelectron: `integral / (-e * R)`
    pub fn gain(&self, integrated_voltage: f64) -> f64 {
        if integrated_voltage == 0.0 {
            return 0.0;
        }
        integrated_voltage / (-ELEMENTARY_CHARGE * self.load_resistance)
    }

    /// Number of photoelectrons given the device gain from a measured prescription
    pub fn photoelectrons(&self, integrated_voltage: f64, prescription: &GainPrescription) -> f64 {
        self.gain(integrated_voltage) / prescription.device_gain()
    }
}
