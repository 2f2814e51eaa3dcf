use ndarray::{s, Array1, ArrayView1};

use super::charge::ChargeIntegrator;
use super::config::{AnalysisConfig, LogFormat, OffsetSeed, TimingMode};
use super::constants::NS_TO_S;
use super::event::SampleEvent;
use super::fit::{initial_guess, GaussianFitter};
use super::noise::NoiseStatistics;
use super::pulse::{AdaptiveDetector, TriggerDetector};

/// Why a record does (or does not) enter the aggregate statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureStatus {
    Accepted,
    /// Nothing crossed the noise threshold
    NoPulse,
    /// The Gaussian fit did not converge
    FitFailed,
    /// The channel fired before the laser trigger
    BeforeTrigger,
    /// Position outside the tile
    NonPhysical,
    /// Gain above the plausibility bound
    ImplausibleGain,
}

/// Features of one channel in one event. Times are in ns, position in m.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub event: usize,
    pub channel: usize,
    pub arrival_time: Option<f64>,
    pub time_difference: Option<f64>,
    pub gain: Option<f64>,
    pub position: Option<f64>,
    pub photoelectrons: Option<f64>,
    pub chi_square: Option<f64>,
    pub status: FeatureStatus,
}

impl FeatureRecord {
    fn empty(event: usize, channel: usize) -> Self {
        Self {
            event,
            channel,
            arrival_time: None,
            time_difference: None,
            gain: None,
            position: None,
            photoelectrons: None,
            chi_square: None,
            status: FeatureStatus::NoPulse,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == FeatureStatus::Accepted
    }

    /// Velocity implied by the lobe separation over the full strip, in m/s
    pub fn apparent_velocity(&self, strip_length: f64) -> Option<f64> {
        match self.time_difference {
            Some(dt) if dt > 0.0 => Some(strip_length / (dt * NS_TO_S)),
            _ => None,
        }
    }
}

/// Everything extracted from one event
#[derive(Debug, Clone, PartialEq)]
pub struct EventFeatures {
    pub event: usize,
    pub noise: NoiseStatistics,
    /// Laser leading edge; None in laser mode means the event was not triggered
    pub laser_time: Option<f64>,
    /// Integrated voltage summed over the analysed channels, in V s
    pub integrated_voltage: f64,
    /// Gain of the whole event, treating the summed charge as one photoelectron
    pub total_gain: f64,
    /// Photoelectrons in the whole event, if a gain prescription is configured
    pub total_photoelectrons: Option<f64>,
    pub records: Vec<FeatureRecord>,
}

/// Derive the hit position from the lobe separation (in ns)
pub fn position_from_time_difference(
    time_difference: f64,
    half_gap_distance: f64,
    signal_velocity: f64,
) -> f64 {
    half_gap_distance - 0.5 * time_difference * NS_TO_S * signal_velocity
}

/// Runs detection, fitting and integration over the channels of an event
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    analysis: AnalysisConfig,
    fitter: GaussianFitter,
    integrator: ChargeIntegrator,
    detector: AdaptiveDetector,
    trigger: TriggerDetector,
}

impl FeatureExtractor {
    pub fn new(format: &LogFormat, analysis: &AnalysisConfig) -> Self {
        let unit = format.unit;
        Self {
            analysis: analysis.clone(),
            fitter: GaussianFitter::new(&analysis.fit),
            integrator: ChargeIntegrator::new(format.time_step_s(), unit, &analysis.charge),
            detector: AdaptiveDetector::new(analysis.sigma_multiplier),
            trigger: TriggerDetector::new(
                unit.convert_volts(analysis.laser.threshold_v),
                analysis.laser.window_start_ns,
                analysis.laser.window_end_ns,
            ),
        }
    }

    /// True if the event was rejected for lacking a laser trigger
    pub fn is_untriggered(&self, features: &EventFeatures) -> bool {
        self.analysis.timing == TimingMode::LaserReferenced && features.laser_time.is_none()
    }

    /// Gains at or above `max_gain` are treated as pile-up or noise
    pub fn is_plausible_gain(&self, gain: f64) -> bool {
        gain < self.analysis.charge.max_gain
    }

    pub fn extract(&self, event: &SampleEvent) -> EventFeatures {
        let times = event.time_axis();
        let noise = event
            .channel(self.analysis.noise_channel)
            .map(NoiseStatistics::from_waveform)
            .unwrap_or_default();
        let mut features = EventFeatures {
            event: event.index(),
            noise,
            laser_time: None,
            integrated_voltage: 0.0,
            total_gain: 0.0,
            total_photoelectrons: None,
            records: Vec::with_capacity(self.analysis.channels.len()),
        };

        if self.analysis.timing == TimingMode::LaserReferenced {
            features.laser_time = event
                .channel(self.analysis.laser.channel)
                .and_then(|laser| self.trigger.detect(laser, times.view()));
            if features.laser_time.is_none() {
                return features;
            }
        }

        let threshold = self.detector.threshold(&noise);
        for channel in self.analysis.channels.iter() {
            let Some(waveform) = event.channel(*channel) else {
                continue;
            };
            let integrated = self.integrator.integrate(waveform, threshold);
            features.integrated_voltage += integrated;

            let mut record = FeatureRecord::empty(event.index(), *channel);
            let gain = self.integrator.gain(integrated);
            record.gain = Some(gain);
            record.photoelectrons = self
                .analysis
                .gain_prescription
                .as_ref()
                .map(|p| self.integrator.photoelectrons(integrated, p));
            record.arrival_time = self.detector.detect(waveform, times.view(), &noise);

            if record.arrival_time.is_some() {
                match self.analysis.timing {
                    TimingMode::DoubleGaussian => self.apply_fit(&mut record, event, waveform, &times),
                    TimingMode::LaserReferenced => {
                        self.apply_laser_reference(&mut record, features.laser_time)
                    }
                    TimingMode::ChargeOnly => record.status = FeatureStatus::Accepted,
                }
            }

            if record.is_accepted() && !self.is_plausible_gain(gain) {
                record.status = FeatureStatus::ImplausibleGain;
            }
            features.records.push(record);
        }

        features.total_gain = self.integrator.gain(features.integrated_voltage);
        features.total_photoelectrons = self
            .analysis
            .gain_prescription
            .as_ref()
            .map(|p| self.integrator.photoelectrons(features.integrated_voltage, p));
        features
    }

    fn offset_seed(&self, event: &SampleEvent, waveform: ArrayView1<'_, f64>) -> Option<f64> {
        match self.analysis.fit.offset {
            OffsetSeed::None => None,
            OffsetSeed::QuietChannel(ch) => event.channel(ch).and_then(|quiet| quiet.mean()),
            OffsetSeed::QuietRange { start, end } => {
                let end = end.min(waveform.len());
                if start >= end {
                    None
                } else {
                    waveform.slice(s![start..end]).mean()
                }
            }
        }
    }

    fn apply_fit(
        &self,
        record: &mut FeatureRecord,
        event: &SampleEvent,
        waveform: ArrayView1<'_, f64>,
        times: &Array1<f64>,
    ) {
        let fit = initial_guess(
            waveform,
            times.view(),
            self.analysis.fit.lobes,
            self.analysis.fit.initial_width_ns,
            self.offset_seed(event, waveform),
        )
        .and_then(|guess| self.fitter.fit(waveform, times.view(), guess));

        match fit {
            Ok(result) => {
                let geometry = &self.analysis.geometry;
                let time_difference = result.time_difference();
                let position = position_from_time_difference(
                    time_difference,
                    geometry.half_gap_distance,
                    geometry.signal_velocity,
                );
                record.arrival_time = Some(result.arrival_time());
                record.time_difference = Some(time_difference);
                record.position = Some(position);
                record.chi_square = result.chi_square;
                record.status = if (0.0..=geometry.tile_length).contains(&position) {
                    FeatureStatus::Accepted
                } else {
                    FeatureStatus::NonPhysical
                };
            }
            Err(e) => {
                log::debug!(
                    "Fit failed for event {} channel {}: {e}",
                    record.event,
                    record.channel + 1
                );
                record.arrival_time = None;
                record.status = FeatureStatus::FitFailed;
            }
        }
    }

    fn apply_laser_reference(&self, record: &mut FeatureRecord, laser_time: Option<f64>) {
        let (Some(arrival), Some(laser)) = (record.arrival_time, laser_time) else {
            return;
        };
        let transit = arrival - laser;
        if transit > 0.0 {
            record.time_difference = Some(transit);
            record.status = FeatureStatus::Accepted;
        } else {
            record.status = FeatureStatus::BeforeTrigger;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GainPrescription;
    use crate::event::VoltageUnit;
    use crate::fit::GaussianLobe;
    use ndarray::Array2;

    /// Laser on channel 5, pulse on channel 1, unit-sigma noise on channel 6 (in mV)
    fn laser_event() -> SampleEvent {
        let mut data = Array2::<f64>::zeros((6, 256));
        for i in 20..30 {
            data[[4, i]] = -150.0;
        }
        for i in 80..86 {
            data[[0, i]] = -20.0;
        }
        for i in 0..256 {
            data[[5, i]] = if i % 2 == 0 { 1.0 } else { -1.0 };
        }
        SampleEvent::new(0, VoltageUnit::Millivolts, 0.1, data)
    }

    fn millivolt_format() -> LogFormat {
        LogFormat {
            unit: VoltageUnit::Millivolts,
            ..Default::default()
        }
    }

    #[test]
    fn test_laser_referenced() {
        let extractor = FeatureExtractor::new(&millivolt_format(), &AnalysisConfig::laser_timing());
        let features = extractor.extract(&laser_event());
        assert!((features.laser_time.unwrap() - 2.0).abs() < 1e-9);
        assert!(!extractor.is_untriggered(&features));
        assert_eq!(features.records.len(), 4);

        let ch1 = &features.records[0];
        assert_eq!(ch1.status, FeatureStatus::Accepted);
        assert!((ch1.arrival_time.unwrap() - 8.0).abs() < 1e-9);
        assert!((ch1.time_difference.unwrap() - 6.0).abs() < 1e-9);
        // 6 samples of -20 mV over 100 ps into 50 Ohm
        assert!((ch1.gain.unwrap() - 1.5e6).abs() < 1.0);
        assert!(ch1.position.is_none());

        for quiet in features.records[1..].iter() {
            assert_eq!(quiet.status, FeatureStatus::NoPulse);
            assert!(quiet.arrival_time.is_none());
            assert_eq!(quiet.gain, Some(0.0));
        }
    }

    #[test]
    fn test_untriggered_event() {
        let mut event_data = laser_event().data().clone();
        event_data.row_mut(4).fill(0.0);
        let event = SampleEvent::new(3, VoltageUnit::Millivolts, 0.1, event_data);
        let extractor = FeatureExtractor::new(&millivolt_format(), &AnalysisConfig::laser_timing());
        let features = extractor.extract(&event);
        assert!(extractor.is_untriggered(&features));
        assert!(features.records.is_empty());
        assert_eq!(features.event, 3);
    }

    #[test]
    fn test_before_trigger() {
        let mut data = laser_event().data().clone();
        for i in 5..10 {
            data[[1, i]] = -20.0;
        }
        let event = SampleEvent::new(0, VoltageUnit::Millivolts, 0.1, data);
        let extractor = FeatureExtractor::new(&millivolt_format(), &AnalysisConfig::laser_timing());
        let features = extractor.extract(&event);
        assert_eq!(features.records[1].status, FeatureStatus::BeforeTrigger);
        assert!(features.records[1].time_difference.is_none());
    }

    fn strip_event(separation_ns: f64) -> SampleEvent {
        let times = crate::event::time_axis(256, 0.1);
        let first = GaussianLobe::new(-0.04, 8.0, 0.3);
        let second = GaussianLobe::new(-0.03, 8.0 + separation_ns, 0.3);
        let mut data = Array2::<f64>::zeros((6, 256));
        for (i, t) in times.iter().enumerate() {
            data[[0, i]] = first.value(*t) + second.value(*t);
            data[[5, i]] = if i % 2 == 0 { 0.001 } else { -0.001 };
        }
        SampleEvent::new(0, VoltageUnit::Volts, 0.1, data)
    }

    #[test]
    fn test_double_gaussian_position() {
        let extractor = FeatureExtractor::new(&LogFormat::default(), &AnalysisConfig::gain_map());
        let features = extractor.extract(&strip_event(1.5));
        let record = &features.records[0];
        assert_eq!(record.status, FeatureStatus::Accepted);
        assert!((record.time_difference.unwrap() - 1.5).abs() < 0.01);
        assert!((record.arrival_time.unwrap() - 8.0).abs() < 0.01);
        // 0.06 - 0.5 * 1.5e-9 * 6e7
        assert!((record.position.unwrap() - 0.015).abs() < 1e-3);
        assert!(record.gain.unwrap() > 0.0);
        let velocity = record.apparent_velocity(0.12).unwrap();
        assert!((velocity - 8.0e7).abs() < 1e6);
    }

    #[test]
    fn test_non_physical_position() {
        let extractor = FeatureExtractor::new(&LogFormat::default(), &AnalysisConfig::gain_map());
        // 0.06 - 0.5 * 2.5e-9 * 6e7 = -0.015
        let features = extractor.extract(&strip_event(2.5));
        let record = &features.records[0];
        assert_eq!(record.status, FeatureStatus::NonPhysical);
        assert!(record.position.unwrap() < 0.0);
    }

    #[test]
    fn test_fit_mode_no_pulse() {
        let data = Array2::<f64>::zeros((6, 256));
        let event = SampleEvent::new(0, VoltageUnit::Volts, 0.1, data);
        let extractor = FeatureExtractor::new(&LogFormat::default(), &AnalysisConfig::gain_map());
        let features = extractor.extract(&event);
        let record = &features.records[0];
        assert_eq!(record.status, FeatureStatus::NoPulse);
        assert!(record.time_difference.is_none());
        assert!(record.position.is_none());
    }

    #[test]
    fn test_implausible_gain() {
        let mut analysis = AnalysisConfig::laser_timing();
        analysis.charge.max_gain = 1.0e6;
        let extractor = FeatureExtractor::new(&millivolt_format(), &analysis);
        let features = extractor.extract(&laser_event());
        assert_eq!(features.records[0].status, FeatureStatus::ImplausibleGain);
    }

    #[test]
    fn test_dark_count_event_totals() {
        // Two channels with 6 samples of -20 mV each; noise channel 4 is quiet
        let mut data = Array2::<f64>::zeros((6, 256));
        for i in 80..86 {
            data[[0, i]] = -20.0;
            data[[4, i]] = -20.0;
        }
        for i in 0..256 {
            data[[3, i]] = if i % 2 == 0 { 1.0 } else { -1.0 };
        }
        let event = SampleEvent::new(0, VoltageUnit::Millivolts, 0.1, data);
        let mut analysis = AnalysisConfig::dark_count();
        analysis.gain_prescription = Some(GainPrescription {
            slope: 0.0,
            intercept: 1.0e6,
            applied_voltage: 2500.0,
        });
        let extractor = FeatureExtractor::new(&millivolt_format(), &analysis);
        let features = extractor.extract(&event);
        assert!((features.integrated_voltage + 2.4e-11).abs() < 1e-20);
        assert!((features.total_gain - 3.0e6).abs() < 1.0);
        assert!((features.total_photoelectrons.unwrap() - 3.0).abs() < 1e-6);
        assert_eq!(features.records[0].status, FeatureStatus::Accepted);
        assert!((features.records[0].photoelectrons.unwrap() - 1.5).abs() < 1e-6);

        let quiet = SampleEvent::new(1, VoltageUnit::Millivolts, 0.1, Array2::zeros((6, 256)));
        let features = extractor.extract(&quiet);
        assert_eq!(features.total_gain, 0.0);
        assert_eq!(features.total_photoelectrons, Some(0.0));
    }

    #[test]
    fn test_position_formula() {
        assert!((position_from_time_difference(0.0, 0.06, 6e7) - 0.06).abs() < 1e-15);
        assert!((position_from_time_difference(2.0, 0.06, 6e7) - 0.0).abs() < 1e-12);
    }
}
