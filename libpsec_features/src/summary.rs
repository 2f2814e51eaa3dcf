use std::fmt::Display;

use super::config::{AnalysisConfig, TimingMode};
use super::constants::SPEED_OF_LIGHT;
use super::features::{EventFeatures, FeatureStatus};
use super::noise::mean_and_deviation;

/// Counts and accepted values accumulated over a run.
///
/// Summaries of separate files or workers are combined with [`RunSummary::merge`].
/// Apparent velocities are reduced to one maximum per file; call
/// [`RunSummary::finish_file`] when a file is done.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub files_processed: usize,
    pub files_failed: usize,
    pub events_read: usize,
    pub events_skipped: usize,
    pub events_untriggered: usize,
    pub events_triggered: usize,
    pub events_coincident: usize,
    /// Charge only events whose total gain is at or above the plausibility bound
    pub events_implausible_gain: usize,
    pub records: usize,
    pub accepted: usize,
    pub no_pulse: usize,
    pub fits_failed: usize,
    pub before_trigger: usize,
    pub non_physical: usize,
    pub implausible_gain: usize,
    pub cancelled: bool,
    gains: Vec<f64>,
    positions: Vec<f64>,
    integrated_voltages: Vec<f64>,
    event_gains: Vec<f64>,
    event_photoelectrons: Vec<f64>,
    file_max_velocity: Option<f64>,
    max_velocities: Vec<f64>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one extracted event
    pub fn add_event(&mut self, features: &EventFeatures, analysis: &AnalysisConfig) {
        let timing = analysis.timing;
        self.events_read += 1;
        if timing == TimingMode::LaserReferenced && features.laser_time.is_none() {
            self.events_untriggered += 1;
            return;
        }
        if timing == TimingMode::LaserReferenced {
            self.events_triggered += 1;
        }
        if timing == TimingMode::ChargeOnly {
            self.integrated_voltages.push(features.integrated_voltage);
            if features.total_gain < analysis.charge.max_gain {
                self.event_gains.push(features.total_gain);
                if let Some(pe) = features.total_photoelectrons {
                    self.event_photoelectrons.push(pe);
                }
            } else {
                self.events_implausible_gain += 1;
            }
        }

        let mut any_accepted = false;
        for record in features.records.iter() {
            self.records += 1;
            // Every converged fit gives a velocity, whatever the position cut says
            if timing == TimingMode::DoubleGaussian {
                if let Some(v) = record.apparent_velocity(analysis.geometry.strip_length) {
                    self.add_velocity(v);
                }
            }
            match record.status {
                FeatureStatus::Accepted => {
                    any_accepted = true;
                    self.accepted += 1;
                    if let Some(gain) = record.gain {
                        self.gains.push(gain);
                    }
                    if let Some(position) = record.position {
                        self.positions.push(position);
                    }
                }
                FeatureStatus::NoPulse => self.no_pulse += 1,
                FeatureStatus::FitFailed => self.fits_failed += 1,
                FeatureStatus::BeforeTrigger => self.before_trigger += 1,
                FeatureStatus::NonPhysical => self.non_physical += 1,
                FeatureStatus::ImplausibleGain => self.implausible_gain += 1,
            }
        }
        if timing == TimingMode::LaserReferenced && any_accepted {
            self.events_coincident += 1;
        }
    }

    fn add_velocity(&mut self, velocity: f64) {
        if velocity >= SPEED_OF_LIGHT {
            return;
        }
        self.file_max_velocity = Some(self.file_max_velocity.map_or(velocity, |v| v.max(velocity)));
    }

    /// Close the velocity bookkeeping of the current file
    pub fn finish_file(&mut self) {
        if let Some(v) = self.file_max_velocity.take() {
            self.max_velocities.push(v);
        }
    }

    pub fn merge(&mut self, mut other: RunSummary) {
        other.finish_file();
        self.files_processed += other.files_processed;
        self.files_failed += other.files_failed;
        self.events_read += other.events_read;
        self.events_skipped += other.events_skipped;
        self.events_untriggered += other.events_untriggered;
        self.events_triggered += other.events_triggered;
        self.events_coincident += other.events_coincident;
        self.events_implausible_gain += other.events_implausible_gain;
        self.records += other.records;
        self.accepted += other.accepted;
        self.no_pulse += other.no_pulse;
        self.fits_failed += other.fits_failed;
        self.before_trigger += other.before_trigger;
        self.non_physical += other.non_physical;
        self.implausible_gain += other.implausible_gain;
        self.cancelled |= other.cancelled;
        self.gains.extend(other.gains);
        self.positions.extend(other.positions);
        self.integrated_voltages.extend(other.integrated_voltages);
        self.event_gains.extend(other.event_gains);
        self.event_photoelectrons.extend(other.event_photoelectrons);
        self.max_velocities.extend(other.max_velocities);
    }

    /// Mean and standard deviation of the accepted gains
    pub fn gain_statistics(&self) -> Option<(f64, f64)> {
        mean_and_deviation(self.gains.iter())
    }

    /// Mean and standard deviation of the accepted positions, in m
    pub fn position_statistics(&self) -> Option<(f64, f64)> {
        mean_and_deviation(self.positions.iter())
    }

    /// Mean and standard deviation of the per-event integrated voltage (charge only mode)
    pub fn integrated_voltage_statistics(&self) -> Option<(f64, f64)> {
        mean_and_deviation(self.integrated_voltages.iter())
    }

    /// Mean and standard deviation of the per-event total gain below the plausibility bound
    pub fn event_gain_statistics(&self) -> Option<(f64, f64)> {
        mean_and_deviation(self.event_gains.iter())
    }

    /// Mean and standard deviation of the per-event photoelectron count
    pub fn photoelectron_statistics(&self) -> Option<(f64, f64)> {
        mean_and_deviation(self.event_photoelectrons.iter())
    }

    /// Fraction of triggered events with at least one accepted channel
    pub fn detection_efficiency(&self) -> Option<f64> {
        if self.events_triggered == 0 {
            return None;
        }
        Some(self.events_coincident as f64 / self.events_triggered as f64)
    }

    /// Maximum apparent velocity of every file seen so far, including an unfinished one
    pub fn file_max_velocities(&self) -> Vec<f64> {
        self.max_velocities
            .iter()
            .chain(self.file_max_velocity.iter())
            .copied()
            .collect()
    }

    /// Largest apparent velocity below c over the run, in m/s
    pub fn max_velocity(&self) -> Option<f64> {
        self.file_max_velocities().into_iter().reduce(f64::max)
    }

    /// Mean, standard deviation and standard error of the per-file maximum velocities
    pub fn velocity_statistics(&self) -> Option<(f64, f64, f64)> {
        let maxima = self.file_max_velocities();
        let (mean, std) = mean_and_deviation(maxima.iter())?;
        Some((mean, std, std / (maxima.len() as f64).sqrt()))
    }

    /// Number of records and events flagged as outside physical bounds
    pub fn anomalies(&self) -> usize {
        self.non_physical + self.implausible_gain + self.events_implausible_gain
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Files: {} processed, {} failed{}",
            self.files_processed,
            self.files_failed,
            if self.cancelled { " (cancelled)" } else { "" }
        )?;
        writeln!(
            f,
            "Events: {} read, {} skipped as malformed, {} without laser trigger",
            self.events_read, self.events_skipped, self.events_untriggered
        )?;
        write!(
            f,
            "Channels: {} analysed, {} accepted, {} without pulse, {} failed fits, {} before trigger, {} non-physical, {} implausible gain",
            self.records,
            self.accepted,
            self.no_pulse,
            self.fits_failed,
            self.before_trigger,
            self.non_physical,
            self.implausible_gain
        )?;
        if let Some((mean, std)) = self.gain_statistics() {
            write!(f, "\nGain: {mean:.4e} +/- {std:.4e}")?;
        }
        if let Some((mean, std)) = self.position_statistics() {
            write!(f, "\nPosition: {:.2} +/- {:.2} cm", mean * 100.0, std * 100.0)?;
        }
        if let Some((mean, std)) = self.integrated_voltage_statistics() {
            write!(f, "\nIntegrated voltage per event: {mean:.2e} +/- {std:.2e} Vs")?;
        }
        if let Some((mean, std)) = self.event_gain_statistics() {
            write!(
                f,
                "\nGain per event: {mean:.4e} +/- {std:.4e} ({} events above the gain bound)",
                self.events_implausible_gain
            )?;
        }
        if let Some((mean, std)) = self.photoelectron_statistics() {
            write!(f, "\nPhotoelectrons per event: {mean:.3} +/- {std:.3}")?;
        }
        if let Some(efficiency) = self.detection_efficiency() {
            write!(f, "\nDetection efficiency: {:.2}%", efficiency * 100.0)?;
        }
        if let Some(v) = self.max_velocity() {
            write!(f, "\nMaximum signal velocity: {v:.3e} m/s")?;
        }
        if let Some((mean, std, error)) = self.velocity_statistics() {
            write!(
                f,
                "\nPer-file maximum velocity: {mean:.3e} +/- {std:.3e} m/s (standard error {error:.3e})"
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureRecord;
    use crate::noise::NoiseStatistics;

    fn record(status: FeatureStatus, gain: f64, position: Option<f64>, dt: Option<f64>) -> FeatureRecord {
        FeatureRecord {
            event: 0,
            channel: 0,
            arrival_time: Some(8.0),
            time_difference: dt,
            gain: Some(gain),
            position,
            photoelectrons: None,
            chi_square: None,
            status,
        }
    }

    fn features(laser_time: Option<f64>, records: Vec<FeatureRecord>) -> EventFeatures {
        EventFeatures {
            event: 0,
            noise: NoiseStatistics::default(),
            laser_time,
            integrated_voltage: 0.0,
            total_gain: 0.0,
            total_photoelectrons: None,
            records,
        }
    }

    fn dark_event(total_gain: f64) -> EventFeatures {
        EventFeatures {
            integrated_voltage: total_gain * -8.0e-18,
            total_gain,
            total_photoelectrons: Some(total_gain / 4.0e6),
            ..features(None, vec![])
        }
    }

    #[test]
    fn test_non_physical_excluded() {
        let mut summary = RunSummary::new();
        let event = features(
            None,
            vec![
                record(FeatureStatus::Accepted, 2.0e6, Some(0.02), Some(1.3)),
                record(FeatureStatus::Accepted, 4.0e6, Some(0.04), Some(1.5)),
                record(FeatureStatus::NonPhysical, 9.0e6, Some(-0.01), Some(2.3)),
            ],
        );
        summary.add_event(&event, &AnalysisConfig::gain_map());
        assert_eq!(summary.records, 3);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.anomalies(), 1);
        let (mean, std) = summary.gain_statistics().unwrap();
        assert!((mean - 3.0e6).abs() < 1e-6);
        assert!((std - 1.0e6).abs() < 1e-6);
        let (pos, _) = summary.position_statistics().unwrap();
        assert!((pos - 0.03).abs() < 1e-12);
    }

    #[test]
    fn test_velocity_from_every_fit() {
        let mut summary = RunSummary::new();
        // 0.12 m / 3 ns = 4e7 m/s, outside the tile at 6e7 m/s
        let slow = features(None, vec![record(FeatureStatus::NonPhysical, 1.0e6, Some(-0.03), Some(3.0))]);
        summary.add_event(&slow, &AnalysisConfig::velocity_survey());
        assert!((summary.max_velocity().unwrap() - 4.0e7).abs() < 1.0);

        // 0.12 m / 0.3 ns = 4e8 m/s is above c and ignored
        let fast = features(None, vec![record(FeatureStatus::Accepted, 1.0e6, Some(0.05), Some(0.3))]);
        summary.add_event(&fast, &AnalysisConfig::velocity_survey());
        assert!((summary.max_velocity().unwrap() - 4.0e7).abs() < 1.0);

        // No velocities outside fit mode
        let mut laser = RunSummary::new();
        laser.add_event(
            &features(Some(2.0), vec![record(FeatureStatus::Accepted, 1.0e6, None, Some(6.0))]),
            &AnalysisConfig::laser_timing(),
        );
        assert!(laser.max_velocity().is_none());
    }

    #[test]
    fn test_per_file_velocity_statistics() {
        let analysis = AnalysisConfig::velocity_survey();
        let mut run = RunSummary::new();
        // Per-file maxima 1.2e8 (1 ns) and 0.6e8 (2 ns)
        for dts in [[1.0, 1.5], [2.0, 4.0]] {
            let mut file = RunSummary::new();
            for dt in dts {
                file.add_event(
                    &features(None, vec![record(FeatureStatus::Accepted, 1.0e6, None, Some(dt))]),
                    &analysis,
                );
            }
            run.merge(file);
        }
        assert_eq!(run.file_max_velocities().len(), 2);
        let (mean, std, error) = run.velocity_statistics().unwrap();
        assert!((mean - 9.0e7).abs() < 1.0);
        assert!((std - 3.0e7).abs() < 1.0);
        assert!((error - 3.0e7 / 2.0_f64.sqrt()).abs() < 1.0);
        assert!((run.max_velocity().unwrap() - 1.2e8).abs() < 1.0);
    }

    #[test]
    fn test_dark_count_gain_cut() {
        let mut analysis = AnalysisConfig::dark_count();
        analysis.charge.max_gain = 2.0e7;
        let mut summary = RunSummary::new();
        for gain in [2.0e6, 6.0e6, 2.0e7, 5.0e7] {
            summary.add_event(&dark_event(gain), &analysis);
        }
        assert_eq!(summary.events_read, 4);
        assert_eq!(summary.events_implausible_gain, 2);
        assert_eq!(summary.anomalies(), 2);
        let (mean, std) = summary.event_gain_statistics().unwrap();
        assert!((mean - 4.0e6).abs() < 1e-3);
        assert!((std - 2.0e6).abs() < 1e-3);
        let (pe, _) = summary.photoelectron_statistics().unwrap();
        assert!((pe - 1.0).abs() < 1e-9);
        // The integrated voltage keeps every event
        assert_eq!(summary.integrated_voltages.len(), 4);
        assert!(summary.to_string().contains("2 events above the gain bound"));
    }

    #[test]
    fn test_laser_efficiency() {
        let analysis = AnalysisConfig::laser_timing();
        let mut summary = RunSummary::new();
        let hit = features(
            Some(2.0),
            vec![record(FeatureStatus::Accepted, 1.0e6, None, Some(6.0))],
        );
        let miss = features(Some(2.0), vec![record(FeatureStatus::NoPulse, 0.0, None, None)]);
        let untriggered = features(None, vec![]);
        summary.add_event(&hit, &analysis);
        summary.add_event(&miss, &analysis);
        summary.add_event(&untriggered, &analysis);
        assert_eq!(summary.events_read, 3);
        assert_eq!(summary.events_untriggered, 1);
        assert_eq!(summary.events_triggered, 2);
        assert_eq!(summary.events_coincident, 1);
        assert!((summary.detection_efficiency().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_merge() {
        let analysis = AnalysisConfig::gain_map();
        let mut a = RunSummary::new();
        a.files_processed = 1;
        a.add_event(
            &features(None, vec![record(FeatureStatus::Accepted, 1.0e6, Some(0.01), Some(0.5))]),
            &analysis,
        );
        let mut b = RunSummary::new();
        b.files_failed = 1;
        b.add_event(
            &features(None, vec![record(FeatureStatus::FitFailed, 0.0, None, None)]),
            &analysis,
        );
        a.merge(b);
        assert_eq!(a.files_processed, 1);
        assert_eq!(a.files_failed, 1);
        assert_eq!(a.events_read, 2);
        assert_eq!(a.fits_failed, 1);
        assert_eq!(a.gain_statistics().unwrap().0, 1.0e6);
        // 0.12 / 0.5 ns = 2.4e8
        assert!((a.max_velocity().unwrap() - 2.4e8).abs() < 1.0);
        let text = a.to_string();
        assert!(text.contains("1 failed fits"));
    }
}
