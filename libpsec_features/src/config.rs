use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::*;
use super::error::ConfigError;
use super::event::VoltageUnit;

/// What to do with a data line that cannot be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MalformedPolicy {
    /// Stop reading the file and report the error
    #[default]
    Abort,
    /// Drop the event the line belongs to and keep reading. The bad line still
    /// counts toward the frame so that later events stay aligned.
    SkipEvent,
}

/// What to do with data lines left over after the last complete event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartialEventPolicy {
    /// Log a warning and drop them
    #[default]
    Discard,
    /// Report a TruncatedEvent error
    Error,
}

/// Layout of a PSEC4 log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFormat {
    pub samples_per_event: usize,
    pub n_channels: usize,
    pub time_step_ns: f64,
    pub unit: VoltageUnit,
    pub malformed_policy: MalformedPolicy,
    pub partial_policy: PartialEventPolicy,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self {
            samples_per_event: DEFAULT_SAMPLES_PER_EVENT,
            n_channels: DEFAULT_CHANNELS,
            time_step_ns: DEFAULT_TIME_STEP_NS,
            unit: VoltageUnit::Volts,
            malformed_policy: MalformedPolicy::Abort,
            partial_policy: PartialEventPolicy::Discard,
        }
    }
}

impl LogFormat {
    /// Sample spacing in seconds
    pub fn time_step_s(&self) -> f64 {
        self.time_step_ns * NS_TO_S
    }
}

/// How a channel's timing is extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimingMode {
    /// Fit two (or three) Gaussian lobes; the lobe separation gives the position
    #[default]
    DoubleGaussian,
    /// Leading edge relative to a laser trigger channel
    LaserReferenced,
    /// Only the leading edge and the integrated charge
    ChargeOnly,
}

/// Seed for the vertical offset of the Gaussian model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OffsetSeed {
    /// The model has no offset term
    #[default]
    None,
    /// Mean of another channel of the same event, assumed quiet
    QuietChannel(usize),
    /// Mean of a sample range [start, end) of the fitted waveform
    QuietRange { start: usize, end: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    pub lobes: usize,
    pub offset: OffsetSeed,
    pub initial_width_ns: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            lobes: 2,
            offset: OffsetSeed::None,
            initial_width_ns: DEFAULT_LOBE_WIDTH_NS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_FIT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserConfig {
    pub channel: usize,
    /// Trigger level in volts; laser pulses are negative going
    pub threshold_v: f64,
    pub window_start_ns: f64,
    pub window_end_ns: f64,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            channel: 4,
            threshold_v: -0.100,
            window_start_ns: 0.0,
            window_end_ns: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Distance from the strip centre to the readout ends, in m
    pub half_gap_distance: f64,
    /// Physical extent of the tile; positions outside [0, tile_length] are non-physical
    pub tile_length: f64,
    /// Full strip length used for apparent velocity estimates, in m
    pub strip_length: f64,
    /// Signal propagation velocity along the strip, in m/s
    pub signal_velocity: f64,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            half_gap_distance: DEFAULT_HALF_GAP_DISTANCE,
            tile_length: DEFAULT_TILE_LENGTH,
            strip_length: DEFAULT_STRIP_LENGTH,
            signal_velocity: DEFAULT_SIGNAL_VELOCITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeConfig {
    pub load_resistance: f64,
    /// Gains above this are flagged as implausible
    pub max_gain: f64,
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            load_resistance: DEFAULT_LOAD_RESISTANCE,
            max_gain: DEFAULT_MAX_GAIN,
        }
    }
}

/// Linear gain-vs-voltage relation measured for the MCP-PMT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainPrescription {
    pub slope: f64,
    pub intercept: f64,
    pub applied_voltage: f64,
}

impl GainPrescription {
    pub fn device_gain(&self) -> f64 {
        self.slope * self.applied_voltage + self.intercept
    }
}

/// Parameters of the feature extraction. Channel indices are 0-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub timing: TimingMode,
    pub channels: Vec<usize>,
    pub noise_channel: usize,
    pub sigma_multiplier: f64,
    pub fit: FitConfig,
    pub laser: LaserConfig,
    pub geometry: Geometry,
    pub charge: ChargeConfig,
    pub gain_prescription: Option<GainPrescription>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self::gain_map()
    }
}

impl AnalysisConfig {
    /// Two-ended strip readout: double Gaussian fit, noise on the last channel,
    /// offset seeded from channel 3
    pub fn gain_map() -> Self {
        Self {
            timing: TimingMode::DoubleGaussian,
            channels: vec![0],
            noise_channel: 5,
            sigma_multiplier: 3.5,
            fit: FitConfig {
                offset: OffsetSeed::QuietChannel(2),
                ..Default::default()
            },
            laser: LaserConfig::default(),
            geometry: Geometry::default(),
            charge: ChargeConfig::default(),
            gain_prescription: None,
        }
    }

    /// Laser on channel 5 triggers the event; transit times of the other channels
    pub fn laser_timing() -> Self {
        Self {
            timing: TimingMode::LaserReferenced,
            channels: vec![0, 1, 2, 3],
            noise_channel: 5,
            sigma_multiplier: 3.0,
            ..Self::gain_map()
        }
    }

    /// Lobe separation on every strip for signal velocity studies
    pub fn velocity_survey() -> Self {
        Self {
            timing: TimingMode::DoubleGaussian,
            channels: vec![0, 1, 2, 4, 5],
            noise_channel: 3,
            sigma_multiplier: 3.5,
            fit: FitConfig::default(),
            ..Self::gain_map()
        }
    }

    /// Dark noise charge with the noise channel on channel 4
    pub fn dark_count() -> Self {
        Self {
            timing: TimingMode::ChargeOnly,
            channels: vec![0, 1, 2, 4, 5],
            noise_channel: 3,
            sigma_multiplier: 3.0,
            fit: FitConfig::default(),
            ..Self::gain_map()
        }
    }

    /// Look up a named profile
    pub fn from_profile(name: &str) -> Option<Self> {
        match name {
            "gain_map" => Some(Self::gain_map()),
            "laser_timing" => Some(Self::laser_timing()),
            "velocity_survey" => Some(Self::velocity_survey()),
            "dark_count" => Some(Self::dark_count()),
            _ => None,
        }
    }
}

/// Structure representing the application configuration. Contains pathing and analysis information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub input_paths: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub n_threads: i32,
    pub format: LogFormat,
    pub analysis: AnalysisConfig,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            input_paths: vec![],
            output_path: PathBuf::from("None"),
            n_threads: 1,
            format: LogFormat::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parameters for consistency before any data is touched
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n_channels = self.format.n_channels;
        let analysis = &self.analysis;
        let check_channel = |ch: usize, what: &str| {
            if ch >= n_channels {
                Err(ConfigError::Invalid(format!(
                    "{what} channel {ch} is out of range for {n_channels} channels"
                )))
            } else {
                Ok(())
            }
        };

        if self.format.samples_per_event == 0 || n_channels == 0 {
            return Err(ConfigError::Invalid(String::from(
                "events must have at least one channel and one sample",
            )));
        }
        if self.format.time_step_ns <= 0.0 {
            return Err(ConfigError::Invalid(String::from(
                "time step must be positive",
            )));
        }
        if !self.is_n_threads_valid() {
            return Err(ConfigError::Invalid(String::from(
                "number of threads must be at least 1",
            )));
        }
        if analysis.channels.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "no channels selected for analysis",
            )));
        }
        for ch in analysis.channels.iter() {
            check_channel(*ch, "analysed")?;
        }
        check_channel(analysis.noise_channel, "noise")?;
        if analysis.timing == TimingMode::LaserReferenced {
            check_channel(analysis.laser.channel, "laser")?;
            if analysis.laser.window_end_ns <= analysis.laser.window_start_ns {
                return Err(ConfigError::Invalid(String::from(
                    "laser window end must come after its start",
                )));
            }
        }
        if let OffsetSeed::QuietChannel(ch) = analysis.fit.offset {
            check_channel(ch, "quiet")?;
        }
        if let OffsetSeed::QuietRange { start, end } = analysis.fit.offset {
            if start >= end || end > self.format.samples_per_event {
                return Err(ConfigError::Invalid(format!(
                    "quiet range {start}..{end} is not a valid sample range"
                )));
            }
        }
        if !(2..=3).contains(&analysis.fit.lobes) {
            return Err(ConfigError::Invalid(format!(
                "fit supports 2 or 3 lobes, not {}",
                analysis.fit.lobes
            )));
        }
        if analysis.sigma_multiplier < 0.0 {
            return Err(ConfigError::Invalid(String::from(
                "sigma multiplier must not be negative",
            )));
        }
        if analysis.geometry.signal_velocity <= 0.0 || analysis.charge.load_resistance <= 0.0 {
            return Err(ConfigError::Invalid(String::from(
                "signal velocity and load resistance must be positive",
            )));
        }
        let geometry = &analysis.geometry;
        if !(geometry.tile_length > 0.0
            && geometry.half_gap_distance > 0.0
            && geometry.strip_length > 0.0)
        {
            return Err(ConfigError::Invalid(String::from(
                "tile length, half gap distance and strip length must be positive",
            )));
        }
        if let Some(prescription) = &analysis.gain_prescription {
            let device_gain = prescription.device_gain();
            if device_gain == 0.0 || !device_gain.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "gain prescription gives a device gain of {device_gain} at {} V",
                    prescription.applied_voltage
                )));
            }
        }
        Ok(())
    }

    /// Template configuration for a named analysis profile. The dark count
    /// analysis works in millivolts, the others in volts.
    pub fn from_profile(name: &str) -> Option<Self> {
        let analysis = AnalysisConfig::from_profile(name)?;
        let mut format = LogFormat::default();
        if analysis.timing == TimingMode::ChargeOnly {
            format.unit = VoltageUnit::Millivolts;
        }
        Some(Self {
            format,
            analysis,
            ..Default::default()
        })
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    /// Get the path of the feature file for an input log and channel
    pub fn get_feature_file_name(&self, input_path: &Path, channel: usize) -> PathBuf {
        let stem = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("psec"));
        self.output_path
            .join(format!("{stem}_ch{}_gains.txt", channel + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Config::default();
        config.analysis = AnalysisConfig::laser_timing();
        config.input_paths.push(PathBuf::from("/data/run1.txt"));
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_profiles_validate() {
        for name in ["gain_map", "laser_timing", "velocity_survey", "dark_count"] {
            let config = Config {
                analysis: AnalysisConfig::from_profile(name).unwrap(),
                ..Default::default()
            };
            assert!(config.validate().is_ok(), "profile {name} failed");
        }
        assert!(AnalysisConfig::from_profile("nope").is_none());
    }

    #[test]
    fn test_invalid_channel() {
        let mut config = Config::default();
        config.analysis.noise_channel = 6;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.analysis.fit.lobes = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_geometry() {
        for length in [0.0, -0.01] {
            let mut config = Config::default();
            config.analysis.geometry.tile_length = length;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

            let mut config = Config::default();
            config.analysis.geometry.half_gap_distance = length;
            assert!(config.validate().is_err());

            let mut config = Config::default();
            config.analysis.geometry.strip_length = length;
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_zero_device_gain() {
        let mut config = Config::from_profile("dark_count").unwrap();
        // 1000 * 2500 - 2.5e6 = 0
        config.analysis.gain_prescription = Some(GainPrescription {
            slope: 1000.0,
            intercept: -2.5e6,
            applied_voltage: 2500.0,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.analysis.gain_prescription = Some(GainPrescription {
            slope: 15400.0,
            intercept: -34097909.0,
            applied_voltage: 2500.0,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_config() {
        let result = Config::read_config_file(Path::new("/definitely/not/here.yml"));
        assert!(matches!(result, Err(ConfigError::BadFilePath(_))));
    }

    #[test]
    fn test_feature_file_name() {
        let config = Config {
            output_path: PathBuf::from("/out"),
            ..Default::default()
        };
        let name = config.get_feature_file_name(Path::new("/data/Trial1.txt"), 0);
        assert_eq!(name, PathBuf::from("/out/Trial1_ch1_gains.txt"));
    }
}
