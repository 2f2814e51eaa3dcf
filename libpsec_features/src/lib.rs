//! # psec_features
//!
//! psec_features extracts timing, position and gain features from the waveforms recorded
//! by a PSEC4 digitizer reading out an LAPPD (MCP-PMT) test stand. It takes the plain
//! text logfiles written by the acquisition, splits them into 256 sample, 6 channel
//! events, and for every analysed channel derives
//!
//! - the arrival time of the pulse (adaptive noise threshold, laser reference, or the
//! centres of a double Gaussian fit to the two reflections on a strip),
//! - the hit position along the strip from the separation of the two lobes,
//! - the integrated charge and the corresponding gain.
//!
//! Accepted (position, gain) pairs are written to feature files used by the gain mapping
//! tools, and a summary of the run is logged at the end.
//!
//! ## Building & Install
//!
//! To build and install the CLI use `cargo install --path ./psec_features_cli` from the top
//! level repository. See the `psec_features_cli` crate for usage.
//!
//! ## Configuration
//!
//! All analysis settings live in a single YAML configuration. A template can be generated
//! with `psec_features_cli new`, optionally for a named profile (`gain_map`,
//! `laser_timing`, `velocity_survey`, `dark_count`). The format is as follows:
//!
//! ```yml
//! input_paths:
//! - /data/psec/run_001.txt
//! output_path: /data/psec/features
//! n_threads: 1
//! format:
//!   samples_per_event: 256
//!   n_channels: 6
//!   time_step_ns: 0.1
//!   unit: Volts
//!   malformed_policy: Abort
//!   partial_policy: Discard
//! analysis:
//!   timing: DoubleGaussian
//!   channels:
//!   - 0
//!   noise_channel: 5
//!   sigma_multiplier: 3.5
//!   fit:
//!     lobes: 2
//!     offset: !QuietChannel 2
//!     initial_width_ns: 0.1
//!     max_iterations: 1000
//!     tolerance: 1.49012e-8
//!   laser:
//!     channel: 4
//!     threshold_v: -0.1
//!     window_start_ns: 0.0
//!     window_end_ns: 5.0
//!   geometry:
//!     half_gap_distance: 0.06
//!     tile_length: 0.058
//!     strip_length: 0.12
//!     signal_velocity: 60000000.0
//!   charge:
//!     load_resistance: 50.0
//!     max_gain: 20000000.0
//!   gain_prescription: null
//! ```
//!
//! Channel indices are 0-based (channel 1 of the board is index 0). Voltage parameters
//! are always given in volts; `format.unit` only declares how the waveforms are scaled
//! once read.
//!
//! ## Log Format
//!
//! Lines starting with `#` are comments. Every other line holds one sample of every
//! channel as whitespace separated numbers (extra trailing columns are ignored). Every
//! `samples_per_event` data lines make up one event. Data left after the last complete
//! event is discarded with a warning, or reported as an error if `partial_policy` is
//! `Error`.
//!
//! ## Output
//!
//! In `DoubleGaussian` mode every input log produces one feature file per analysed
//! channel, `<output_path>/<log name>_ch<N>_gains.txt`, with one `position, gain` line per
//! accepted event and no header. Positions are in metres. Records with a position outside
//! the tile or an implausible gain are counted but not written.
//!
//! The run summary also reports the per-event gain and photoelectron count in
//! `ChargeOnly` mode, and the per-file maximum apparent velocity in `DoubleGaussian` mode.
pub mod charge;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod feature_writer;
pub mod features;
pub mod fit;
pub mod log_file;
pub mod noise;
pub mod process;
pub mod pulse;
pub mod summary;
pub mod worker_status;
