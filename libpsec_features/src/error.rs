use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error)]
pub enum LogLineError {
    #[error("expected at least {expected} fields but found {found}")]
    TooFewFields { expected: usize, found: usize },
    #[error("field {column} ({token:?}) is not a floating point number")]
    BadNumber { column: usize, token: String },
}

#[derive(Debug, Error)]
pub enum LogFileError {
    #[error("Could not open PSEC log because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Malformed data at line {line} of PSEC log: {reason}")]
    MalformedLine { line: usize, reason: LogLineError },
    #[error("PSEC log ended inside an event after {lines} data lines")]
    TruncatedEvent { lines: usize },
    #[error("PSEC log failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Error)]
pub enum FitError {
    #[error("Waveform has no sample below half maximum; no initial guess can be made")]
    NoPulse,
    #[error("Model needs at least two lobes to give a time difference, got {0}")]
    TooFewLobes(usize),
    #[error("Waveform and time axis have different lengths ({0} vs {1})")]
    LengthMismatch(usize, usize),
    #[error("Fit did not converge after {iterations} iterations (cost {cost:e})")]
    NonConvergence { iterations: usize, cost: f64 },
    #[error("Fit produced non-finite parameters")]
    NonFinite,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum FeatureWriterError {
    #[error("FeatureWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Feature file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Feature file line {line} is not a position, gain pair: {text:?}")]
    BadFormat { line: usize, text: String },
    #[error("Feature file contains an invalid number: {0}")]
    ParsingError(#[from] std::num::ParseFloatError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to LogFile error: {0}")]
    LogFileError(#[from] LogFileError),
    #[error("Processor failed due to FeatureWriter error: {0}")]
    WriterError(#[from] FeatureWriterError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
