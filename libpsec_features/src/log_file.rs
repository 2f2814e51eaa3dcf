use ndarray::Array2;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::config::{LogFormat, MalformedPolicy, PartialEventPolicy};
use super::constants::COMMENT_MARKER;
use super::error::{LogFileError, LogLineError};
use super::event::SampleEvent;

/// Parse one data line into per-channel voltages (in volts).
///
/// Only the first `n_channels` fields are read; extra trailing columns are ignored.
pub fn parse_data_line(line: &str, n_channels: usize) -> Result<Vec<f64>, LogLineError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < n_channels {
        return Err(LogLineError::TooFewFields {
            expected: n_channels,
            found: tokens.len(),
        });
    }
    tokens[..n_channels]
        .iter()
        .enumerate()
        .map(|(column, token)| {
            token.parse::<f64>().map_err(|_| LogLineError::BadNumber {
                column,
                token: token.to_string(),
            })
        })
        .collect()
}

/// Reads a PSEC4 logfile one event at a time.
///
/// Comment lines (starting with `#`) are skipped and do not count toward the frame.
/// Every `samples_per_event` data lines form one [`SampleEvent`]. Values are converted
/// from volts to the unit declared in the [`LogFormat`] as they are read.
///
/// `LogFile` is an iterator over `Result<SampleEvent, LogFileError>`. After an
/// error under [`MalformedPolicy::Abort`] the iterator is fused.
#[derive(Debug)]
pub struct LogFile<R: BufRead> {
    reader: R,
    format: LogFormat,
    line_number: usize,
    bytes_read: u64,
    frame_lines: usize,
    frame: Array2<f64>,
    frame_is_bad: bool,
    next_event_index: usize,
    events_skipped: usize,
    is_ended: bool,
}

impl LogFile<BufReader<File>> {
    /// Open a logfile on disk. A missing file is an error, never an empty log.
    pub fn open(path: &Path, format: &LogFormat) -> Result<Self, LogFileError> {
        if !path.exists() {
            return Err(LogFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file), format))
    }
}

impl<R: BufRead> LogFile<R> {
    /// Wrap any buffered reader
    pub fn from_reader(reader: R, format: &LogFormat) -> Self {
        Self {
            reader,
            format: format.clone(),
            line_number: 0,
            bytes_read: 0,
            frame_lines: 0,
            frame: Array2::zeros((format.n_channels, format.samples_per_event)),
            frame_is_bad: false,
            next_event_index: 0,
            events_skipped: 0,
            is_ended: false,
        }
    }

    /// Number of events dropped under [`MalformedPolicy::SkipEvent`]
    pub fn events_skipped(&self) -> usize {
        self.events_skipped
    }

    /// Bytes consumed so far, for progress reporting
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read everything that is left into memory
    pub fn read_all(self) -> Result<Vec<SampleEvent>, LogFileError> {
        self.collect()
    }

    /// Get the next event in the file.
    ///
    /// Returns a `Result<Option<SampleEvent>>`. The Option is None if the file has no more
    /// complete events.
    pub fn get_next_event(&mut self) -> Result<Option<SampleEvent>, LogFileError> {
        let mut line = String::new();
        loop {
            if self.is_ended {
                return Ok(None);
            }

            line.clear();
            let n_bytes = self.reader.read_line(&mut line)?;
            if n_bytes == 0 {
                self.is_ended = true;
                return self.finish_partial_frame();
            }
            self.bytes_read += n_bytes as u64;
            self.line_number += 1;

            let trimmed = line.trim();
            if trimmed.starts_with(COMMENT_MARKER) {
                continue;
            }
            if trimmed.is_empty() {
                // Blank lines carry no samples; treat them like comments
                continue;
            }

            match parse_data_line(trimmed, self.format.n_channels) {
                Ok(values) => {
                    let scale = self.format.unit.from_volts();
                    for (ch, value) in values.into_iter().enumerate() {
                        self.frame[[ch, self.frame_lines]] = value * scale;
                    }
                }
                Err(reason) => match self.format.malformed_policy {
                    MalformedPolicy::Abort => {
                        self.is_ended = true;
                        return Err(LogFileError::MalformedLine {
                            line: self.line_number,
                            reason,
                        });
                    }
                    MalformedPolicy::SkipEvent => {
                        log::warn!(
                            "Malformed data at line {}: {}; event {} will be skipped",
                            self.line_number,
                            reason,
                            self.next_event_index + self.events_skipped
                        );
                        self.frame_is_bad = true;
                    }
                },
            }
            self.frame_lines += 1;

            if self.frame_lines == self.format.samples_per_event {
                self.frame_lines = 0;
                if self.frame_is_bad {
                    self.frame_is_bad = false;
                    self.events_skipped += 1;
                    continue;
                }
                let data = std::mem::replace(
                    &mut self.frame,
                    Array2::zeros((self.format.n_channels, self.format.samples_per_event)),
                );
                let event = SampleEvent::new(
                    self.next_event_index,
                    self.format.unit,
                    self.format.time_step_ns,
                    data,
                );
                self.next_event_index += 1;
                return Ok(Some(event));
            }
        }
    }

    fn finish_partial_frame(&mut self) -> Result<Option<SampleEvent>, LogFileError> {
        if self.frame_lines == 0 {
            return Ok(None);
        }
        let lines = self.frame_lines;
        self.frame_lines = 0;
        match self.format.partial_policy {
            PartialEventPolicy::Discard => {
                log::warn!("Discarding {lines} data lines after the last complete event");
                Ok(None)
            }
            PartialEventPolicy::Error => Err(LogFileError::TruncatedEvent { lines }),
        }
    }
}

impl<R: BufRead> Iterator for LogFile<R> {
    type Item = Result<SampleEvent, LogFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_next_event().transpose()
    }
}
