use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::error::FeatureWriterError;
use super::features::FeatureRecord;

/// Format one `position, gain` line (without the newline)
pub fn format_feature_line(position: f64, gain: f64) -> String {
    format!("{position}, {gain}")
}

/// Parse one `position, gain` line
pub fn parse_feature_line(line: &str, line_number: usize) -> Result<(f64, f64), FeatureWriterError> {
    let entries: Vec<&str> = line.split(',').map(str::trim).collect();
    if entries.len() != 2 {
        return Err(FeatureWriterError::BadFormat {
            line: line_number,
            text: line.to_string(),
        });
    }
    Ok((entries[0].parse()?, entries[1].parse()?))
}

/// Writes accepted (position, gain) pairs, one event per line, no header.
///
/// This is the hand-off format for the gain mapping tools.
#[derive(Debug)]
pub struct FeatureWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    lines_written: usize,
}

impl FeatureWriter {
    /// Create (truncate) the feature file at path
    pub fn new(path: &Path) -> Result<Self, FeatureWriterError> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            lines_written: 0,
        })
    }

    /// Write a record if it has both a position and a gain. Returns whether it was written.
    pub fn write_record(&mut self, record: &FeatureRecord) -> Result<bool, FeatureWriterError> {
        match (record.position, record.gain) {
            (Some(position), Some(gain)) => {
                writeln!(self.writer, "{}", format_feature_line(position, gain))?;
                self.lines_written += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn lines_written(&self) -> usize {
        self.lines_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file
    pub fn close(mut self) -> Result<(), FeatureWriterError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Read a feature file back into (position, gain) pairs
pub fn read_feature_file(path: &Path) -> Result<Vec<(f64, f64)>, FeatureWriterError> {
    if !path.exists() {
        return Err(FeatureWriterError::BadFilePath(path.to_path_buf()));
    }
    let reader = BufReader::new(File::open(path)?);
    let mut pairs = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        pairs.push(parse_feature_line(&line, idx + 1)?);
    }
    Ok(pairs)
}
