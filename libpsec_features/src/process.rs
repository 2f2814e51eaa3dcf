use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::config::{Config, TimingMode};
use super::error::ProcessorError;
use super::feature_writer::FeatureWriter;
use super::features::FeatureExtractor;
use super::log_file::LogFile;
use super::summary::RunSummary;
use super::worker_status::WorkerStatus;

/// One feature file per analysed channel, only in fit mode where positions exist
fn create_writers(config: &Config, path: &Path) -> Result<Vec<(usize, FeatureWriter)>, ProcessorError> {
    if config.analysis.timing != TimingMode::DoubleGaussian {
        return Ok(vec![]);
    }
    std::fs::create_dir_all(&config.output_path)?;
    let mut writers = Vec::with_capacity(config.analysis.channels.len());
    for channel in config.analysis.channels.iter() {
        let feature_path = config.get_feature_file_name(path, *channel);
        writers.push((*channel, FeatureWriter::new(&feature_path)?));
    }
    Ok(writers)
}

/// Extract the features of every event in a single PSEC log, adding into `summary`.
///
/// Accepted (position, gain) pairs are written to the feature files as they are produced.
/// The cancel flag is checked between events and sets `cancelled` on the summary.
///
/// If reading fails partway, the events extracted before the failure stay in `summary`
/// (and in the feature files) and the error is returned. The file only counts as
/// processed when it was read to the end or cancelled.
pub fn process_file(
    config: &Config,
    path: &Path,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
    cancel: &AtomicBool,
    summary: &mut RunSummary,
) -> Result<(), ProcessorError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut log = LogFile::open(path, &config.format)?;
    let total_size = std::fs::metadata(path)?.len();
    log::info!(
        "Opened {} with size {}",
        file_name,
        human_bytes::human_bytes(total_size as f64)
    );

    let extractor = FeatureExtractor::new(&config.format, &config.analysis);
    let mut writers = create_writers(config, path)?;

    let flush_frac: f32 = 0.01;
    let flush_val = (total_size as f64 * flush_frac as f64) as u64;
    let mut last_flush: u64 = 0;

    tx.send(WorkerStatus::new(0.0, &file_name, worker_id))?;
    let mut read_events = || -> Result<(), ProcessorError> {
        loop {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("Processing of {file_name} was cancelled");
                summary.cancelled = true;
                return Ok(());
            }
            let Some(event) = log.get_next_event()? else {
                return Ok(());
            };

            let features = extractor.extract(&event);
            if extractor.is_untriggered(&features) {
                log::debug!("Event {} has no laser trigger", features.event);
            }
            for record in features.records.iter().filter(|r| r.is_accepted()) {
                if let Some((_, writer)) = writers.iter_mut().find(|(ch, _)| *ch == record.channel) {
                    writer.write_record(record)?;
                }
            }
            summary.add_event(&features, &config.analysis);

            if log.bytes_read() - last_flush > flush_val {
                last_flush = log.bytes_read();
                tx.send(WorkerStatus::new(
                    log.bytes_read() as f32 / total_size as f32,
                    &file_name,
                    worker_id,
                ))?;
            }
        }
    };
    let result = read_events();

    let mut closed: Result<(), ProcessorError> = Ok(());
    for (channel, writer) in writers {
        log::info!(
            "Wrote {} lines for channel {} to {}",
            writer.lines_written(),
            channel + 1,
            writer.path().display()
        );
        if let Err(e) = writer.close() {
            closed = closed.and(Err(e.into()));
        }
    }

    summary.events_skipped += log.events_skipped();
    if log.events_skipped() > 0 {
        log::warn!(
            "Skipped {} malformed events in {}",
            log.events_skipped(),
            file_name
        );
    }
    summary.finish_file();
    result.and(closed)?;

    summary.files_processed += 1;
    tx.send(WorkerStatus::new(1.0, &file_name, worker_id))?;
    Ok(())
}

/// Process a subset of log files.
///
/// A failing file is logged and counted, its partial results are kept, and the rest of
/// the subset continues. Only losing the progress channel stops the worker with an error.
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<PathBuf>,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary, ProcessorError> {
    let mut summary = RunSummary::new();
    for path in subset {
        if cancel.load(Ordering::Relaxed) {
            summary.cancelled = true;
            break;
        }
        log::info!("Processing {}...", path.display());
        let mut file_summary = RunSummary::new();
        let result = process_file(&config, &path, &tx, worker_id, &cancel, &mut file_summary);
        summary.merge(file_summary);
        match result {
            Ok(()) => log::info!("Finished processing {}.", path.display()),
            Err(ProcessorError::SendError(e)) => return Err(ProcessorError::SendError(e)),
            Err(e) => {
                log::error!("Failed to process {}: {e}", path.display());
                summary.files_failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Process every input file on the calling thread
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    cancel: Arc<AtomicBool>,
) -> Result<RunSummary, ProcessorError> {
    let paths = config.input_paths.clone();
    let summary = process_subset(config, tx, 0, paths, cancel)?;
    log::info!("Run summary:\n{summary}");
    Ok(summary)
}

/// Divide the input files in to a set of subsets (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<PathBuf>> {
    let mut subsets: Vec<Vec<PathBuf>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, path) in config.input_paths.iter().enumerate() {
        subsets[idx % n_subsets].push(path.clone())
    }

    subsets
}
