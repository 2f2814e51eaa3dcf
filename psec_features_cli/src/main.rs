use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use libpsec_features::config::Config;
use libpsec_features::process::{create_subsets, process_subset};
use libpsec_features::summary::RunSummary;
use libpsec_features::worker_status::WorkerStatus;

fn make_template_config(path: &Path, profile: Option<&String>) {
    let config = match profile {
        Some(name) => match Config::from_profile(name) {
            Some(c) => c,
            None => {
                log::error!("Unknown profile {name}; expected one of gain_map, laser_timing, velocity_survey, dark_count");
                return;
            }
        },
        None => Config::default(),
    };
    let yaml_str = serde_yaml::to_string(&config).expect("Could not serialize the template config!");
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn main() {
    // Create a cli
    let matches = Command::new("psec_features_cli")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("new")
                .about("Make a template configuration yaml file")
                .arg(
                    Arg::new("profile")
                        .long("profile")
                        .help("Analysis profile: gain_map, laser_timing, velocity_survey or dark_count"),
                ),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");
    log::set_max_level(log::LevelFilter::Info);

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", sub_matches)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path, sub_matches.get_one::<String>("profile"));
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Input files: {}", config.input_paths.len());
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!("Timing: {:?}", config.analysis.timing);
    log::info!("Channels: {:?}", config.analysis.channels);
    log::info!(
        "Noise channel: {} Sigma multiplier: {}",
        config.analysis.noise_channel,
        config.analysis.sigma_multiplier
    );
    log::info!("Voltage unit: {:?}", config.format.unit);
    log::info!("Workers: {}", config.n_threads);

    // Spawn one worker per non-empty subset, each with its own progress bar
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let cancel = Arc::new(AtomicBool::new(false));
    let style = ProgressStyle::with_template("[worker {prefix}] {bar:40.cyan/blue} {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let mut bars: HashMap<usize, ProgressBar> = HashMap::new();
    let mut workers = Vec::new();
    for (idx, subset) in create_subsets(&config).into_iter().enumerate() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let pb = pb_manager.add(ProgressBar::new(100));
        pb.set_style(style.clone());
        pb.set_prefix(idx.to_string());
        bars.insert(idx, pb);

        let conf = config.clone();
        let worker_tx = tx.clone();
        let worker_cancel = cancel.clone();
        workers.push(std::thread::spawn(move || {
            process_subset(conf, worker_tx, idx, subset, worker_cancel)
        }));
    }
    drop(tx);

    // Poll messages until every worker has hung up
    loop {
        match rx.recv_timeout(std::time::Duration::from_millis(500)) {
            Ok(status) => {
                if let Some(pb) = bars.get(&status.worker_id) {
                    pb.set_position((status.progress * 100.0) as u64);
                    pb.set_message(status.file_name);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let mut summary = RunSummary::new();
    for worker in workers {
        match worker.join() {
            Ok(Ok(worker_summary)) => summary.merge(worker_summary),
            Ok(Err(e)) => log::error!("Worker failed with error: {e}"),
            Err(_) => log::error!("Failed to join one of the workers!"),
        }
    }
    for pb in bars.values() {
        pb.finish();
    }

    log::info!("Run summary:\n{summary}");
    if summary.files_failed > 0 {
        log::warn!("{} files failed; check the log above for details.", summary.files_failed);
    }
    log::info!("Done.");
}
