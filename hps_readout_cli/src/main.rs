use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libhps_readout::bank_io::BankReader;
use libhps_readout::config::ReadoutConfig;
use libhps_readout::constants::{SSP_BANK_TAG, TI_BANK_TAG};
use libhps_readout::process::{create_subsets, process_subset};
use libhps_readout::run_status::RunStatus;
use libhps_readout::ssp_bank::SspRecord;
use libhps_readout::ti_bank::TiRecord;

fn make_template_config(path: &Path) {
    let config = ReadoutConfig::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could not create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

/// Replay a bank stream written by a run through the decoders and log a
/// summary of what it holds.
fn scan_banks(path: &Path) {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            log::error!("Could not open bank stream {}: {e}", path.to_string_lossy());
            return;
        }
    };
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    log::info!(
        "Scanning {} ({})...",
        path.to_string_lossy(),
        human_bytes::human_bytes(size as f64)
    );

    let mut reader = BankReader::new(BufReader::new(file));
    let mut ti_banks: u64 = 0;
    let mut ssp_banks: u64 = 0;
    let mut triggers: u64 = 0;
    let mut clusters: u64 = 0;
    let mut unknown_types: u64 = 0;
    let mut unknown_tags: u64 = 0;
    loop {
        let bank = match reader.next_bank() {
            Ok(Some(bank)) => bank,
            Ok(None) => break,
            Err(e) => {
                log::error!("Bank stream scan stopped: {e}");
                return;
            }
        };
        match bank.tag() {
            TI_BANK_TAG => match TiRecord::try_from(&bank) {
                Ok(record) => {
                    ti_banks += 1;
                    log::debug!("TI bank at {} ns: {record:?}", record.time_ns);
                }
                Err(e) => log::warn!("Undecodable TI bank: {e}"),
            },
            SSP_BANK_TAG => match SspRecord::try_from(&bank) {
                Ok(record) => {
                    ssp_banks += 1;
                    triggers += record.triggers.len() as u64;
                    clusters += record.clusters.len() as u64;
                    unknown_types += record.unknown_types as u64;
                }
                Err(e) => log::warn!("Undecodable SSP bank: {e}"),
            },
            tag => {
                unknown_tags += 1;
                log::debug!("Skipping bank with unknown tag 0x{tag:x}");
            }
        }
    }

    log::info!("TI banks: {ti_banks}");
    log::info!("SSP banks: {ssp_banks} ({triggers} triggers, {clusters} clusters)");
    if unknown_types > 0 {
        log::warn!("SSP trigger words with unknown type codes: {unknown_types}");
    }
    if unknown_tags > 0 {
        log::warn!("Banks with unrecognized tags: {unknown_tags}");
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("hps_readout_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("scan").about("Decode a .banks stream and print a summary"))
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

    // Parse the cli
    let file_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    match matches.subcommand() {
        Some(("new", _)) => {
            log::info!(
                "Making a template config at {}...",
                file_path.to_string_lossy()
            );
            make_template_config(&file_path);
            log::info!("Done.");
            return;
        }
        Some(("scan", _)) => {
            scan_banks(&file_path);
            return;
        }
        _ => (),
    }

    // Load our config
    log::info!("Loading config from {}...", file_path.to_string_lossy());
    let config = match ReadoutConfig::read_config_file(&file_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );
    log::info!(
        "Bunches per Run: {} Dead Time: {} ns",
        config.bunches_per_run,
        config.dead_time
    );
    if !config.is_n_threads_valid() {
        log::error!("Number of workers must be at least 1!");
        return;
    }

    // One worker per subset of the run range, one progress bar per worker.
    let subsets = create_subsets(&config);
    let (tx, rx) = mpsc::channel::<RunStatus>();
    let mut workers = Vec::new();
    let mut bars = Vec::new();
    for (worker_id, subset) in subsets.into_iter().enumerate() {
        if subset.is_empty() {
            continue;
        }
        let conf = config.clone();
        let worker_tx = tx.clone();
        bars.push(pb_manager.add(ProgressBar::new(100)));
        workers.push(std::thread::spawn(move || {
            process_subset(conf, worker_tx, worker_id, subset)
        }));
    }
    drop(tx);

    loop {
        std::thread::sleep(std::time::Duration::from_millis(100));
        while let Ok(status) = rx.try_recv() {
            if let Some(bar) = bars.get(status.worker_id) {
                bar.set_position((status.progress * 100.0) as u64);
                bar.set_message(format!(
                    "run {} ({} triggers)",
                    status.run_number, status.triggers
                ));
            }
        }

        if workers.iter().all(|handle| handle.is_finished()) {
            for handle in workers {
                match handle.join() {
                    Ok(Ok(())) => (),
                    Ok(Err(e)) => log::error!("Readout failed with error: {e}"),
                    Err(_) => log::error!("Failed to join a readout worker!"),
                }
            }
            break;
        }
    }

    for bar in bars.iter() {
        bar.finish();
    }

    log::info!("Done.");
}
