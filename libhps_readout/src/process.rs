use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::mpsc::Sender;

use super::bank_io::BankWriter;
use super::config::ReadoutConfig;
use super::ecal_converter::EcalRawConverterStage;
use super::error::ProcessorError;
use super::event_writer::EventWriter;
use super::gtp_cluster::GtpClusterStage;
use super::pair_trigger::PairTriggerStage;
use super::readout_loop::ReadoutLoop;
use super::run_status::RunStatus;
use super::sim_source::SimHitSource;
use super::singles_trigger::SinglesTriggerStage;

/// Assemble the standard simulation chain for one run: simulated FADC
/// source, raw-hit conversion, GTP clustering, and the singles and pair
/// trigger stages, wired with the configured cuts and latencies.
fn build_loop(config: &ReadoutConfig, run_number: i32) -> ReadoutLoop {
    let mut run_loop = ReadoutLoop::new(config);
    run_loop.add_stage(Box::new(SimHitSource::new(
        config.occupancy,
        config.pedestal,
        config.run_seed(run_number),
    )));
    run_loop.add_stage(Box::new(EcalRawConverterStage::new(
        config.pedestal,
        config.gain_mev_per_adc,
        config.converter_displacement,
    )));
    run_loop.add_stage(Box::new(GtpClusterStage::new(
        config.seed_threshold_mev,
        config.cluster_displacement,
        Some(config.cluster_window_before),
        Some(config.cluster_window_after),
    )));
    run_loop.add_trigger_stage(Box::new(SinglesTriggerStage::new(
        0,
        config.singles_energy_min_mev,
        config.singles_energy_max_mev,
        config.singles_hit_count_min,
        config.singles_displacement,
    )));
    run_loop.add_trigger_stage(Box::new(PairTriggerStage::new(
        0,
        config.singles_energy_min_mev,
        config.singles_energy_max_mev,
        config.singles_hit_count_min,
        config.pair_energy_sum_max_mev,
        config.pair_energy_diff_max_mev,
        config.pair_coincidence,
    )));
    run_loop
}

/// The main loop of a single readout run.
///
/// Builds the pipeline, attaches the event and bank writers, and drives
/// the loop for the configured number of beam bunches, reporting progress
/// to the UI as it goes.
pub fn process_run(
    config: &ReadoutConfig,
    run_number: i32,
    tx: &Sender<RunStatus>,
    worker_id: &usize,
) -> Result<(), ProcessorError> {
    let mut run_loop = build_loop(config, run_number);

    let event_path = config.get_event_file_name(run_number)?;
    let event_file: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(&event_path)?));
    run_loop.set_event_writer(EventWriter::new(event_file));

    let bank_path = config.get_bank_file_name(run_number)?;
    if config.write_banks {
        let bank_file: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(&bank_path)?));
        run_loop.set_bank_writer(BankWriter::new(bank_file));
    }

    run_loop.start_of_run()?;

    let flush_frac = 0.01_f64;
    let flush_val = ((config.bunches_per_run as f64) * flush_frac).max(1.0) as u64;
    let mut count = 0;
    let mut progress = 0.0_f32;
    tx.send(RunStatus::new(0.0, run_number, *worker_id, 0))?;
    for _ in 0..config.bunches_per_run {
        run_loop.tick()?;

        count += 1;
        if count >= flush_val {
            count = 0;
            progress += flush_frac as f32;
            tx.send(RunStatus::new(
                progress,
                run_number,
                *worker_id,
                run_loop.triggers_written(),
            ))?;
        }
    }

    let triggers = run_loop.end_of_run()?;
    tx.send(RunStatus::new(1.0, run_number, *worker_id, triggers))?;

    let event_bytes = std::fs::metadata(&event_path).map(|m| m.len()).unwrap_or(0);
    log::info!(
        "Run {} wrote {} triggered events ({})",
        run_number,
        triggers,
        human_bytes::human_bytes(event_bytes as f64)
    );
    if config.write_banks {
        let bank_bytes = std::fs::metadata(&bank_path).map(|m| m.len()).unwrap_or(0);
        log::info!(
            "Run {} bank stream: {}",
            run_number,
            human_bytes::human_bytes(bank_bytes as f64)
        );
    }
    Ok(())
}

/// The function to be called by a separate thread (typically the UI).
/// Allows multiple runs to be processed.
pub fn process(
    config: ReadoutConfig,
    tx: Sender<RunStatus>,
    worker_id: usize,
) -> Result<(), ProcessorError> {
    for run in config.first_run_number..(config.last_run_number + 1) {
        log::info!("Processing run {}...", run);
        process_run(&config, run, &tx, &worker_id)?;
        log::info!("Finished processing run {}.", run);
    }
    Ok(())
}

/// Process a subset of runs.
pub fn process_subset(
    config: ReadoutConfig,
    tx: Sender<RunStatus>,
    worker_id: usize,
    subset: Vec<i32>,
) -> Result<(), ProcessorError> {
    for run in subset {
        log::info!("Processing run {}...", run);
        process_run(&config, run, &tx, &worker_id)?;
        log::info!("Finished processing run {}.", run);
    }
    Ok(())
}

/// Divide a run range in to a set of subranges (per thread/worker).
pub fn create_subsets(config: &ReadoutConfig) -> Vec<Vec<i32>> {
    let mut subsets: Vec<Vec<i32>> = vec![Vec::new(); config.n_threads as usize];
    let n_subsets = subsets.len();

    for (idx, run) in (config.first_run_number..(config.last_run_number + 1)).enumerate() {
        subsets[idx % n_subsets].push(run)
    }

    subsets
}
