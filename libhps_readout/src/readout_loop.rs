use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::io::Write;

use super::bank_io::BankWriter;
use super::config::ReadoutConfig;
use super::constants::*;
use super::data_store::WindowedDataStore;
use super::dead_time::DeadTimeVeto;
use super::error::{PipelineError, ProcessorError};
use super::event_writer::{EventWriter, TriggeredEvent};
use super::gtp_cluster::CLUSTER_COLLECTION;
use super::ssp_bank::SspRecord;
use super::ssp_cluster::SspCluster;
use super::ssp_trigger::SspTrigger;
use super::stage::{PipelineStage, TriggerStage};
use super::ti_bank::TiRecord;

/// An accepted trigger waiting for its readout data to finish buffering.
#[derive(Debug, Clone)]
struct QueuedTrigger {
    time: f64,
    type_code: u8,
    cut_bits: u8,
    source: String,
}

impl PartialEq for QueuedTrigger {
    fn eq(&self, other: &Self) -> bool {
        self.time.total_cmp(&other.time).is_eq()
    }
}

impl Eq for QueuedTrigger {}

impl PartialOrd for QueuedTrigger {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTrigger {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time.total_cmp(&other.time)
    }
}

/// Drives one run of the readout chain.
///
/// The loop owns the windowed store, the registered stages, the dead-time
/// veto and the trigger queue. Stages execute in registration order once
/// per tick; accepted triggers wait in a min-heap until the global clock
/// has moved past `trigger time + buffer_total`, at which point every
/// persistent collection's readout window is guaranteed complete and the
/// event is written out, together with the TI/SSP bank pair the front-end
/// hardware would have emitted for it.
pub struct ReadoutLoop {
    store: WindowedDataStore,
    stages: Vec<Box<dyn PipelineStage>>,
    trigger_stages: Vec<Box<dyn TriggerStage>>,
    veto: DeadTimeVeto,
    queue: BinaryHeap<Reverse<QueuedTrigger>>,
    buffer_total: f64,
    readout_window: f64,
    trigger_offset: f64,
    buffer_margin: f64,
    buffer_retention: f64,
    event_writer: Option<EventWriter<Box<dyn Write + Send>>>,
    bank_writer: Option<BankWriter<Box<dyn Write + Send>>>,
    triggers_seen: u64,
    triggers_written: u64,
}

impl ReadoutLoop {
    pub fn new(config: &ReadoutConfig) -> Self {
        ReadoutLoop {
            store: WindowedDataStore::new(),
            stages: Vec::new(),
            trigger_stages: Vec::new(),
            veto: DeadTimeVeto::new(config.dead_time),
            queue: BinaryHeap::new(),
            buffer_total: 0.0,
            readout_window: config.readout_window,
            trigger_offset: config.trigger_offset,
            buffer_margin: config.buffer_margin,
            buffer_retention: config.buffer_retention,
            event_writer: None,
            bank_writer: None,
            triggers_seen: 0,
            triggers_written: 0,
        }
    }

    pub fn add_stage(&mut self, stage: Box<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    pub fn add_trigger_stage(&mut self, stage: Box<dyn TriggerStage>) {
        self.trigger_stages.push(stage);
    }

    pub fn set_event_writer(&mut self, writer: EventWriter<Box<dyn Write + Send>>) {
        self.event_writer = Some(writer);
    }

    pub fn set_bank_writer(&mut self, writer: BankWriter<Box<dyn Write + Send>>) {
        self.bank_writer = Some(writer);
    }

    pub fn store(&self) -> &WindowedDataStore {
        &self.store
    }

    /// Register every stage's collections and derive the timing bookkeeping.
    ///
    /// Stages must be added producer before consumer; a dependency that no
    /// earlier stage produces is rejected here, which also rules out
    /// dependency cycles. Each collection's global displacement is the
    /// largest displacement among its producer's dependencies plus the
    /// producer's own, mirroring how latency accumulates down a hardware
    /// chain. `buffer_total` then bounds how long any trigger must wait
    /// before all of its readout data is guaranteed present.
    pub fn start_of_run(&mut self) -> Result<(), PipelineError> {
        for stage in self.stages.iter_mut() {
            for dependency in stage.dependencies() {
                if !self.store.is_registered(dependency) {
                    return Err(PipelineError::UnknownDependency {
                        stage: stage.name().to_string(),
                        collection: dependency.clone(),
                    });
                }
            }
            let displacement = Self::chained_displacement(
                &self.store,
                stage.dependencies(),
                stage.time_displacement(),
            );
            stage.register(&mut self.store)?;
            for output in stage.outputs() {
                self.store.set_time_displacement(&output, displacement)?;
                log::debug!(
                    "Collection {} produced by {} with total displacement {} ns",
                    output,
                    stage.name(),
                    displacement
                );
            }
        }

        let mut longest_trigger = 0.0_f64;
        for stage in self.trigger_stages.iter() {
            for dependency in stage.dependencies() {
                if !self.store.is_registered(dependency) {
                    return Err(PipelineError::UnknownDependency {
                        stage: stage.name().to_string(),
                        collection: dependency.clone(),
                    });
                }
            }
            let displacement = Self::chained_displacement(
                &self.store,
                stage.dependencies(),
                stage.time_displacement(),
            );
            log::debug!(
                "Trigger {} has total displacement {} ns",
                stage.name(),
                displacement
            );
            longest_trigger = longest_trigger.max(displacement);
        }

        // How far the clock must run past a trigger before every readout
        // window is fully buffered.
        let default_after = self.readout_window - self.trigger_offset;
        let mut longest_before = self.trigger_offset;
        let mut longest_displaced_after = 0.0_f64;
        for name in self.store.collection_names() {
            let displacement = self.store.time_displacement(&name).unwrap_or(0.0);
            let (before, after) = self.store.readout_windows(&name);
            longest_before = longest_before.max(before.unwrap_or(self.trigger_offset));
            longest_displaced_after =
                longest_displaced_after.max(displacement + after.unwrap_or(default_after));
        }
        self.buffer_total =
            longest_trigger.max(longest_displaced_after) + longest_before + self.buffer_margin;
        log::debug!(
            "Readout window: {} ns, trigger offset: {} ns, buffer total: {} ns",
            self.readout_window,
            self.trigger_offset,
            self.buffer_total
        );
        Ok(())
    }

    /// Run one tick: every stage, every trigger stage, the write-out of any
    /// trigger whose buffering delay has elapsed, buffer pruning, and the
    /// beam-bunch advance of the global clock.
    pub fn tick(&mut self) -> Result<(), ProcessorError> {
        for stage in self.stages.iter_mut() {
            stage.process(&mut self.store)?;
        }

        for stage in self.trigger_stages.iter_mut() {
            if let Some(decision) = stage.process(&self.store, &mut self.veto)? {
                log::trace!(
                    "Trigger from {} at t={} queued for readout at t={}",
                    stage.name(),
                    decision.time,
                    decision.time + self.buffer_total
                );
                self.triggers_seen += 1;
                self.queue.push(Reverse(QueuedTrigger {
                    time: decision.time,
                    type_code: decision.type_code,
                    cut_bits: decision.cut_bits,
                    source: stage.name().to_string(),
                }));
            }
        }

        while let Some(Reverse(next)) = self.queue.peek() {
            if self.store.current_time() < next.time + self.buffer_total {
                break;
            }
            let trigger = self.queue.pop().map(|r| r.0);
            if let Some(trigger) = trigger {
                self.write_triggered_event(trigger)?;
            }
        }

        self.store
            .prune(self.store.current_time() - self.buffer_retention);
        self.store.advance_time(BEAM_BUNCH_NS);
        Ok(())
    }

    /// End-of-run teardown. Returns the number of triggered events written.
    pub fn end_of_run(&mut self) -> Result<u64, ProcessorError> {
        if !self.queue.is_empty() {
            log::debug!(
                "Dropping {} triggers still waiting for buffer at end of run",
                self.queue.len()
            );
            self.queue.clear();
        }
        self.store.close_run();
        if let Some(writer) = self.event_writer.take() {
            writer.close()?;
        }
        if let Some(mut writer) = self.bank_writer.take() {
            writer.flush()?;
        }
        log::info!(
            "Wrote {} triggers ({} accepted by the trigger stages).",
            self.triggers_written,
            self.triggers_seen
        );
        Ok(self.triggers_written)
    }

    pub fn triggers_written(&self) -> u64 {
        self.triggers_written
    }

    fn chained_displacement(store: &WindowedDataStore, deps: &[String], own: f64) -> f64 {
        let base = deps
            .iter()
            .filter_map(|name| store.time_displacement(name))
            .fold(0.0_f64, f64::max);
        base + own
    }

    fn write_triggered_event(&mut self, trigger: QueuedTrigger) -> Result<(), ProcessorError> {
        // Event numbering follows the beam-bunch index of the trigger; the
        // timestamp is rounded onto the 4 ns detector clock.
        let event_number = (trigger.time / BEAM_BUNCH_NS).floor() as u32;
        let timestamp_ns = CLOCK_TICK_NS * (trigger.time / READOUT_CYCLE_NS).round() as u64;

        let default_start = trigger.time - self.trigger_offset;
        let default_end = default_start + self.readout_window;

        let mut collections = BTreeMap::new();
        for name in self.store.persistent_collections() {
            let (before, after) = self.store.readout_windows(&name);
            let start = before.map_or(default_start, |b| trigger.time - b);
            let end = after.map_or(default_end, |a| trigger.time + a);
            collections.insert(name.clone(), self.store.collect_window(&name, start, end)?);
        }

        if let Some(writer) = self.event_writer.as_mut() {
            writer.write_event(&TriggeredEvent {
                event_number,
                timestamp_ns,
                source: trigger.source.clone(),
                collections,
            })?;
        }

        if self.bank_writer.is_some() {
            let ti = Self::ti_record(&trigger, timestamp_ns);
            let ssp = self.ssp_record(&trigger, event_number, timestamp_ns, default_start)?;
            if let Some(writer) = self.bank_writer.as_mut() {
                writer.write_bank(&ti.to_bank())?;
                writer.write_bank(&ssp.to_bank())?;
            }
        }

        self.triggers_written += 1;
        Ok(())
    }

    fn ti_record(trigger: &QueuedTrigger, timestamp_ns: u64) -> TiRecord {
        let mut record = TiRecord {
            time_ns: timestamp_ns,
            ..Default::default()
        };
        match trigger.type_code {
            TRIG_TYPE_SINGLES0_TOP | TRIG_TYPE_SINGLES0_BOT => record.singles0 = true,
            TRIG_TYPE_SINGLES1_TOP | TRIG_TYPE_SINGLES1_BOT => record.singles1 = true,
            TRIG_TYPE_PAIR0 => record.pairs0 = true,
            TRIG_TYPE_PAIR1 => record.pairs1 = true,
            // The cosmic readout path shares the out-of-beam trigger line.
            TRIG_TYPE_COSMIC_TOP | TRIG_TYPE_COSMIC_BOT => record.pulser = true,
            _ => (),
        }
        record
    }

    /// Assemble the SSP bank the hardware would have emitted: the trigger
    /// word plus every cluster in the default readout window, with times
    /// rebased to the window start so they fit the 10-bit tick fields.
    fn ssp_record(
        &self,
        trigger: &QueuedTrigger,
        event_number: u32,
        timestamp_ns: u64,
        window_start: f64,
    ) -> Result<SspRecord, ProcessorError> {
        let mut record = SspRecord {
            event_number,
            trigger_time: timestamp_ns / CLOCK_TICK_NS,
            triggers: vec![SspTrigger::from_type_code(
                trigger.type_code,
                (trigger.time - window_start) as u32,
                trigger.cut_bits,
            )],
            ..Default::default()
        };
        if self.store.is_registered(CLUSTER_COLLECTION) {
            let window_end = window_start + self.readout_window;
            let clusters: Vec<SspCluster> =
                self.store
                    .query(CLUSTER_COLLECTION, window_start, window_end)?;
            record.clusters = clusters
                .into_iter()
                .map(|cluster| SspCluster {
                    time_ns: (cluster.time_ns as f64 - window_start).max(0.0) as u32,
                    ..cluster
                })
                .collect();
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank_io::BankReader;
    use crate::ecal_converter::EcalRawConverterStage;
    use crate::gtp_cluster::GtpClusterStage;
    use crate::sim_source::SimHitSource;
    use crate::singles_trigger::SinglesTriggerStage;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Test sink that lets the bytes be read back after the loop is done.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn simulation_loop(config: &ReadoutConfig) -> ReadoutLoop {
        let mut run_loop = ReadoutLoop::new(config);
        run_loop.add_stage(Box::new(SimHitSource::new(
            config.occupancy,
            config.pedestal,
            config.seed,
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
        run_loop
    }

    #[test]
    fn test_consumer_before_producer_rejected() {
        let config = ReadoutConfig::default();
        let mut run_loop = ReadoutLoop::new(&config);
        // The converter is added first, so its input does not exist yet.
        run_loop.add_stage(Box::new(EcalRawConverterStage::new(100.0, 0.3, 4.0)));
        run_loop.add_stage(Box::new(SimHitSource::new(1.0, 100.0, 0)));
        assert!(matches!(
            run_loop.start_of_run(),
            Err(PipelineError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_displacements_chain_through_stages() {
        let config = ReadoutConfig::default();
        let mut run_loop = simulation_loop(&config);
        run_loop.start_of_run().unwrap();
        let store = &run_loop.store;
        assert_eq!(store.time_displacement("EcalRawHits"), Some(0.0));
        assert_eq!(
            store.time_displacement("EcalCorrectedHits"),
            Some(config.converter_displacement)
        );
        assert_eq!(
            store.time_displacement("EcalClustersGTP"),
            Some(config.converter_displacement + config.cluster_displacement)
        );
    }

    #[test]
    fn test_simulated_run_produces_triggered_events() {
        let config = ReadoutConfig {
            occupancy: 0.4,
            singles_energy_min_mev: 100,
            seed: 11,
            ..Default::default()
        };
        let mut run_loop = simulation_loop(&config);
        let banks = SharedBuffer::default();
        run_loop.set_bank_writer(BankWriter::new(Box::new(banks.clone())));
        let events = SharedBuffer::default();
        run_loop.set_event_writer(EventWriter::new(Box::new(events.clone())));
        run_loop.start_of_run().unwrap();

        for _ in 0..5_000 {
            run_loop.tick().unwrap();
        }
        let written = run_loop.end_of_run().unwrap();
        assert!(written > 0, "the simulated run should trigger");

        // The bank stream holds one TI + SSP pair per written event, and
        // both decode back.
        let bytes = banks.0.lock().unwrap().clone();
        let mut reader = BankReader::new(Cursor::new(bytes));
        let mut ti_times = Vec::new();
        let mut ssp_count = 0;
        while let Some(bank) = reader.next_bank().unwrap() {
            match bank.tag() {
                TI_BANK_TAG => {
                    let record = TiRecord::try_from(&bank).unwrap();
                    assert!(record.singles0);
                    ti_times.push(record.time_ns);
                }
                SSP_BANK_TAG => {
                    let record = SspRecord::try_from(&bank).unwrap();
                    assert_eq!(record.triggers.len(), 1);
                    assert_eq!(record.unknown_types, 0);
                    ssp_count += 1;
                }
                tag => panic!("unexpected bank tag 0x{tag:x}"),
            }
        }
        assert_eq!(ti_times.len() as u64, written);
        assert_eq!(ssp_count, ti_times.len());

        // Consecutive triggers honor the dead time.
        for pair in ti_times.windows(2) {
            assert!(pair[1] - pair[0] >= config.dead_time as u64);
        }

        // The event file holds one YAML document per written event.
        let text = String::from_utf8(events.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("---").count() as u64, written);
        assert!(text.contains("EcalClustersGTP"));
    }
}
