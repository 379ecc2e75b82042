use super::constants::READOUT_CYCLE_NS;
use super::data_store::WindowedDataStore;
use super::dead_time::DeadTimeVeto;
use super::error::PipelineError;
use super::gtp_cluster::CLUSTER_COLLECTION;
use super::ssp_cluster::SspCluster;
use super::stage::{TriggerDecision, TriggerStage};

/// Evaluates the singles trigger cuts against each cluster of the current
/// readout cycle: total energy within `[energy_min, energy_max]` and hit
/// count at least `hit_count_min`. The first passing cluster outside dead
/// time fires the trigger; anything after it in the same cycle is moot.
pub struct SinglesTriggerStage {
    /// Which of the two singles trigger slots this stage models (0 or 1).
    index: u8,
    energy_min_mev: u32,
    energy_max_mev: u32,
    hit_count_min: u8,
    time_displacement: f64,
    local_time: f64,
    deps: Vec<String>,
}

impl SinglesTriggerStage {
    pub fn new(
        index: u8,
        energy_min_mev: u32,
        energy_max_mev: u32,
        hit_count_min: u8,
        time_displacement: f64,
    ) -> Self {
        SinglesTriggerStage {
            index,
            energy_min_mev,
            energy_max_mev,
            hit_count_min,
            time_displacement,
            local_time: 0.0,
            deps: vec![CLUSTER_COLLECTION.to_string()],
        }
    }

    /// Cut results in the hardware bit layout: energy minimum, energy
    /// maximum, hit count.
    fn cut_bits(&self, cluster: &SspCluster) -> u8 {
        let mut bits = 0;
        if cluster.energy_mev >= self.energy_min_mev {
            bits |= 0x1;
        }
        if cluster.energy_mev <= self.energy_max_mev {
            bits |= 0x2;
        }
        if cluster.hit_count >= self.hit_count_min {
            bits |= 0x4;
        }
        bits
    }
}

impl TriggerStage for SinglesTriggerStage {
    fn name(&self) -> &str {
        "SinglesTriggerStage"
    }

    fn dependencies(&self) -> &[String] {
        &self.deps
    }

    fn time_displacement(&self) -> f64 {
        self.time_displacement
    }

    fn process(
        &mut self,
        store: &WindowedDataStore,
        veto: &mut DeadTimeVeto,
    ) -> Result<Option<TriggerDecision>, PipelineError> {
        let window_end = self.local_time + READOUT_CYCLE_NS;
        if !store.is_ready(CLUSTER_COLLECTION, window_end) {
            return Ok(None);
        }

        let clusters: Vec<SspCluster> =
            store.query(CLUSTER_COLLECTION, self.local_time, window_end)?;

        let mut decision = None;
        for cluster in clusters.iter() {
            if self.cut_bits(cluster) != 0b111 {
                continue;
            }
            // The cuts pass; dead time has the final word. A veto here
            // simply loses the trigger, it is not retried.
            if veto.is_in_dead_time(self.local_time) {
                log::trace!(
                    "{}: cluster at ({}, {}) vetoed by dead time",
                    self.name(),
                    cluster.ix,
                    cluster.iy
                );
                continue;
            }
            veto.record_trigger(self.local_time);
            decision = Some(TriggerDecision {
                time: self.local_time,
                type_code: 2 * self.index + if cluster.iy > 0 { 0 } else { 1 },
                cut_bits: 0b111,
            });
            break;
        }

        self.local_time = window_end;
        Ok(decision)
    }
}
