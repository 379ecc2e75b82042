use std::collections::VecDeque;

use super::constants::{READOUT_CYCLE_NS, TRIG_TYPE_PAIR0};
use super::data_store::WindowedDataStore;
use super::dead_time::DeadTimeVeto;
use super::error::PipelineError;
use super::gtp_cluster::CLUSTER_COLLECTION;
use super::ssp_cluster::SspCluster;
use super::stage::{TriggerDecision, TriggerStage};

/// Evaluates the pair trigger: clusters in opposite calorimeter halves
/// within a coincidence window, passing the pair energy-sum and
/// energy-difference cuts.
///
/// Clusters that survive the singles prefilter are held in two queues, one
/// per half. The top queue spans `2 * coincidence + 1` readout cycles and
/// the bottom queue `coincidence + 1`, so pairing the oldest bottom cycle
/// against every queued top cycle covers time differences of up to
/// `coincidence` cycles either way without double-counting a pair.
pub struct PairTriggerStage {
    /// Which of the two pair trigger slots this stage models (0 or 1).
    index: u8,
    energy_min_mev: u32,
    energy_max_mev: u32,
    hit_count_min: u8,
    energy_sum_max_mev: u32,
    energy_diff_max_mev: u32,
    coincidence: usize,
    top_queue: VecDeque<Vec<SspCluster>>,
    bot_queue: VecDeque<Vec<SspCluster>>,
    local_time: f64,
    deps: Vec<String>,
}

impl PairTriggerStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: u8,
        energy_min_mev: u32,
        energy_max_mev: u32,
        hit_count_min: u8,
        energy_sum_max_mev: u32,
        energy_diff_max_mev: u32,
        coincidence: usize,
    ) -> Self {
        // Pre-fill so the queues always hold a full coincidence span.
        let top_queue = (0..2 * coincidence + 1).map(|_| Vec::new()).collect();
        let bot_queue = (0..coincidence + 1).map(|_| Vec::new()).collect();
        PairTriggerStage {
            index,
            energy_min_mev,
            energy_max_mev,
            hit_count_min,
            energy_sum_max_mev,
            energy_diff_max_mev,
            coincidence,
            top_queue,
            bot_queue,
            local_time: 0.0,
            deps: vec![CLUSTER_COLLECTION.to_string()],
        }
    }

    fn passes_singles_cuts(&self, cluster: &SspCluster) -> bool {
        cluster.energy_mev >= self.energy_min_mev
            && cluster.energy_mev <= self.energy_max_mev
            && cluster.hit_count >= self.hit_count_min
    }

    fn passes_pair_cuts(&self, a: &SspCluster, b: &SspCluster) -> bool {
        let sum = a.energy_mev + b.energy_mev;
        let diff = a.energy_mev.abs_diff(b.energy_mev);
        sum <= self.energy_sum_max_mev && diff <= self.energy_diff_max_mev
    }

    /// Pair the oldest buffered bottom cycle against every buffered top
    /// cycle and return whether any pair passes.
    fn test_trigger(&self) -> bool {
        let Some(bottom_cycle) = self.bot_queue.front() else {
            return false;
        };
        for bottom in bottom_cycle.iter() {
            for top_cycle in self.top_queue.iter() {
                for top in top_cycle.iter() {
                    if self.passes_pair_cuts(top, bottom) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl TriggerStage for PairTriggerStage {
    fn name(&self) -> &str {
        "PairTriggerStage"
    }

    fn dependencies(&self) -> &[String] {
        &self.deps
    }

    fn time_displacement(&self) -> f64 {
        (self.coincidence as f64 + 1.0) * READOUT_CYCLE_NS
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
        let (top, bottom): (Vec<SspCluster>, Vec<SspCluster>) = clusters
            .into_iter()
            .filter(|cluster| self.passes_singles_cuts(cluster))
            .partition(|cluster| cluster.iy > 0);
        self.top_queue.push_back(top);
        self.bot_queue.push_back(bottom);
        self.top_queue.pop_front();
        self.bot_queue.pop_front();

        // The pair is anchored on the oldest bottom cycle in the buffer.
        let pair_time = self.local_time - self.coincidence as f64 * READOUT_CYCLE_NS;
        let mut decision = None;
        if self.test_trigger() && !veto.is_in_dead_time(pair_time) {
            veto.record_trigger(pair_time);
            decision = Some(TriggerDecision {
                time: pair_time,
                type_code: TRIG_TYPE_PAIR0 + self.index,
                cut_bits: 0b0011,
            });
        }

        self.local_time = window_end;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TRIG_TYPE_PAIR1;

    fn cluster(iy: i8, energy_mev: u32) -> SspCluster {
        SspCluster {
            ix: 5,
            iy,
            energy_mev,
            hit_count: 3,
            time_ns: 0,
        }
    }

    fn stage() -> PairTriggerStage {
        PairTriggerStage::new(1, 100, 4000, 2, 6000, 1500, 2)
    }

    fn run_cycles(
        stage: &mut PairTriggerStage,
        veto: &mut DeadTimeVeto,
        batches: Vec<Vec<SspCluster>>,
    ) -> Vec<TriggerDecision> {
        let mut store = WindowedDataStore::new();
        store
            .register::<SspCluster>(CLUSTER_COLLECTION, true, None, None)
            .unwrap();
        let mut decisions = Vec::new();
        for (cycle, clusters) in batches.into_iter().enumerate() {
            store
                .insert(CLUSTER_COLLECTION, cycle as f64 * READOUT_CYCLE_NS, clusters)
                .unwrap();
            store.advance_time(READOUT_CYCLE_NS);
            if let Some(decision) = stage.process(&store, veto).unwrap() {
                decisions.push(decision);
            }
        }
        decisions
    }

    #[test]
    fn test_coincident_pair_triggers() {
        // Top cluster two cycles after the bottom one: inside the
        // coincidence window.
        let batches = vec![
            vec![cluster(-2, 900)],
            vec![],
            vec![cluster(3, 1100)],
            vec![],
            vec![],
        ];
        let decisions = run_cycles(&mut stage(), &mut DeadTimeVeto::new(32.0), batches);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].type_code, TRIG_TYPE_PAIR1);
    }

    #[test]
    fn test_pair_cuts_reject() {
        // Energy difference beyond the cut.
        let batches = vec![
            vec![cluster(-2, 300), cluster(4, 3900)],
            vec![],
            vec![],
            vec![],
        ];
        let decisions = run_cycles(&mut stage(), &mut DeadTimeVeto::new(32.0), batches);
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_same_half_never_pairs() {
        let batches = vec![
            vec![cluster(2, 900), cluster(3, 1000)],
            vec![],
            vec![],
            vec![],
        ];
        let decisions = run_cycles(&mut stage(), &mut DeadTimeVeto::new(32.0), batches);
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_backpressure_keeps_queues() {
        let mut store = WindowedDataStore::new();
        store
            .register_produced::<SspCluster>(CLUSTER_COLLECTION, true, None, None, 1000.0)
            .unwrap();
        let mut stage = stage();
        let mut veto = DeadTimeVeto::new(32.0);
        assert!(stage.process(&store, &mut veto).unwrap().is_none());
        assert_eq!(stage.local_time, 0.0);
        assert_eq!(stage.top_queue.len(), 5);
        assert_eq!(stage.bot_queue.len(), 3);
    }
}
