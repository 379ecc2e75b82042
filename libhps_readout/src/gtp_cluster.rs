use bit_set::BitSet;
use fxhash::FxHashMap;

use super::constants::{ECAL_IX_MAX, ECAL_IX_MIN, ECAL_IY_MAX, ECAL_IY_MIN, READOUT_CYCLE_NS};
use super::data_store::WindowedDataStore;
use super::ecal_converter::CORRECTED_HIT_COLLECTION;
use super::error::PipelineError;
use super::hit::CalorimeterHit;
use super::ssp_cluster::SspCluster;
use super::stage::{CycleOutcome, PipelineStage};

/// Collection name of the GTP clusters.
pub const CLUSTER_COLLECTION: &str = "EcalClustersGTP";

const N_COLUMNS: usize = (ECAL_IX_MAX - ECAL_IX_MIN + 1) as usize;
const N_ROWS: usize = (ECAL_IY_MAX - ECAL_IY_MIN + 1) as usize;

/// Software rendition of the GTP clustering algorithm: within one readout
/// cycle, a crystal whose energy is not exceeded by any of its eight
/// neighbors seeds a cluster of itself plus those neighbors.
pub struct GtpClusterStage {
    /// Minimum seed crystal energy for a cluster to form, in MeV.
    seed_threshold_mev: f64,
    time_displacement: f64,
    /// Readout window overrides for the cluster collection; `None` falls
    /// back to the loop-level window.
    window_before: Option<f64>,
    window_after: Option<f64>,
    local_time: f64,
    deps: Vec<String>,
}

impl GtpClusterStage {
    pub fn new(
        seed_threshold_mev: f64,
        time_displacement: f64,
        window_before: Option<f64>,
        window_after: Option<f64>,
    ) -> Self {
        GtpClusterStage {
            seed_threshold_mev,
            time_displacement,
            window_before,
            window_after,
            local_time: 0.0,
            deps: vec![CORRECTED_HIT_COLLECTION.to_string()],
        }
    }

    fn cell_index(ix: i8, iy: i8) -> usize {
        (ix - ECAL_IX_MIN) as usize + N_COLUMNS * (iy - ECAL_IY_MIN) as usize
    }

    /// Sum hits crystal by crystal and mark the occupied cells.
    fn accumulate(hits: &[CalorimeterHit]) -> (FxHashMap<(i8, i8), f64>, BitSet) {
        let mut cells: FxHashMap<(i8, i8), f64> = FxHashMap::default();
        let mut occupied = BitSet::with_capacity(N_COLUMNS * N_ROWS);
        for hit in hits.iter() {
            *cells.entry((hit.ix, hit.iy)).or_insert(0.0) += hit.energy_mev;
            occupied.insert(Self::cell_index(hit.ix, hit.iy));
        }
        (cells, occupied)
    }

    fn neighbors(ix: i8, iy: i8) -> impl Iterator<Item = (i8, i8)> {
        (-1..=1).flat_map(move |dx| {
            (-1..=1).filter_map(move |dy| {
                if dx == 0 && dy == 0 {
                    return None;
                }
                // Crystal indices skip zero in both coordinates.
                let mut nx = ix + dx;
                if nx == 0 {
                    nx += dx;
                }
                let mut ny = iy + dy;
                if ny == 0 {
                    ny += dy;
                }
                if (ECAL_IX_MIN..=ECAL_IX_MAX).contains(&nx)
                    && (ECAL_IY_MIN..=ECAL_IY_MAX).contains(&ny)
                {
                    Some((nx, ny))
                } else {
                    None
                }
            })
        })
    }
}

impl PipelineStage for GtpClusterStage {
    fn name(&self) -> &str {
        "GtpClusterStage"
    }

    fn dependencies(&self) -> &[String] {
        &self.deps
    }

    fn time_displacement(&self) -> f64 {
        self.time_displacement
    }

    fn register(&mut self, store: &mut WindowedDataStore) -> Result<(), PipelineError> {
        store.register::<SspCluster>(
            CLUSTER_COLLECTION,
            true,
            self.window_before,
            self.window_after,
        )?;
        Ok(())
    }

    fn outputs(&self) -> Vec<String> {
        vec![CLUSTER_COLLECTION.to_string()]
    }

    fn process(&mut self, store: &mut WindowedDataStore) -> Result<CycleOutcome, PipelineError> {
        let window_end = self.local_time + READOUT_CYCLE_NS;
        if !store.is_ready(CORRECTED_HIT_COLLECTION, window_end) {
            return Ok(CycleOutcome::Skipped);
        }

        let hits: Vec<CalorimeterHit> =
            store.query(CORRECTED_HIT_COLLECTION, self.local_time, window_end)?;
        let (cells, occupied) = Self::accumulate(&hits);

        let out_time = self.local_time + self.time_displacement;
        let mut clusters = Vec::new();
        for (&(ix, iy), &energy) in cells.iter() {
            if energy < self.seed_threshold_mev {
                continue;
            }
            let mut total = energy;
            let mut count: u8 = 1;
            let mut is_seed = true;
            for (nx, ny) in Self::neighbors(ix, iy) {
                if !occupied.contains(Self::cell_index(nx, ny)) {
                    continue;
                }
                let neighbor = cells[&(nx, ny)];
                if neighbor > energy {
                    is_seed = false;
                    break;
                }
                total += neighbor;
                count = count.saturating_add(1);
            }
            if is_seed {
                clusters.push(SspCluster {
                    ix,
                    iy,
                    energy_mev: (total.round() as u32).min(0x1FFF),
                    hit_count: count.min(0xF),
                    time_ns: out_time as u32,
                });
            }
        }
        // The map iteration order is arbitrary; keep the record order
        // deterministic for a given input window.
        clusters.sort_by_key(|c| (c.iy, c.ix));

        store.insert(CLUSTER_COLLECTION, out_time, clusters)?;
        self.local_time = window_end;
        Ok(CycleOutcome::Ran)
    }
}
