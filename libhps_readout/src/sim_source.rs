use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::constants::READOUT_CYCLE_NS;
use super::data_store::WindowedDataStore;
use super::error::PipelineError;
use super::hit::RawCalorimeterHit;
use super::stage::{CycleOutcome, PipelineStage};

/// Collection name of the uncalibrated FADC hits.
pub const RAW_HIT_COLLECTION: &str = "EcalRawHits";

/// Stands in for the FADC front end when no real data source is attached:
/// emits pseudo-random pulse integrals over the crystal array, one readout
/// cycle at a time. Seeded, so a run is reproducible from its config.
pub struct SimHitSource {
    /// Mean number of hits per readout cycle.
    occupancy: f64,
    pedestal: f64,
    rng: StdRng,
    local_time: f64,
    deps: Vec<String>,
}

impl SimHitSource {
    pub fn new(occupancy: f64, pedestal: f64, seed: u64) -> Self {
        SimHitSource {
            occupancy,
            pedestal,
            rng: StdRng::seed_from_u64(seed),
            local_time: 0.0,
            deps: Vec::new(),
        }
    }

    fn random_hit(&mut self) -> RawCalorimeterHit {
        // No crystal row or column zero; column -1 is skipped as well since
        // the SSP cluster field cannot represent it.
        let mut ix: i8 = self.rng.gen_range(-23..=21);
        if ix >= -1 {
            ix += 2;
        }
        let mut iy: i8 = self.rng.gen_range(-5..=4);
        if iy >= 0 {
            iy += 1;
        }
        RawCalorimeterHit {
            ix,
            iy,
            adc_sum: self.pedestal as u32 + self.rng.gen_range(0..4000),
            time_ns: self.local_time,
        }
    }
}

impl PipelineStage for SimHitSource {
    fn name(&self) -> &str {
        "SimHitSource"
    }

    fn dependencies(&self) -> &[String] {
        &self.deps
    }

    fn time_displacement(&self) -> f64 {
        0.0
    }

    fn register(&mut self, store: &mut WindowedDataStore) -> Result<(), PipelineError> {
        store.register::<RawCalorimeterHit>(RAW_HIT_COLLECTION, false, None, None)?;
        Ok(())
    }

    fn outputs(&self) -> Vec<String> {
        vec![RAW_HIT_COLLECTION.to_string()]
    }

    fn process(&mut self, store: &mut WindowedDataStore) -> Result<CycleOutcome, PipelineError> {
        // A source has no dependencies but still must not run ahead of the
        // global clock.
        if self.local_time + READOUT_CYCLE_NS > store.current_time() {
            return Ok(CycleOutcome::Skipped);
        }

        let mut hits = Vec::new();
        let mut expected = self.occupancy;
        while expected > 0.0 {
            if self.rng.gen_bool(expected.min(1.0)) {
                hits.push(self.random_hit());
            }
            expected -= 1.0;
        }

        store.insert(RAW_HIT_COLLECTION, self.local_time, hits)?;
        self.local_time += READOUT_CYCLE_NS;
        Ok(CycleOutcome::Ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_waits_for_clock() {
        let mut store = WindowedDataStore::new();
        let mut source = SimHitSource::new(1.0, 100.0, 7);
        source.register(&mut store).unwrap();
        assert_eq!(source.process(&mut store).unwrap(), CycleOutcome::Skipped);

        store.advance_time(4.0);
        assert_eq!(source.process(&mut store).unwrap(), CycleOutcome::Ran);
        assert_eq!(source.process(&mut store).unwrap(), CycleOutcome::Skipped);
    }

    #[test]
    fn test_hits_land_in_valid_crystals() {
        let mut store = WindowedDataStore::new();
        let mut source = SimHitSource::new(4.0, 100.0, 7);
        source.register(&mut store).unwrap();
        store.advance_time(400.0);
        for _ in 0..100 {
            source.process(&mut store).unwrap();
        }
        let hits: Vec<RawCalorimeterHit> = store.query(RAW_HIT_COLLECTION, 0.0, 400.0).unwrap();
        assert!(!hits.is_empty());
        for hit in hits {
            assert!(hit.ix != 0 && hit.ix != -1);
            assert!((-23..=23).contains(&hit.ix));
            assert!(hit.iy != 0);
            assert!((-5..=5).contains(&hit.iy));
            assert!(hit.adc_sum >= 100);
        }
    }
}
