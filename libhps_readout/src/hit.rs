use serde::{Deserialize, Serialize};

/// One FADC pulse integral before calibration: crystal address, summed ADC
/// counts (pedestal included), and the pulse time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawCalorimeterHit {
    pub ix: i8,
    pub iy: i8,
    pub adc_sum: u32,
    pub time_ns: f64,
}

/// A calibrated calorimeter hit in physics units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalorimeterHit {
    pub ix: i8,
    pub iy: i8,
    pub energy_mev: f64,
    pub time_ns: f64,
}
