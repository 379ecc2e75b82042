use serde::{Deserialize, Serialize};

use super::constants::*;

/// Which half of the calorimeter a trigger fired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrateHalf {
    Top,
    Bottom,
}

/// The trigger algorithm a decoded SSP trigger word belongs to.
///
/// Type codes the decoder does not know map to `Unknown` rather than
/// failing the decode; production banks may carry codes newer than this
/// enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SspTriggerKind {
    Singles { index: u8, half: CrateHalf },
    Pair { index: u8 },
    Cosmic { half: CrateHalf },
    Unknown { code: u8 },
}

/// One decoded SSP trigger word: the algorithm that fired, the trigger
/// time, and the packed cut-result bits reported by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SspTrigger {
    pub kind: SspTriggerKind,
    /// Trigger time in nanoseconds (10-bit hardware field, 4 ns ticks).
    pub time_ns: u32,
    /// Seven cut-result bits; meaning depends on the trigger kind.
    pub cut_bits: u8,
}

impl SspTrigger {
    /// Map a 4-bit hardware type code onto a trigger record. Unknown codes
    /// yield a generic record so the rest of the bank still decodes.
    pub fn from_type_code(code: u8, time_ns: u32, cut_bits: u8) -> Self {
        let kind = match code {
            TRIG_TYPE_SINGLES0_TOP => SspTriggerKind::Singles {
                index: 0,
                half: CrateHalf::Top,
            },
            TRIG_TYPE_SINGLES0_BOT => SspTriggerKind::Singles {
                index: 0,
                half: CrateHalf::Bottom,
            },
            TRIG_TYPE_SINGLES1_TOP => SspTriggerKind::Singles {
                index: 1,
                half: CrateHalf::Top,
            },
            TRIG_TYPE_SINGLES1_BOT => SspTriggerKind::Singles {
                index: 1,
                half: CrateHalf::Bottom,
            },
            TRIG_TYPE_PAIR0 => SspTriggerKind::Pair { index: 0 },
            TRIG_TYPE_PAIR1 => SspTriggerKind::Pair { index: 1 },
            TRIG_TYPE_COSMIC_TOP => SspTriggerKind::Cosmic {
                half: CrateHalf::Top,
            },
            TRIG_TYPE_COSMIC_BOT => SspTriggerKind::Cosmic {
                half: CrateHalf::Bottom,
            },
            code => SspTriggerKind::Unknown { code },
        };
        SspTrigger {
            kind,
            time_ns,
            cut_bits,
        }
    }

    /// The 4-bit hardware type code for this trigger.
    pub fn type_code(&self) -> u8 {
        match self.kind {
            SspTriggerKind::Singles {
                index,
                half: CrateHalf::Top,
            } => 2 * index,
            SspTriggerKind::Singles {
                index,
                half: CrateHalf::Bottom,
            } => 2 * index + 1,
            SspTriggerKind::Pair { index } => TRIG_TYPE_PAIR0 + index,
            SspTriggerKind::Cosmic {
                half: CrateHalf::Top,
            } => TRIG_TYPE_COSMIC_TOP,
            SspTriggerKind::Cosmic {
                half: CrateHalf::Bottom,
            } => TRIG_TYPE_COSMIC_BOT,
            SspTriggerKind::Unknown { code } => code,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, SspTriggerKind::Unknown { .. })
    }

    // Singles cut results.
    pub fn passed_energy_min(&self) -> bool {
        self.cut_bits & 0x1 != 0
    }

    pub fn passed_energy_max(&self) -> bool {
        self.cut_bits & 0x2 != 0
    }

    pub fn passed_hit_count(&self) -> bool {
        self.cut_bits & 0x4 != 0
    }

    // Pair cut results.
    pub fn passed_energy_sum(&self) -> bool {
        self.cut_bits & 0x1 != 0
    }

    pub fn passed_energy_difference(&self) -> bool {
        self.cut_bits & 0x2 != 0
    }

    pub fn passed_energy_slope(&self) -> bool {
        self.cut_bits & 0x4 != 0
    }

    pub fn passed_coplanarity(&self) -> bool {
        self.cut_bits & 0x8 != 0
    }
}
