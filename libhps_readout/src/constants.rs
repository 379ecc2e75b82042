//! Hardware constants for the trigger-bank formats and the readout clock.

/// EVIO bank tag of the Trigger Interface (TI) board.
pub const TI_BANK_TAG: u32 = 0xe10a;
/// EVIO bank tag of the Sub-System Processor (SSP) board.
pub const SSP_BANK_TAG: u32 = 0xe10c;

/// The TI bank is always exactly four payload words.
pub const TI_BANK_LENGTH: usize = 4;

// SSP word-type discriminators, bits 27-31 of each payload word.
pub const WORD_TYPE_BLOCK_HEADER: u32 = 0x10;
pub const WORD_TYPE_BLOCK_TRAILER: u32 = 0x11;
pub const WORD_TYPE_EVENT_HEADER: u32 = 0x12;
pub const WORD_TYPE_TRIGGER_TIME: u32 = 0x13;
pub const WORD_TYPE_CLUSTER: u32 = 0x14;
pub const WORD_TYPE_TRIGGER: u32 = 0x15;

// SSP trigger type codes, bits 23-26 of a trigger word.
pub const TRIG_TYPE_SINGLES0_TOP: u8 = 0;
pub const TRIG_TYPE_SINGLES0_BOT: u8 = 1;
pub const TRIG_TYPE_SINGLES1_TOP: u8 = 2;
pub const TRIG_TYPE_SINGLES1_BOT: u8 = 3;
pub const TRIG_TYPE_PAIR0: u8 = 4;
pub const TRIG_TYPE_PAIR1: u8 = 5;
pub const TRIG_TYPE_COSMIC_TOP: u8 = 6;
pub const TRIG_TYPE_COSMIC_BOT: u8 = 7;

/// The detector clock ticks at 4 ns; bank time fields count ticks.
pub const CLOCK_TICK_NS: u64 = 4;

/// Length of one beam bunch in nanoseconds. The global logical clock
/// advances by one bunch per event loop tick.
pub const BEAM_BUNCH_NS: f64 = 2.0;

/// Span of one basic readout cycle in nanoseconds (one clock tick).
pub const READOUT_CYCLE_NS: f64 = 4.0;

// Calorimeter crystal index ranges. There is no column or row zero.
pub const ECAL_IX_MIN: i8 = -23;
pub const ECAL_IX_MAX: i8 = 23;
pub const ECAL_IY_MIN: i8 = -5;
pub const ECAL_IY_MAX: i8 = 5;
