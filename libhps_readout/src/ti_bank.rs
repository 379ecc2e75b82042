use serde::{Deserialize, Serialize};

use super::bank::TaggedBank;
use super::constants::{CLOCK_TICK_NS, TI_BANK_LENGTH, TI_BANK_TAG};
use super::error::DecodeError;

/// Decoded Trigger Interface bank.
///
/// The TI issues one fixed four-word bank per readout: a trigger-type
/// bitmask in word 0 and a 48-bit timestamp split across words 2 and 3.
/// Word 1 is reserved by the hardware and ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TiRecord {
    /// Trigger timestamp in nanoseconds (the hardware counts 4 ns ticks).
    pub time_ns: u64,
    pub singles0: bool,
    pub singles1: bool,
    pub pairs0: bool,
    pub pairs1: bool,
    pub calib: bool,
    pub pulser: bool,
}

impl TryFrom<&TaggedBank> for TiRecord {
    type Error = DecodeError;

    fn try_from(bank: &TaggedBank) -> Result<Self, Self::Error> {
        let words = bank.words();
        if words.len() != TI_BANK_LENGTH {
            return Err(DecodeError::BadLength {
                tag: bank.tag(),
                got: words.len(),
                expected: TI_BANK_LENGTH,
            });
        }

        let word0 = words[0] as u32;
        // Words 2 and 3 hold the tick counter: word 2 is the low 32 bits,
        // the low 16 bits of word 3 are the high bits.
        let low = words[2] as u32 as u64;
        let high = (words[3] as u32 & 0xFFFF) as u64;
        let ticks = (high << 32) | low;

        Ok(TiRecord {
            time_ns: CLOCK_TICK_NS * ticks,
            singles0: (word0 >> 24) & 0x1 == 1,
            singles1: (word0 >> 25) & 0x1 == 1,
            pairs0: (word0 >> 26) & 0x1 == 1,
            pairs1: (word0 >> 27) & 0x1 == 1,
            calib: (word0 >> 28) & 0x1 == 1,
            pulser: (word0 >> 29) & 0x1 == 1,
        })
    }
}

impl TiRecord {
    /// Build the four-word hardware bank for this record, the inverse of
    /// the decode. The timestamp is truncated to whole ticks.
    pub fn to_bank(&self) -> TaggedBank {
        let mut word0: u32 = 0;
        for (bit, flag) in [
            self.singles0,
            self.singles1,
            self.pairs0,
            self.pairs1,
            self.calib,
            self.pulser,
        ]
        .iter()
        .enumerate()
        {
            if *flag {
                word0 |= 1 << (24 + bit);
            }
        }
        let ticks = self.time_ns / CLOCK_TICK_NS;
        let words = [
            word0 as i32,
            0,
            (ticks & 0xFFFF_FFFF) as u32 as i32,
            ((ticks >> 32) & 0xFFFF) as i32,
        ];
        TaggedBank::new(TI_BANK_TAG, &words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_all_flags() {
        // All six flag bits set, tick counter = 100.
        let words = [0b111111 << 24, 0, 100, 0];
        let bank = TaggedBank::new(TI_BANK_TAG, &words);
        let record = TiRecord::try_from(&bank).unwrap();
        assert!(record.singles0);
        assert!(record.singles1);
        assert!(record.pairs0);
        assert!(record.pairs1);
        assert!(record.calib);
        assert!(record.pulser);
        assert_eq!(record.time_ns, 400);
    }

    #[test]
    fn test_decode_split_timestamp() {
        // High bits live in the low half of word 3.
        let words = [0, 0, 0x0000_0001, 0x0001];
        let bank = TaggedBank::new(TI_BANK_TAG, &words);
        let record = TiRecord::try_from(&bank).unwrap();
        assert_eq!(record.time_ns, 4 * ((1_u64 << 32) | 1));
    }

    #[test]
    fn test_bad_length() {
        let bank = TaggedBank::new(TI_BANK_TAG, &[0, 0, 0]);
        match TiRecord::try_from(&bank) {
            Err(DecodeError::BadLength { got: 3, expected: 4, .. }) => (),
            other => panic!("expected BadLength, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_inverse() {
        let record = TiRecord {
            time_ns: 4 * 0x1234_5678_9abc,
            singles0: true,
            pairs1: true,
            pulser: true,
            ..Default::default()
        };
        let decoded = TiRecord::try_from(&record.to_bank()).unwrap();
        assert_eq!(decoded, record);
    }
}
