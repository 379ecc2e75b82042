use serde::{Deserialize, Serialize};

use super::bank::TaggedBank;
use super::constants::*;
use super::error::DecodeError;
use super::ssp_cluster::{decode_ix, decode_iy, encode_ix, encode_iy, SspCluster};
use super::ssp_trigger::SspTrigger;

/// Decoded Sub-System Processor bank.
///
/// The SSP bank is variable length: every payload word carries a 5-bit
/// type discriminator in its top bits, and the decoder scans word by word,
/// dispatching on that type. Trigger-time and cluster data span two words;
/// the second word of each pair is consumed together with the first and
/// never classified on its own.
///
/// Triggers and clusters are kept in bank-encounter order. The hardware
/// does not promise time ordering inside a bank and the decoder does not
/// impose one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SspRecord {
    /// 27-bit event number from the event header word.
    pub event_number: u32,
    /// 48-bit trigger timestamp exactly as decoded, in detector ticks.
    pub trigger_time: u64,
    pub triggers: Vec<SspTrigger>,
    pub clusters: Vec<SspCluster>,
    /// Count of trigger words whose type code the decoder did not know.
    /// Such words still produce generic records; this is the diagnostic.
    pub unknown_types: u32,
}

impl TryFrom<&TaggedBank> for SspRecord {
    type Error = DecodeError;

    fn try_from(bank: &TaggedBank) -> Result<Self, Self::Error> {
        let words = bank.words();
        let mut record = SspRecord::default();

        let mut i = 0;
        while i < words.len() {
            let word = words[i] as u32;
            match (word >> 27) & 0x1F {
                WORD_TYPE_EVENT_HEADER => {
                    record.event_number = word & 0x7FF_FFFF;
                    i += 1;
                }
                WORD_TYPE_TRIGGER_TIME => {
                    // Low 24 bits here, high 24 bits in the next word.
                    let next = Self::second_word(bank, words, i)?;
                    record.trigger_time =
                        ((next & 0xFF_FFFF) as u64) << 24 | (word & 0xFF_FFFF) as u64;
                    i += 2;
                }
                WORD_TYPE_TRIGGER => {
                    let code = ((word >> 23) & 0xF) as u8;
                    let cut_bits = ((word >> 16) & 0x7F) as u8;
                    let time_ns = (word & 0x3FF) * CLOCK_TICK_NS as u32;
                    let trigger = SspTrigger::from_type_code(code, time_ns, cut_bits);
                    if trigger.is_unknown() {
                        log::warn!(
                            "SSP bank trigger word {} carries unknown type code {}",
                            i,
                            code
                        );
                        record.unknown_types += 1;
                    }
                    record.triggers.push(trigger);
                    i += 1;
                }
                WORD_TYPE_CLUSTER => {
                    let next = Self::second_word(bank, words, i)?;
                    record.clusters.push(SspCluster {
                        ix: decode_ix(word & 0x3F),
                        iy: decode_iy((word >> 6) & 0xF),
                        energy_mev: (word >> 10) & 0x1FFF,
                        hit_count: ((word >> 23) & 0xF) as u8,
                        time_ns: (next & 0x3FF) * CLOCK_TICK_NS as u32,
                    });
                    i += 2;
                }
                // Block headers, trailers, and anything newer than this
                // decoder are passed over without comment.
                _ => i += 1,
            }
        }

        Ok(record)
    }
}

impl SspRecord {
    /// Trigger timestamp converted to nanoseconds.
    pub fn trigger_time_ns(&self) -> u64 {
        CLOCK_TICK_NS * self.trigger_time
    }

    fn second_word(bank: &TaggedBank, words: &[i32], i: usize) -> Result<u32, DecodeError> {
        match words.get(i + 1) {
            Some(word) => Ok(*word as u32),
            None => Err(DecodeError::Truncated {
                tag: bank.tag(),
                index: i,
            }),
        }
    }

    /// Build the hardware bank for this record, the inverse of the decode.
    ///
    /// A block header and trailer frame the payload the way the firmware
    /// emits them; both are skipped on decode. Cluster and trigger times
    /// are truncated to their 10-bit tick fields, so callers must rebase
    /// times to the readout window before encoding.
    pub fn to_bank(&self) -> TaggedBank {
        let mut words: Vec<i32> = Vec::with_capacity(
            4 + self.triggers.len() + 2 * self.clusters.len() + 1,
        );
        words.push((WORD_TYPE_BLOCK_HEADER << 27 | 1) as i32);
        words.push((WORD_TYPE_EVENT_HEADER << 27 | (self.event_number & 0x7FF_FFFF)) as i32);
        words.push((WORD_TYPE_TRIGGER_TIME << 27 | (self.trigger_time & 0xFF_FFFF) as u32) as i32);
        words.push(((self.trigger_time >> 24) & 0xFF_FFFF) as u32 as i32);
        for trigger in self.triggers.iter() {
            let ticks = trigger.time_ns / CLOCK_TICK_NS as u32;
            words.push(
                (WORD_TYPE_TRIGGER << 27
                    | (trigger.type_code() as u32) << 23
                    | (trigger.cut_bits as u32 & 0x7F) << 16
                    | (ticks & 0x3FF)) as i32,
            );
        }
        for cluster in self.clusters.iter() {
            let ticks = cluster.time_ns / CLOCK_TICK_NS as u32;
            words.push(
                (WORD_TYPE_CLUSTER << 27
                    | (cluster.hit_count as u32 & 0xF) << 23
                    | (cluster.energy_mev & 0x1FFF) << 10
                    | encode_iy(cluster.iy) << 6
                    | encode_ix(cluster.ix)) as i32,
            );
            words.push((ticks & 0x3FF) as i32);
        }
        words.push((WORD_TYPE_BLOCK_TRAILER << 27 | (words.len() as u32 + 1)) as i32);
        TaggedBank::new(SSP_BANK_TAG, &words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssp_trigger::SspTriggerKind;

    fn trigger_word(code: u32, cuts: u32, ticks: u32) -> i32 {
        (WORD_TYPE_TRIGGER << 27 | code << 23 | cuts << 16 | ticks) as i32
    }

    fn cluster_words(hits: u32, energy: u32, iy: u32, ix: u32, ticks: u32) -> [i32; 2] {
        [
            (WORD_TYPE_CLUSTER << 27 | hits << 23 | energy << 10 | iy << 6 | ix) as i32,
            ticks as i32,
        ]
    }

    #[test]
    fn test_decode_full_bank() {
        let cluster = cluster_words(3, 1500, 0b1000, 0b100000, 25);
        let words = [
            (WORD_TYPE_BLOCK_HEADER << 27 | 1) as i32,
            (WORD_TYPE_EVENT_HEADER << 27 | 42) as i32,
            (WORD_TYPE_TRIGGER_TIME << 27 | 0x00_0001) as i32,
            0x00_0002,
            trigger_word(TRIG_TYPE_PAIR0 as u32, 0b0011, 10),
            cluster[0],
            cluster[1],
            (WORD_TYPE_BLOCK_TRAILER << 27 | 8) as i32,
        ];
        let bank = TaggedBank::new(SSP_BANK_TAG, &words);
        let record = SspRecord::try_from(&bank).unwrap();

        assert_eq!(record.event_number, 42);
        assert_eq!(record.trigger_time, (2 << 24) | 1);
        assert_eq!(record.trigger_time_ns(), 4 * ((2 << 24) | 1));
        assert_eq!(record.unknown_types, 0);

        assert_eq!(record.triggers.len(), 1);
        let trigger = &record.triggers[0];
        assert_eq!(trigger.kind, SspTriggerKind::Pair { index: 0 });
        assert_eq!(trigger.time_ns, 40);
        assert!(trigger.passed_energy_sum());
        assert!(trigger.passed_energy_difference());

        assert_eq!(record.clusters.len(), 1);
        let cluster = &record.clusters[0];
        assert_eq!(cluster.ix, -2);
        assert_eq!(cluster.iy, -1);
        assert_eq!(cluster.energy_mev, 1500);
        assert_eq!(cluster.hit_count, 3);
        assert_eq!(cluster.time_ns, 100);
    }

    #[test]
    fn test_encounter_order_preserved() {
        // A later word with an earlier time must stay later in the record.
        let words = [
            trigger_word(TRIG_TYPE_SINGLES0_TOP as u32, 0b111, 50),
            trigger_word(TRIG_TYPE_SINGLES1_TOP as u32, 0b111, 10),
        ];
        let bank = TaggedBank::new(SSP_BANK_TAG, &words);
        let record = SspRecord::try_from(&bank).unwrap();
        assert_eq!(record.triggers[0].time_ns, 200);
        assert_eq!(record.triggers[1].time_ns, 40);
    }

    #[test]
    fn test_unknown_type_code_is_not_fatal() {
        let words = [trigger_word(12, 0, 1)];
        let bank = TaggedBank::new(SSP_BANK_TAG, &words);
        let record = SspRecord::try_from(&bank).unwrap();
        assert_eq!(record.unknown_types, 1);
        assert_eq!(record.triggers.len(), 1);
        assert_eq!(
            record.triggers[0].kind,
            SspTriggerKind::Unknown { code: 12 }
        );
    }

    #[test]
    fn test_truncated_cluster_at_tail() {
        let cluster = cluster_words(1, 100, 1, 1, 0);
        let words = [cluster[0]];
        let bank = TaggedBank::new(SSP_BANK_TAG, &words);
        match SspRecord::try_from(&bank) {
            Err(DecodeError::Truncated { index: 0, .. }) => (),
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_time_at_tail() {
        let words = [(WORD_TYPE_TRIGGER_TIME << 27 | 5) as i32];
        let bank = TaggedBank::new(SSP_BANK_TAG, &words);
        assert!(matches!(
            SspRecord::try_from(&bank),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unrecognized_words_skipped() {
        // A lone block trailer and a reserved discriminator decode to an
        // empty record rather than an error.
        let words = [
            (WORD_TYPE_BLOCK_TRAILER << 27 | 2) as i32,
            (0x1E_u32 << 27) as i32,
        ];
        let bank = TaggedBank::new(SSP_BANK_TAG, &words);
        let record = SspRecord::try_from(&bank).unwrap();
        assert_eq!(record, SspRecord::default());
    }

    #[test]
    fn test_record_bank_round_trip() {
        let record = SspRecord {
            event_number: 90210,
            trigger_time: 0x7654_3210_ab,
            triggers: vec![
                SspTrigger::from_type_code(TRIG_TYPE_SINGLES0_BOT, 80, 0b111),
                SspTrigger::from_type_code(TRIG_TYPE_COSMIC_TOP, 120, 0),
            ],
            clusters: vec![SspCluster {
                ix: -17,
                iy: 4,
                energy_mev: 2250,
                hit_count: 5,
                time_ns: 96,
            }],
            unknown_types: 0,
        };
        let decoded = SspRecord::try_from(&record.to_bank()).unwrap();
        assert_eq!(decoded, record);
    }
}
