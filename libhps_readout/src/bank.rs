/// A tagged integer bank: the tag word of an EVIO bank plus its payload
/// words, detached from any container framing.
///
/// Banks are built fresh per decode call and never mutated afterwards. The
/// payload is stored as a defensive copy so a bank stays valid after the
/// reader buffer it came from is reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedBank {
    tag: u32,
    words: Vec<i32>,
}

impl TaggedBank {
    /// Wrap a tag and payload into a bank. No validation is performed here;
    /// length checks belong to the board-specific decoders.
    pub fn new(tag: u32, words: &[i32]) -> Self {
        TaggedBank {
            tag,
            words: words.to_vec(),
        }
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn words(&self) -> &[i32] {
        &self.words
    }

    /// Flatten the bank back into `[tag] ++ words`, the inverse of
    /// [`TaggedBank::new`].
    pub fn encode(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.words.len() + 1);
        out.push(self.tag as i32);
        out.extend_from_slice(&self.words);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let words = [0x12345678, -1, 0, i32::MIN, i32::MAX];
        let bank = TaggedBank::new(0xe10c, &words);
        let flat = bank.encode();
        assert_eq!(flat[0] as u32, 0xe10c);
        assert_eq!(&flat[1..], &words);
    }

    #[test]
    fn test_empty_payload() {
        let bank = TaggedBank::new(0xe10a, &[]);
        assert_eq!(bank.encode(), vec![0xe10a_u32 as i32]);
        assert!(bank.words().is_empty());
    }
}
