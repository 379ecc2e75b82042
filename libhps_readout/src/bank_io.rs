use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};

use super::bank::TaggedBank;
use super::error::BankStreamError;

/// Writes tagged banks to a byte stream.
///
/// The stream format is deliberately minimal: little-endian
/// `tag u32, word count u32, words i32...` per bank, with no container
/// framing. It exists so the simulated DAQ output can be replayed through
/// the decoders; it is not an EVIO file implementation.
#[derive(Debug)]
pub struct BankWriter<W: Write> {
    inner: W,
    banks_written: u64,
}

impl<W: Write> BankWriter<W> {
    pub fn new(inner: W) -> Self {
        BankWriter {
            inner,
            banks_written: 0,
        }
    }

    pub fn write_bank(&mut self, bank: &TaggedBank) -> Result<(), BankStreamError> {
        self.inner.write_u32::<LittleEndian>(bank.tag())?;
        self.inner.write_u32::<LittleEndian>(bank.words().len() as u32)?;
        for word in bank.words() {
            self.inner.write_i32::<LittleEndian>(*word)?;
        }
        self.banks_written += 1;
        Ok(())
    }

    pub fn banks_written(&self) -> u64 {
        self.banks_written
    }

    pub fn flush(&mut self) -> Result<(), BankStreamError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Reads tagged banks back from a byte stream produced by [`BankWriter`].
#[derive(Debug)]
pub struct BankReader<R: Read> {
    inner: R,
}

impl<R: Read> BankReader<R> {
    pub fn new(inner: R) -> Self {
        BankReader { inner }
    }

    /// Get the next bank in the stream.
    ///
    /// Returns `Ok(None)` at a clean end of stream. A stream that ends
    /// inside a bank record is an error, not an end.
    pub fn next_bank(&mut self) -> Result<Option<TaggedBank>, BankStreamError> {
        let tag = match self.inner.read_u32::<LittleEndian>() {
            Ok(tag) => tag,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(BankStreamError::IOError(e)),
        };
        let count = Self::must_read(self.inner.read_u32::<LittleEndian>())?;
        let mut words = Vec::with_capacity(count as usize);
        for _ in 0..count {
            words.push(Self::must_read(self.inner.read_i32::<LittleEndian>())?);
        }
        Ok(Some(TaggedBank::new(tag, &words)))
    }

    fn must_read<T>(result: std::io::Result<T>) -> Result<T, BankStreamError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(BankStreamError::Truncated),
            Err(e) => Err(BankStreamError::IOError(e)),
        }
    }
}
