use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

use super::error::EventWriterError;

/// One triggered readout event, ready for serialization: the event header
/// plus every persistent collection's in-window slice.
#[derive(Debug, Serialize)]
pub struct TriggeredEvent {
    pub event_number: u32,
    /// Event timestamp in nanoseconds, rounded to the 4 ns detector clock.
    pub timestamp_ns: u64,
    /// Name of the trigger stage that fired.
    pub source: String,
    pub collections: BTreeMap<String, serde_yaml::Value>,
}

/// Writes triggered events as a YAML document stream.
///
/// The on-disk event format is a debugging sidecar, not a physics data
/// format; downstream consumers read collections out of the store instead.
#[derive(Debug)]
pub struct EventWriter<W: Write> {
    inner: W,
    events_written: u64,
}

impl<W: Write> EventWriter<W> {
    pub fn new(inner: W) -> Self {
        EventWriter {
            inner,
            events_written: 0,
        }
    }

    pub fn write_event(&mut self, event: &TriggeredEvent) -> Result<(), EventWriterError> {
        self.inner.write_all(b"---\n")?;
        serde_yaml::to_writer(&mut self.inner, event)?;
        self.events_written += 1;
        Ok(())
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    pub fn close(mut self) -> Result<(), EventWriterError> {
        self.inner.flush()?;
        Ok(())
    }
}
