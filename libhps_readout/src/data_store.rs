use fxhash::FxHashMap;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;

use super::error::StoreError;

/// A batch of values that entered a collection at one logical time.
#[derive(Debug, Clone)]
struct TimedBlock<T> {
    time: f64,
    items: Vec<T>,
}

/// Type-erased storage seam for one collection's timed blocks.
///
/// Each registered collection owns one buffer of a concrete element type;
/// typed access goes through `Any` downcasts, while the triggered readout
/// serializes windows through [`CollectionBuffer::window_to_value`] without
/// knowing the element type.
trait CollectionBuffer: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn element_type(&self) -> &'static str;
    fn last_time(&self) -> Option<f64>;
    fn prune(&mut self, cutoff: f64) -> usize;
    fn window_to_value(&self, from: f64, to: f64) -> Result<serde_yaml::Value, serde_yaml::Error>;
}

#[derive(Debug)]
struct TypedBuffer<T> {
    blocks: VecDeque<TimedBlock<T>>,
}

impl<T> Default for TypedBuffer<T> {
    fn default() -> Self {
        TypedBuffer {
            blocks: VecDeque::new(),
        }
    }
}

impl<T> TypedBuffer<T>
where
    T: Clone + Serialize + Send + 'static,
{
    fn collect(&self, from: f64, to: f64) -> Vec<T> {
        let mut out = Vec::new();
        for block in self.blocks.iter() {
            if block.time >= from && block.time < to {
                out.extend(block.items.iter().cloned());
            }
        }
        out
    }
}

impl<T> CollectionBuffer for TypedBuffer<T>
where
    T: Clone + Serialize + Send + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn element_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn last_time(&self) -> Option<f64> {
        self.blocks.back().map(|block| block.time)
    }

    fn prune(&mut self, cutoff: f64) -> usize {
        let mut dropped = 0;
        while let Some(front) = self.blocks.front() {
            if front.time >= cutoff {
                break;
            }
            dropped += self.blocks.pop_front().map_or(0, |block| block.items.len());
        }
        dropped
    }

    fn window_to_value(&self, from: f64, to: f64) -> Result<serde_yaml::Value, serde_yaml::Error> {
        serde_yaml::to_value(self.collect(from, to))
    }
}

/// Registration metadata plus the data buffer for one named collection.
struct ManagedCollection {
    persistent: bool,
    window_before: Option<f64>,
    window_after: Option<f64>,
    time_displacement: f64,
    closed: bool,
    buffer: Box<dyn CollectionBuffer>,
}

/// The central time-indexed store of the readout chain.
///
/// Every collection that passes between pipeline stages is registered here
/// once per run, appended to as the run progresses, and queried by time
/// range. The store also owns the single global logical clock; there is no
/// wall-clock coupling anywhere in the pipeline.
///
/// A collection moves through `Registered -> Receiving -> Closed`; inserts
/// must be non-decreasing in time within one collection, and any insert
/// after [`WindowedDataStore::close_run`] fails.
#[derive(Default)]
pub struct WindowedDataStore {
    collections: FxHashMap<String, ManagedCollection>,
    current_time: f64,
}

impl WindowedDataStore {
    pub fn new() -> Self {
        WindowedDataStore::default()
    }

    /// Register a collection of element type `T`. `window_before` and
    /// `window_after` override the loop-level readout window for this
    /// collection when data is written out on a trigger; `None` means use
    /// the defaults.
    pub fn register<T>(
        &mut self,
        name: &str,
        persistent: bool,
        window_before: Option<f64>,
        window_after: Option<f64>,
    ) -> Result<(), StoreError>
    where
        T: Clone + Serialize + Send + 'static,
    {
        self.register_produced::<T>(name, persistent, window_before, window_after, 0.0)
    }

    /// Register a collection together with its global time displacement:
    /// the total latency between a moment of truth time and the instant
    /// the producing stage has delivered data for that moment.
    pub fn register_produced<T>(
        &mut self,
        name: &str,
        persistent: bool,
        window_before: Option<f64>,
        window_after: Option<f64>,
        time_displacement: f64,
    ) -> Result<(), StoreError>
    where
        T: Clone + Serialize + Send + 'static,
    {
        if self.collections.contains_key(name) {
            return Err(StoreError::AlreadyRegistered(name.to_string()));
        }
        log::debug!(
            "Registered collection {} (persistent: {}, displacement: {} ns)",
            name,
            persistent,
            time_displacement
        );
        self.collections.insert(
            name.to_string(),
            ManagedCollection {
                persistent,
                window_before,
                window_after,
                time_displacement,
                closed: false,
                buffer: Box::new(TypedBuffer::<T>::default()),
            },
        );
        Ok(())
    }

    /// Append values to a collection at the given time. Within one
    /// collection insert times must be non-decreasing; violating that is a
    /// programming error in the calling stage and fails immediately.
    /// Inserting an empty batch is a no-op.
    pub fn insert<T>(&mut self, name: &str, time: f64, values: Vec<T>) -> Result<(), StoreError>
    where
        T: Clone + Serialize + Send + 'static,
    {
        if values.is_empty() {
            return Ok(());
        }
        let collection = self
            .collections
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))?;
        if collection.closed {
            return Err(StoreError::RunClosed(name.to_string()));
        }
        if let Some(last) = collection.buffer.last_time() {
            if time < last {
                return Err(StoreError::OutOfOrderInsert {
                    collection: name.to_string(),
                    last,
                    given: time,
                });
            }
        }
        let expected = collection.buffer.element_type();
        let buffer = collection
            .buffer
            .as_any_mut()
            .downcast_mut::<TypedBuffer<T>>()
            .ok_or_else(|| StoreError::TypeMismatch {
                collection: name.to_string(),
                expected,
                found: std::any::type_name::<T>(),
            })?;
        buffer.blocks.push_back(TimedBlock { time, items: values });
        Ok(())
    }

    /// Append values tagged at the current time corrected by the
    /// collection's registered displacement, i.e. at the truth time the
    /// values describe.
    pub fn insert_displaced<T>(&mut self, name: &str, values: Vec<T>) -> Result<(), StoreError>
    where
        T: Clone + Serialize + Send + 'static,
    {
        let displacement = self
            .collections
            .get(name)
            .map(|c| c.time_displacement)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))?;
        let time = self.current_time - displacement;
        self.insert(name, time, values)
    }

    /// All elements with time in `[from, to)`, in insertion order. A
    /// registered collection with no data in range yields an empty vector,
    /// not an error.
    pub fn query<T>(&self, name: &str, from: f64, to: f64) -> Result<Vec<T>, StoreError>
    where
        T: Clone + Serialize + Send + 'static,
    {
        let collection = self
            .collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))?;
        let buffer = collection
            .buffer
            .as_any()
            .downcast_ref::<TypedBuffer<T>>()
            .ok_or_else(|| StoreError::TypeMismatch {
                collection: name.to_string(),
                expected: collection.buffer.element_type(),
                found: std::any::type_name::<T>(),
            })?;
        Ok(buffer.collect(from, to))
    }

    /// Whether a collection's producer has delivered data covering `time`.
    ///
    /// This is the backpressure mechanism: enough global time must have
    /// passed for the producing stage, with its registered displacement, to
    /// have caught up with `time`. An unregistered name is simply not
    /// ready; consuming stages skip the cycle and retry next tick.
    pub fn is_ready(&self, name: &str, time: f64) -> bool {
        match self.collections.get(name) {
            Some(collection) => time <= self.current_time - collection.time_displacement,
            None => false,
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// The registered global time displacement, used by the run loop when
    /// chaining stage dependencies.
    pub fn time_displacement(&self, name: &str) -> Option<f64> {
        self.collections.get(name).map(|c| c.time_displacement)
    }

    pub fn set_time_displacement(&mut self, name: &str, displacement: f64) -> Result<(), StoreError> {
        match self.collections.get_mut(name) {
            Some(collection) => {
                collection.time_displacement = displacement;
                Ok(())
            }
            None => Err(StoreError::UnknownCollection(name.to_string())),
        }
    }

    /// The single global logical clock, in nanoseconds.
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Advance the logical clock. The clock only moves forward.
    pub fn advance_time(&mut self, delta: f64) {
        debug_assert!(delta >= 0.0, "the logical clock cannot run backwards");
        self.current_time += delta;
    }

    /// Drop every block older than `cutoff` from every collection.
    /// Returns the number of elements discarded.
    pub fn prune(&mut self, cutoff: f64) -> usize {
        self.collections
            .values_mut()
            .map(|collection| collection.buffer.prune(cutoff))
            .sum()
    }

    /// Every registered collection name, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the collections flagged persistent at registration, sorted.
    pub fn persistent_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .iter()
            .filter(|(_, c)| c.persistent)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Per-collection readout window overrides, if registered.
    pub fn readout_windows(&self, name: &str) -> (Option<f64>, Option<f64>) {
        match self.collections.get(name) {
            Some(c) => (c.window_before, c.window_after),
            None => (None, None),
        }
    }

    /// Serialize a collection's `[from, to)` window without knowing its
    /// element type, for the triggered event writer.
    pub fn collect_window(
        &self,
        name: &str,
        from: f64,
        to: f64,
    ) -> Result<serde_yaml::Value, StoreError> {
        let collection = self
            .collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))?;
        collection
            .buffer
            .window_to_value(from, to)
            .map_err(|e| StoreError::WindowSerialization(name.to_string(), e))
    }

    /// End-of-run teardown: no collection accepts data afterwards.
    pub fn close_run(&mut self) {
        for collection in self.collections.values_mut() {
            collection.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice_fails() {
        let mut store = WindowedDataStore::new();
        store.register::<u32>("EcalRawHits", false, None, None).unwrap();
        assert!(matches!(
            store.register::<u32>("EcalRawHits", false, None, None),
            Err(StoreError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_query_empty_collection() {
        let mut store = WindowedDataStore::new();
        store.register::<u32>("EcalRawHits", false, None, None).unwrap();
        let hits: Vec<u32> = store.query("EcalRawHits", 0.0, 100.0).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_query_unknown_collection() {
        let store = WindowedDataStore::new();
        assert!(matches!(
            store.query::<u32>("Nope", 0.0, 1.0),
            Err(StoreError::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_query_window_bounds() {
        let mut store = WindowedDataStore::new();
        store.register::<u32>("EcalRawHits", false, None, None).unwrap();
        store.insert("EcalRawHits", 0.0, vec![1_u32]).unwrap();
        store.insert("EcalRawHits", 4.0, vec![2_u32, 3]).unwrap();
        store.insert("EcalRawHits", 8.0, vec![4_u32]).unwrap();

        // Lower bound inclusive, upper bound exclusive, insertion order kept.
        let hits: Vec<u32> = store.query("EcalRawHits", 4.0, 8.0).unwrap();
        assert_eq!(hits, vec![2, 3]);
        let hits: Vec<u32> = store.query("EcalRawHits", 0.0, 12.0).unwrap();
        assert_eq!(hits, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_order_insert_rejected() {
        let mut store = WindowedDataStore::new();
        store.register::<u32>("EcalRawHits", false, None, None).unwrap();
        store.insert("EcalRawHits", 8.0, vec![1_u32]).unwrap();
        assert!(matches!(
            store.insert("EcalRawHits", 4.0, vec![2_u32]),
            Err(StoreError::OutOfOrderInsert { .. })
        ));
        // Equal times are fine; only regressions are rejected.
        store.insert("EcalRawHits", 8.0, vec![3_u32]).unwrap();
    }

    #[test]
    fn test_type_mismatch() {
        let mut store = WindowedDataStore::new();
        store.register::<u32>("EcalRawHits", false, None, None).unwrap();
        assert!(matches!(
            store.insert("EcalRawHits", 0.0, vec![1.5_f64]),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            store.query::<String>("EcalRawHits", 0.0, 1.0),
            Err(StoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_is_ready_tracks_displacement() {
        let mut store = WindowedDataStore::new();
        store
            .register_produced::<u32>("EcalClustersGTP", false, None, None, 12.0)
            .unwrap();
        store.advance_time(16.0);
        assert!(store.is_ready("EcalClustersGTP", 4.0));
        assert!(!store.is_ready("EcalClustersGTP", 4.1));
        // Unregistered names are not ready rather than an error.
        assert!(!store.is_ready("Missing", 0.0));
    }

    #[test]
    fn test_insert_displaced_lands_at_truth_time() {
        let mut store = WindowedDataStore::new();
        store
            .register_produced::<u32>("EcalClustersGTP", false, None, None, 12.0)
            .unwrap();
        store.advance_time(20.0);
        store.insert_displaced("EcalClustersGTP", vec![9_u32]).unwrap();
        let hits: Vec<u32> = store.query("EcalClustersGTP", 8.0, 8.1).unwrap();
        assert_eq!(hits, vec![9]);
    }

    #[test]
    fn test_insert_after_close_fails() {
        let mut store = WindowedDataStore::new();
        store.register::<u32>("EcalRawHits", false, None, None).unwrap();
        store.close_run();
        assert!(matches!(
            store.insert("EcalRawHits", 0.0, vec![1_u32]),
            Err(StoreError::RunClosed(_))
        ));
    }

    #[test]
    fn test_prune_drops_old_blocks() {
        let mut store = WindowedDataStore::new();
        store.register::<u32>("EcalRawHits", false, None, None).unwrap();
        store.insert("EcalRawHits", 0.0, vec![1_u32, 2]).unwrap();
        store.insert("EcalRawHits", 100.0, vec![3_u32]).unwrap();
        assert_eq!(store.prune(50.0), 2);
        let hits: Vec<u32> = store.query("EcalRawHits", 0.0, 200.0).unwrap();
        assert_eq!(hits, vec![3]);
    }

    #[test]
    fn test_empty_insert_is_noop() {
        let mut store = WindowedDataStore::new();
        store.register::<u32>("EcalRawHits", false, None, None).unwrap();
        store.insert("EcalRawHits", 100.0, Vec::<u32>::new()).unwrap();
        // An empty batch does not move the ordering watermark.
        store.insert("EcalRawHits", 0.0, vec![1_u32]).unwrap();
    }
}
