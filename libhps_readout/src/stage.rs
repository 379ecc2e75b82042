use super::data_store::WindowedDataStore;
use super::dead_time::DeadTimeVeto;
use super::error::PipelineError;

/// What a stage did with its cycle.
///
/// `Skipped` is not an error: it is a stage declining to run because some
/// dependency has not been populated far enough, and it will simply be
/// polled again on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Ran,
    Skipped,
}

/// One unit of work in the readout chain.
///
/// A stage declares the collections it reads, registers the collections it
/// writes, and carries its own local clock. Each call to `process` may
/// consume one local time window: the stage first checks every dependency
/// with [`WindowedDataStore::is_ready`] at the end of its window, and if
/// any is not ready it must return `Skipped` without consuming input,
/// producing output, or advancing its local clock. Output is inserted
/// tagged at the local time plus the stage's time displacement, modeling
/// the cable and processing latency of the hardware being emulated.
pub trait PipelineStage: Send {
    fn name(&self) -> &str;

    /// Collections this stage reads. Every name must be produced by a
    /// stage added to the loop earlier.
    fn dependencies(&self) -> &[String];

    /// The fixed latency between this stage's input time and the moment
    /// its output for that time exists, in nanoseconds.
    fn time_displacement(&self) -> f64;

    /// Register this stage's output collections.
    fn register(&mut self, store: &mut WindowedDataStore) -> Result<(), PipelineError>;

    /// Names of the collections this stage writes, for displacement
    /// bookkeeping in the run loop.
    fn outputs(&self) -> Vec<String>;

    /// Run one cycle against the store.
    fn process(&mut self, store: &mut WindowedDataStore) -> Result<CycleOutcome, PipelineError>;
}

/// A trigger decision emitted by a trigger stage, before queueing.
#[derive(Debug, Clone)]
pub struct TriggerDecision {
    /// The trigger time on the global clock, in nanoseconds.
    pub time: f64,
    /// The SSP trigger type code of the algorithm that fired.
    pub type_code: u8,
    /// Cut results as the hardware would report them.
    pub cut_bits: u8,
}

/// A stage that tests trigger conditions instead of producing collections.
///
/// Trigger stages are registered with the loop separately from production
/// stages. They read the store but never write it, and they must consult
/// the dead-time veto before emitting: a cycle whose cuts pass during dead
/// time produces nothing, and the opportunity is gone.
pub trait TriggerStage: Send {
    fn name(&self) -> &str;

    fn dependencies(&self) -> &[String];

    /// The latency between the data a decision is based on and the
    /// decision itself, in nanoseconds.
    fn time_displacement(&self) -> f64;

    /// Run one cycle. Returns a decision only when the cuts pass and the
    /// veto allows it; implementations record accepted triggers with the
    /// veto themselves.
    fn process(
        &mut self,
        store: &WindowedDataStore,
        veto: &mut DeadTimeVeto,
    ) -> Result<Option<TriggerDecision>, PipelineError>;
}
