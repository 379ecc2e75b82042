use std::path::PathBuf;
use thiserror::Error;

use super::run_status::RunStatus;

#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("Bank 0x{tag:x} has {got} words; expected exactly {expected}")]
    BadLength { tag: u32, got: usize, expected: usize },
    #[error("Bank 0x{tag:x} ends at word {index} in the middle of a two-word field")]
    Truncated { tag: u32, index: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection {0} has already been registered for this run")]
    AlreadyRegistered(String),
    #[error("Collection {0} is not registered")]
    UnknownCollection(String),
    #[error("Collection {collection} holds {expected}, not {found}")]
    TypeMismatch {
        collection: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Insert into {collection} at t={given} precedes the newest block at t={last}")]
    OutOfOrderInsert {
        collection: String,
        last: f64,
        given: f64,
    },
    #[error("Insert into {0} after end of run")]
    RunClosed(String),
    #[error("Failed to serialize a window of collection {0}: {1}")]
    WindowSerialization(String, #[source] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage {stage} depends on collection {collection}, which no earlier stage produces")]
    UnknownDependency { stage: String, collection: String },
    #[error("Pipeline stage failed due to store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum BankStreamError {
    #[error("Bank stream failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Bank stream ended in the middle of a bank record")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum EventWriterError {
    #[error("EventWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("EventWriter failed to serialize an event: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to pipeline error: {0}")]
    PipelineError(#[from] PipelineError),
    #[error("Processor failed due to store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Processor failed due to bank stream error: {0}")]
    BankError(#[from] BankStreamError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to EventWriter error: {0}")]
    WriterError(#[from] EventWriterError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<RunStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
