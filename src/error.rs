//! Aggregated error type for the root crate (§7 "Error handling design").
//!
//! Each component crate owns its own closed error enum; this crate adds
//! only the errors that arise from wiring them together (unknown signal or
//! map ids, a map requested on a device that doesn't own the destination)
//! and aggregates the rest via `#[from]`, following the teacher's
//! `sem_os_core::error::SemOsError` pattern of one umbrella enum per binary
//! boundary rather than per call site.

use thiserror::Error;

use mapper_types::SignalId;

#[derive(Debug, Error)]
pub enum MapperError {
    #[error(transparent)]
    Compile(#[from] mapper_expr::CompileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown signal {0}")]
    UnknownSignal(SignalId),

    #[error("unknown map id {0}")]
    UnknownMap(u64),

    #[error("create_map must be called on the device that owns the destination signal {0}")]
    NotDestinationOwner(SignalId),

    #[error("source-processed maps must have exactly one source, got {0}")]
    SourceProcessedMustBeSingleSource(usize),

    #[error("unknown device name {0}")]
    UnknownDevice(String),

    #[error(transparent)]
    Transport(#[from] mapper_transport::TransportError),
}

/// Mirrors the teacher's `validator.rs` shape: a small, closed enum
/// produced only by `DeviceConfig::validate`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device prefix must not be empty")]
    EmptyPrefix,

    #[error("num_signal_groups must be at least 1")]
    NoSignalGroups,
}
