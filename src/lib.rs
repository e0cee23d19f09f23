//! A peer-to-peer distributed signal mapping library: devices discover
//! each other over a shared bus, negotiate directed dataflow edges
//! ("maps") between their signals, and evaluate those maps cooperatively
//! on whichever device a map's `process_location` names.
//!
//! The public surface is small on purpose: construct a [`Device`], add
//! [`Signal`]s to it via [`Device::add_signal`], connect them with
//! [`Device::create_map`], and drive everything forward by calling
//! [`Device::poll`] on whatever schedule the embedder prefers. Everything
//! else (name allocation, OSC-style wire messages, the expression
//! compiler and VM, per-map instance history) lives in its own crate
//! under `crates/` and is re-exported here only where an embedder needs
//! to name a type directly.

mod config;
mod device;
mod error;
mod map;
mod signal;

pub use config::DeviceConfig;
pub use device::Device;
pub use error::{ConfigError, MapperError};
pub use map::{Map, MapRole};
pub use signal::Signal;

pub use mapper_expr::{CompileError, InputSig};
pub use mapper_router::{MapId, SlotId};
pub use mapper_transport::{
    Bus, BusRegistry, Clock, InProcessBus, InProcessClock, ManualClock, OscMessage, OscValue,
    TransportError,
};
pub use mapper_types::{
    DeviceId, DeviceStatus, Direction, Gid, Lid, MapStatus, ProcessLocation, ScalarType,
    ScalarValue, SignalId, Timetag, Vector,
};
