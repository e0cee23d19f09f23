//! Shared value types for the distributed signal-mapping core.
//!
//! This crate is the single source of truth for types crossing the boundary
//! between the ring buffers (`mapper-ring`), the expression engine
//! (`mapper-expr`), the ID-map table (`mapper-idmap`), and the graph/name
//! allocator (`mapper-graph`, `mapper-alloc`). Nothing here talks to a socket
//! or owns a collection of peers — it is pure value types plus the handful of
//! pure functions (name hashing, timetag arithmetic) that every other crate
//! needs identically.

mod ids;
mod properties;
mod time;
mod value;

pub use ids::{hash_name, DeviceId, Gid, Lid, SignalId};
pub use properties::{PropertyKey, PropertyValue, Properties};
pub use time::Timetag;
pub use value::{ScalarType, ScalarValue, Vector};

use serde::{Deserialize, Serialize};

/// Direction of a signal, from the point of view of its owning device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
    Both,
}

/// Which device evaluates a map's expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessLocation {
    Source,
    Destination,
}

/// Lifecycle of a map as it is negotiated over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapStatus {
    Staged,
    Ready,
    Active,
}

impl MapStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, MapStatus::Active)
    }
}

/// Lifecycle of a device as its ordinal is contested and then locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Staged,
    Ready,
}
