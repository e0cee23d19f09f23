//! Component H — graph and peer sync.
//!
//! A per-process replicated index of devices, signals, maps, and links,
//! updated by bus traffic observed in the root crate's poll loop. Owns the
//! storage for every record it indexes; `housekeeping` reclaims anything
//! unreferenced and past its sync timeout, matching the source's
//! housekeeping-pass lifetime model rather than relying on refcounting
//! across the whole graph (only the ID-map table, `mapper-idmap`, uses
//! refcounts — those are per-instance, not per-replicated-record).

mod error;
mod graph;
mod link;
mod records;
mod subscription;

pub use error::ProtocolError;
pub use graph::Graph;
pub use link::{Link, LinkClock};
pub use records::{DeviceRecord, MapRecord, SignalRecord};
pub use subscription::{SubscribeFlags, SubscriberTable, Subscription};
