//! External collaborators, sketched: the wire boundary (§1, §6).
//!
//! OSC serialization, multicast socket setup, and per-link TCP/UDP are
//! explicitly out of scope as *implemented wire code*. What this crate
//! provides instead is the boundary the rest of the system talks through —
//! `Bus` (admin broadcast + named unicast) and `Clock` (wall time) — plus an
//! in-process implementation of each, good enough to drive the integration
//! scenarios in the root crate's `tests/` without a real socket.

mod bus;
mod clock;
mod error;
mod osc;

pub use bus::{Bus, BusRegistry, InProcessBus};
pub use clock::{Clock, InProcessClock, ManualClock};
pub use error::TransportError;
pub use osc::{OscMessage, OscValue};
