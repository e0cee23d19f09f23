//! Component E — slots and the router.
//!
//! A map endpoint (`Slot`) holds its own value history (`mapper-ring`)
//! independent of the signal it's bound to; the `Router` is a per-device
//! index from a signal to every `(slot, map)` pair that cares about
//! updates on it, so an inbound value message resolves in one lookup
//! instead of a scan over every map.

mod admission;
mod slot;

pub use admission::{admit, Admission};
pub use slot::Slot;

use mapper_types::SignalId;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub usize);

/// Per-device index from a bound signal to the slots that reference it.
/// The source's intrusive per-signal list of router entries (REDESIGN
/// FLAGS) becomes an owning `HashMap<SignalId, Vec<_>>`.
#[derive(Default)]
pub struct Router {
    routes: HashMap<SignalId, Vec<(SlotId, MapId)>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `slot` of `map` to `signal`; idempotent — binding the same
    /// `(slot, map)` pair twice does not duplicate the route.
    pub fn bind(&mut self, signal: SignalId, slot: SlotId, map: MapId) {
        let entries = self.routes.entry(signal).or_default();
        if !entries.iter().any(|(s, m)| *s == slot && *m == map) {
            entries.push((slot, map));
        }
    }

    /// Remove every route belonging to `map` (called when the map is torn
    /// down or its endpoints are rebound).
    pub fn unbind_map(&mut self, map: MapId) {
        for entries in self.routes.values_mut() {
            entries.retain(|(_, m)| *m != map);
        }
        self.routes.retain(|_, v| !v.is_empty());
    }

    pub fn routes_for(&self, signal: SignalId) -> &[(SlotId, MapId)] {
        self.routes.get(&signal).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_types::DeviceId;

    fn sig(n: u64) -> SignalId {
        SignalId::new(DeviceId(0), n as u32)
    }

    #[test]
    fn bind_is_idempotent() {
        let mut r = Router::new();
        r.bind(sig(1), SlotId(0), MapId(100));
        r.bind(sig(1), SlotId(0), MapId(100));
        assert_eq!(r.routes_for(sig(1)).len(), 1);
    }

    #[test]
    fn unbind_map_clears_all_its_routes_and_empty_signals() {
        let mut r = Router::new();
        r.bind(sig(1), SlotId(0), MapId(100));
        r.bind(sig(2), SlotId(1), MapId(100));
        r.bind(sig(1), SlotId(0), MapId(200));
        r.unbind_map(MapId(100));
        assert_eq!(r.routes_for(sig(1)), &[(SlotId(0), MapId(200))]);
        assert!(r.routes_for(sig(2)).is_empty());
    }

    #[test]
    fn unknown_signal_has_no_routes() {
        let r = Router::new();
        assert!(r.routes_for(sig(99)).is_empty());
    }
}
