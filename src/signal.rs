//! The local half of the Signal/SignalRecord split (§9 REDESIGN FLAGS):
//! `SignalRecord` (`mapper-graph`) is the replicated shadow every peer
//! holds; `Signal` is the owning device's own copy, adding the instance
//! storage a remote shadow has no business carrying.

use mapper_ring::ValueRing;
use mapper_types::{Direction, ScalarType, SignalId, Timetag, Vector};

/// A signal owned by this device: its identity plus a one-deep-per-instance
/// ring of current values. Per-instance history beyond "current value"
/// belongs to the slots (`mapper-router::Slot`) of whatever maps reference
/// it, not to the signal itself.
pub struct Signal {
    pub id: SignalId,
    pub name: String,
    pub direction: Direction,
    pub scalar_type: ScalarType,
    pub vec_len: usize,
    pub ephemeral: bool,
    ring: ValueRing,
    active: Vec<bool>,
}

impl Signal {
    pub fn new(
        id: SignalId,
        name: impl Into<String>,
        direction: Direction,
        scalar_type: ScalarType,
        vec_len: usize,
        num_inst: usize,
        ephemeral: bool,
    ) -> Self {
        let num_inst = num_inst.max(1);
        Signal {
            id,
            name: name.into(),
            direction,
            scalar_type,
            vec_len,
            ephemeral,
            ring: ValueRing::new(vec_len, scalar_type, 1, num_inst),
            active: vec![num_inst == 1; num_inst],
        }
    }

    pub fn num_inst(&self) -> usize {
        self.ring.num_inst()
    }

    pub fn is_active(&self, inst: usize) -> bool {
        self.active.get(inst).copied().unwrap_or(false)
    }

    pub fn value(&self, inst: usize) -> Option<mapper_ring::Sample> {
        self.ring.get(inst, 0.0)
    }

    /// The signal's own value ring, read directly by a `Source`-processed
    /// map evaluated on this same device (§4.F: such a map reads straight
    /// from its one input's owning signal rather than mirroring it into a
    /// slot).
    pub fn ring(&self) -> &ValueRing {
        &self.ring
    }

    pub fn set_value(&mut self, inst: usize, value: Vector, time: Timetag) {
        self.ring.push(inst, value, time);
        if let Some(flag) = self.active.get_mut(inst) {
            *flag = true;
        }
    }

    /// Widen the ring's history depth to at least `depth` samples, for a
    /// `Source`-processed map whose expression reaches back further than
    /// this signal currently retains (§4.A: history is the only dimension
    /// a ring grows after creation without otherwise changing shape).
    pub fn ensure_history(&mut self, depth: usize) {
        if depth > self.ring.history_size() {
            self.ring.realloc(self.vec_len, self.scalar_type, depth, self.num_inst());
        }
    }

    pub fn release(&mut self, inst: usize) {
        self.ring.reset(inst);
        if let Some(flag) = self.active.get_mut(inst) {
            *flag = false;
        }
    }

    /// `/<device_name>/<signal_name>`, the wire path convention of §6.
    pub fn path(&self, device_name: &str) -> String {
        format!("/{device_name}/{}", self.name)
    }
}
