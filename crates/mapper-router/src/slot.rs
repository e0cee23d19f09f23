use mapper_ring::ValueRing;
use mapper_types::{DeviceId, Direction, ScalarType};

/// One endpoint of a map (§4.E). Slot 0 is the destination by convention;
/// slots 1.. are sources. Holds its own value history independent of the
/// bound signal's own instance storage, so a map can keep deeper history
/// than the signal itself needs.
pub struct Slot {
    pub direction: Direction,
    pub ring: ValueRing,
    pub num_inst: usize,
    /// Whether a write into this slot should mark the owning map dirty.
    /// False for a destination slot driven purely by upstream maps with no
    /// local subscriber.
    pub causes_update: bool,
    pub link: Option<DeviceId>,
}

impl Slot {
    pub fn new(
        direction: Direction,
        vec_len: usize,
        scalar_type: ScalarType,
        history_size: usize,
        num_inst: usize,
    ) -> Self {
        Slot {
            direction,
            ring: ValueRing::new(vec_len, scalar_type, history_size, num_inst),
            num_inst,
            causes_update: true,
            link: None,
        }
    }

    /// The only operation permitted to change this slot's shape; delegates
    /// to the ring's own `realloc` and keeps `num_inst` in sync.
    pub fn realloc(&mut self, vec_len: usize, scalar_type: ScalarType, history_size: usize, num_inst: usize) {
        self.ring.realloc(vec_len, scalar_type, history_size, num_inst);
        self.num_inst = num_inst;
    }
}
