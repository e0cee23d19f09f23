//! Component F (data half) — the `Map` state machine (§3 "Map", §4.F "Map
//! status lifecycle"). Negotiation (who sends `/map`/`/mapTo`/`/mapped`,
//! when a map is admitted as local-only) and the per-poll evaluate/deliver
//! passes are the device's job (`device.rs`); this module is just the
//! state a map carries through that lifecycle plus the two ways of
//! evaluating it.

use mapper_expr::{
    compile, eval, CompileContext, EvalStatus, ExprDescriptor, GatherContext, InputSig, Inputs,
    VmState,
};
use mapper_router::Slot;
pub use mapper_router::MapId;
use mapper_types::{Direction, MapStatus, ProcessLocation, SignalId, Timetag, Vector};

/// Which side of a map this device's local `Map` record reflects. A
/// local-only map (both endpoints owned by this device, §3 "Map") is
/// represented as `Destination` whose single source shape is already known,
/// never needing the `Source` role at all.
#[derive(Debug, Clone)]
pub enum MapRole {
    /// This device owns the destination signal. `source_shapes[i]` is
    /// `None` until the i'th source's shape is known (via `/mapTo`, or
    /// immediately for a source this same device also owns).
    Destination {
        source_shapes: Vec<Option<InputSig>>,
        source_num_inst: Vec<Option<usize>>,
    },
    /// This device owns exactly one of `sources`, at this index, but not
    /// the destination. Only meaningful when `process_location ==
    /// ProcessLocation::Source` — a destination-processed map needs no
    /// local state on the source side beyond forwarding raw samples, which
    /// the device's outgoing-route table (not `Map`) handles.
    Source { index: usize },
}

/// A directed dataflow edge from one or more source signals to one
/// destination signal (§3 "Map").
pub struct Map {
    pub id: MapId,
    pub sources: Vec<SignalId>,
    pub destination: SignalId,
    pub process_location: ProcessLocation,
    pub status: MapStatus,
    pub muted: bool,
    pub num_inst: usize,
    pub expr_src: Option<String>,
    pub role: MapRole,
    dest_shape: InputSig,
    expr: Option<ExprDescriptor>,
    vm_state: Option<VmState>,
    /// One history slot (`mapper-router::Slot`) per source, on the
    /// destination side only; a source device reads its own signal's ring
    /// directly instead of mirroring it here.
    source_slots: Vec<Option<Slot>>,
    dirty: bool,
}

/// Default expression when none is supplied: a plain copy, compiled like
/// any other expression so broadcast/promotion/cast still apply when the
/// source and destination shapes differ (§3 Map invariants: "identity maps
/// may omit it" is honored at the API level — callers pass `None` — but
/// internally we still compile `y = x;` rather than special-casing a null
/// program; see DESIGN.md).
const IDENTITY_EXPR: &str = "y = x;";

impl Map {
    pub fn new_destination(
        id: MapId,
        sources: Vec<SignalId>,
        destination: SignalId,
        dest_shape: InputSig,
        process_location: ProcessLocation,
        expr_src: Option<String>,
        num_inst: usize,
    ) -> Self {
        let n = sources.len();
        Map {
            id,
            sources,
            destination,
            process_location,
            status: MapStatus::Staged,
            muted: false,
            num_inst: num_inst.max(1),
            expr_src,
            role: MapRole::Destination {
                source_shapes: vec![None; n],
                source_num_inst: vec![None; n],
            },
            dest_shape,
            expr: None,
            vm_state: None,
            source_slots: (0..n).map(|_| None).collect(),
            dirty: false,
        }
    }

    pub fn new_source(
        id: MapId,
        sources: Vec<SignalId>,
        destination: SignalId,
        dest_shape: InputSig,
        process_location: ProcessLocation,
        expr_src: Option<String>,
        num_inst: usize,
        own_index: usize,
    ) -> Self {
        let n = sources.len();
        Map {
            id,
            sources,
            destination,
            process_location,
            status: MapStatus::Staged,
            muted: false,
            num_inst: num_inst.max(1),
            expr_src,
            role: MapRole::Source { index: own_index },
            dest_shape,
            expr: None,
            vm_state: None,
            source_slots: (0..n).map(|_| None).collect(),
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Record one source's shape (from `/mapTo`, or supplied directly for a
    /// local source) and, once every source is known, compile the
    /// expression and promote `Staged -> Ready`. Returns `true` the instant
    /// this call completes the set and compiles successfully.
    pub fn record_source_shape(
        &mut self,
        idx: usize,
        shape: InputSig,
        num_inst: usize,
    ) -> Result<bool, crate::error::MapperError> {
        let MapRole::Destination { source_shapes, source_num_inst } = &mut self.role else {
            return Ok(false);
        };
        if let Some(slot) = source_shapes.get_mut(idx) {
            *slot = Some(shape);
        }
        if let Some(slot) = source_num_inst.get_mut(idx) {
            *slot = Some(num_inst);
        }
        if source_shapes.iter().all(Option::is_some) {
            self.compile_on_destination()?;
            self.status = MapStatus::Ready;
            return Ok(true);
        }
        Ok(false)
    }

    fn compile_on_destination(&mut self) -> Result<(), crate::error::MapperError> {
        let MapRole::Destination { source_shapes, .. } = &self.role else {
            return Ok(());
        };
        let inputs: Vec<InputSig> = source_shapes.iter().map(|s| s.expect("all shapes known")).collect();
        let ctx = CompileContext { inputs: inputs.clone(), output: self.dest_shape };
        let src = self.expr_src.as_deref().unwrap_or(IDENTITY_EXPR);
        let descriptor = compile(src, &ctx)?;
        self.source_slots = inputs
            .iter()
            .zip(descriptor.input_history_depth.iter())
            .map(|(sig, depth)| {
                Some(Slot::new(
                    Direction::In,
                    sig.vec_len,
                    sig.scalar_type,
                    (*depth).max(1) as usize,
                    self.num_inst,
                ))
            })
            .collect();
        self.vm_state = Some(VmState::new(descriptor.num_user_vars, 0));
        self.expr = Some(descriptor);
        Ok(())
    }

    /// Compile on the source side, where `sources.len() == 1` (enforced by
    /// the device when it admits a `Source`-processed map) and the single
    /// input's shape is this device's own signal. Returns the history depth
    /// (in samples) the caller's signal ring must hold for `history(n)` to
    /// reach back that far, since a `Source`-role map reads the owning
    /// signal's ring directly rather than mirroring it into a slot.
    pub fn compile_on_source(&mut self, own_shape: InputSig) -> Result<u32, crate::error::MapperError> {
        let ctx = CompileContext { inputs: vec![own_shape], output: self.dest_shape };
        let src = self.expr_src.as_deref().unwrap_or(IDENTITY_EXPR);
        let descriptor = compile(src, &ctx)?;
        let history_depth = descriptor.input_history_depth.first().copied().unwrap_or(1).max(1);
        self.vm_state = Some(VmState::new(descriptor.num_user_vars, 0));
        self.expr = Some(descriptor);
        self.status = MapStatus::Ready;
        Ok(history_depth)
    }

    pub fn activate(&mut self) {
        self.status = MapStatus::Active;
    }

    pub fn dest_shape(&self) -> InputSig {
        self.dest_shape
    }

    /// The shape recorded for source `idx`, if known yet (destination role
    /// only; a `Source`-role map has no use for a second source's shape).
    pub fn source_shape(&self, idx: usize) -> Option<InputSig> {
        match &self.role {
            MapRole::Destination { source_shapes, .. } => source_shapes.get(idx).copied().flatten(),
            MapRole::Source { .. } => None,
        }
    }

    /// The highest `num_inst` reported across every source recorded so far
    /// (§9 Open Questions: resolved in favor of "maximum over sources"
    /// rather than the destination signal's own current `num_inst` — see
    /// DESIGN.md, and `mapper-router::admission`, which takes the same
    /// value as an explicit parameter rather than rederiving it).
    pub fn max_source_num_inst(&self) -> usize {
        match &self.role {
            MapRole::Destination { source_num_inst, .. } => {
                source_num_inst.iter().filter_map(|n| *n).max().unwrap_or(1)
            }
            MapRole::Source { .. } => 1,
        }
    }

    /// Write an incoming sample into this map's destination-side history
    /// for source `idx` (used only when `role` is `Destination`).
    pub fn push_source_sample(&mut self, idx: usize, inst: usize, value: Vector, time: Timetag) {
        if let Some(Some(slot)) = self.source_slots.get_mut(idx) {
            slot.ring.push(inst, value, time);
        }
        self.dirty = true;
    }

    pub fn reset_source_instance(&mut self, idx: usize, inst: usize) {
        if let Some(Some(slot)) = self.source_slots.get_mut(idx) {
            slot.ring.reset(inst);
        }
    }

    /// Evaluate the compiled expression for instance `inst` against this
    /// map's own source slots (destination role) or a single externally
    /// supplied ring (source role, where the ring is the device's own
    /// signal). Returns `None` if not yet compiled or the VM signalled an
    /// error (e.g. integer divide-by-zero, §4.B).
    ///
    /// The `instance()`/`signal()` reduction prefixes need the live samples
    /// of every active instance of the representative input (source 0);
    /// this is gathered here, from the same rings `Inputs` reads, rather
    /// than threaded in by the caller — the router has no independent view
    /// of those rings that `Map` doesn't already hold.
    pub fn evaluate(
        &mut self,
        inst: usize,
        external_ring: Option<&mapper_ring::ValueRing>,
        prev_y: Option<&Vector>,
    ) -> Option<(Vector, EvalStatus)> {
        let expr = self.expr.as_ref()?;
        let state = self.vm_state.as_mut()?;

        let rings: Vec<&mapper_ring::ValueRing> = match &self.role {
            MapRole::Destination { .. } => {
                self.source_slots.iter().filter_map(|s| s.as_ref().map(|s| &s.ring)).collect()
            }
            MapRole::Source { .. } => external_ring.into_iter().collect(),
        };
        let num_inst = self.num_inst;
        let instance_samples: Vec<Vector> = rings
            .first()
            .map(|ring| (0..num_inst).filter_map(|i| ring.get(i, 0.0)).map(|s| s.value).collect())
            .unwrap_or_default();
        let gather = GatherContext { instance_samples: Some(&instance_samples) };
        let inputs = Inputs { rings: &rings, inst, prev_y };
        let (out, status) = eval(expr, &inputs, &gather, state);
        if status.contains(EvalStatus::ERROR) {
            return None;
        }
        out.y.map(|y| (y, status))
    }

    pub fn expr_program_len(&self) -> usize {
        self.expr.as_ref().map(|e| e.program.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_types::{DeviceId, ScalarType as Ty};

    fn sig(dev: u64, n: u32) -> SignalId {
        SignalId::new(DeviceId(dev), n)
    }

    fn shape(ty: Ty, len: usize) -> InputSig {
        InputSig { scalar_type: ty, vec_len: len }
    }

    #[test]
    fn destination_map_compiles_once_all_sources_known() {
        let mut m = Map::new_destination(
            MapId(1),
            vec![sig(1, 0)],
            sig(2, 0),
            shape(Ty::F32, 1),
            ProcessLocation::Destination,
            Some("y = x + 1;".into()),
            1,
        );
        assert_eq!(m.status, MapStatus::Staged);
        let completed = m.record_source_shape(0, shape(Ty::F32, 1), 1).unwrap();
        assert!(completed);
        assert_eq!(m.status, MapStatus::Ready);
        assert!(m.expr_program_len() > 0);
    }

    #[test]
    fn evaluating_before_compile_returns_none() {
        let mut m = Map::new_destination(
            MapId(1),
            vec![sig(1, 0)],
            sig(2, 0),
            shape(Ty::F32, 1),
            ProcessLocation::Destination,
            None,
            1,
        );
        assert!(m.evaluate(0, None, None).is_none());
    }

    #[test]
    fn destination_identity_map_feeds_through_and_updates() {
        let mut m = Map::new_destination(
            MapId(1),
            vec![sig(1, 0)],
            sig(2, 0),
            shape(Ty::F32, 1),
            ProcessLocation::Destination,
            None,
            1,
        );
        m.record_source_shape(0, shape(Ty::F32, 1), 1).unwrap();
        m.push_source_sample(0, 0, Vector::F32(vec![41.0]), Timetag::ZERO);
        let (y, status) = m.evaluate(0, None, None).unwrap();
        assert!(status.contains(EvalStatus::UPDATE));
        assert_eq!(y, Vector::F32(vec![41.0]));
    }

    #[test]
    fn convergent_map_tracks_max_source_num_inst() {
        let mut m = Map::new_destination(
            MapId(1),
            vec![sig(1, 0), sig(3, 0)],
            sig(2, 0),
            shape(Ty::F32, 1),
            ProcessLocation::Destination,
            Some("y = x + x$1;".into()),
            4,
        );
        m.record_source_shape(0, shape(Ty::F32, 1), 1).unwrap();
        assert_eq!(m.max_source_num_inst(), 1);
        m.record_source_shape(1, shape(Ty::F32, 1), 4).unwrap();
        assert_eq!(m.max_source_num_inst(), 4);
    }
}
