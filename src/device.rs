//! Components F, G, H wired together: the device-level poll loop (§4.F),
//! name allocation (§4.G), and graph/peer sync (§4.H). This is the single
//! stateful entity an embedder creates one of per process; everything else
//! in this crate and its component crates is data `Device` owns and drives.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use mapper_alloc::NameAllocator;
use mapper_expr::InputSig;
use mapper_graph::{DeviceRecord, Graph, SubscribeFlags};
use mapper_idmap::IdMapTable;
use mapper_router::{admit, Admission, MapId, Router, SlotId};
use mapper_transport::{Bus, Clock, OscMessage, OscValue};
use mapper_types::{
    DeviceId, DeviceStatus, Direction, Gid, Lid, ProcessLocation, ScalarType, SignalId, Timetag,
    Vector,
};

use crate::error::MapperError;
use crate::map::{Map, MapRole};
use crate::signal::Signal;

/// How this device learned about one of its signals' downstream
/// destinations (§4.F step 3 "Outgoing pass"). Built once at `create_map`
/// time (destination side) or on receipt of `/map` (the device owning the
/// matching source), and walked whenever the owning signal's value changes.
enum RouteKind {
    /// Both endpoints live on this device: evaluate immediately and
    /// recurse, no wire hop (§3 "Map": "a map is local-only when source and
    /// destination signals are both owned by this process; such maps skip
    /// the wire").
    Local { map_id: MapId, source_idx: usize },
    /// `process_location = destination`: forward the raw sample, tagged
    /// with the slot this source was assigned so the destination device
    /// can tell which map/source it belongs to.
    RawForward { map_id: MapId, dest_dev: String, dest_path: String, slot: SlotId },
    /// `process_location = source`: evaluate locally (this device owns the
    /// map's one source) and send the already-computed result directly to
    /// the destination's own path — no slot tag needed, there being only
    /// ever one source for a `Source`-processed map.
    ComputeAtSource { map_id: MapId, dest_dev: String, dest_path: String },
}

impl RouteKind {
    fn map_id(&self) -> MapId {
        match self {
            RouteKind::Local { map_id, .. } => *map_id,
            RouteKind::RawForward { map_id, .. } => *map_id,
            RouteKind::ComputeAtSource { map_id, .. } => *map_id,
        }
    }
}

struct OutgoingRoute {
    kind: RouteKind,
}

/// Per-source bookkeeping the destination device needs before a map's
/// shape is fully known: which local slot id was assigned to it, and
/// (filled in once `/mapTo` arrives) its reported shape.
struct PendingSource {
    #[allow(dead_code)]
    slot: SlotId,
}

/// A peer-to-peer signal-mapping endpoint: owns its signals, its maps (in
/// whichever role it plays for each), the id-map table, the router, and a
/// private view of the replicated graph (§5 "Scheduling model": single-
/// threaded cooperative, all mutation happens on the thread that calls
/// `poll`).
pub struct Device {
    config: crate::config::DeviceConfig,
    allocator: NameAllocator,
    bus: Box<dyn Bus>,
    clock: Box<dyn Clock>,
    id: Option<DeviceId>,
    status: DeviceStatus,
    graph: Graph,
    signals: HashMap<SignalId, Signal>,
    signal_ids_by_path: HashMap<String, SignalId>,
    next_signal_idx: u32,
    idmaps: Vec<IdMapTable>,
    router: Router,
    slot_owners: HashMap<SlotId, (MapId, usize)>,
    next_slot_idx: usize,
    pending_sources: HashMap<MapId, Vec<PendingSource>>,
    maps: HashMap<MapId, Map>,
    next_map_idx: u32,
    outgoing: HashMap<SignalId, Vec<OutgoingRoute>>,
    dirty_signals: VecDeque<(SignalId, usize)>,
    gid_bound: HashSet<(MapId, usize, Gid)>,
    next_lid: u32,
    properties: mapper_types::Properties,
    last_sync_sent: Timetag,
}

const SYNC_PERIOD_SECS: f64 = 7.0;
const DEFAULT_SUBSCRIBE_LEASE_SECS: f64 = 60.0;

impl Device {
    pub fn new(config: crate::config::DeviceConfig, bus: Box<dyn Bus>, clock: Box<dyn Clock>) -> Result<Self, MapperError> {
        config.validate()?;
        let allocator = NameAllocator::new(config.prefix.clone());
        Ok(Device {
            config,
            allocator,
            bus,
            clock,
            id: None,
            status: DeviceStatus::Staged,
            graph: Graph::new(),
            signals: HashMap::new(),
            signal_ids_by_path: HashMap::new(),
            next_signal_idx: 0,
            idmaps: Vec::new(),
            router: Router::new(),
            slot_owners: HashMap::new(),
            next_slot_idx: 0,
            pending_sources: HashMap::new(),
            maps: HashMap::new(),
            next_map_idx: 0,
            outgoing: HashMap::new(),
            dirty_signals: VecDeque::new(),
            gid_bound: HashSet::new(),
            next_lid: 0,
            properties: mapper_types::Properties::new(),
            last_sync_sent: Timetag::ZERO,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.status == DeviceStatus::Ready
    }

    pub fn name(&self) -> String {
        self.allocator.name()
    }

    pub fn id(&self) -> Option<DeviceId> {
        self.id
    }

    fn now(&self) -> Timetag {
        self.clock.now()
    }

    // ---------------------------------------------------------------
    // Signal management
    // ---------------------------------------------------------------

    /// Add a signal owned by this device. Only valid once the device is
    /// `Ready` (its ordinal is locked, so the signal's globally-unique id
    /// can be minted, §3 "Signal" invariant).
    pub fn add_signal(
        &mut self,
        name: impl Into<String>,
        direction: Direction,
        scalar_type: ScalarType,
        vec_len: usize,
        num_inst: usize,
        ephemeral: bool,
    ) -> Result<SignalId, MapperError> {
        let Some(device_id) = self.id else {
            return Err(MapperError::UnknownDevice("device not yet locked".into()));
        };
        let name = name.into();
        let id = SignalId::new(device_id, self.next_signal_idx);
        self.next_signal_idx += 1;
        let signal = Signal::new(id, name.clone(), direction, scalar_type, vec_len, num_inst, ephemeral);
        let path = signal.path(&self.allocator.name());
        self.signal_ids_by_path.insert(path, id);
        self.signals.insert(id, signal);
        self.properties.set(
            mapper_types::PropertyKey::Version,
            mapper_types::PropertyValue::Scalar(mapper_types::ScalarValue::I32(0)),
        );
        Ok(id)
    }

    pub fn signal_value(&self, id: SignalId, inst: usize) -> Option<Vector> {
        self.signals.get(&id).and_then(|s| s.value(inst)).map(|s| s.value)
    }

    fn signal_shape(&self, id: SignalId) -> Option<InputSig> {
        self.signals.get(&id).map(|s| InputSig { scalar_type: s.scalar_type, vec_len: s.vec_len })
    }

    fn signal_path(&self, id: SignalId) -> Option<String> {
        self.signals.get(&id).map(|s| s.path(&self.allocator.name()))
    }

    fn owns(&self, id: SignalId) -> bool {
        self.signals.contains_key(&id)
    }

    /// Write a new value into a signal this device owns and cascade it
    /// through every route registered for that signal (§4.F "Outgoing
    /// pass" for cross-device routes; local-only maps are resolved inline
    /// rather than waiting for the next tick, since there is no wire hop
    /// to batch).
    pub fn set_value(&mut self, id: SignalId, inst: usize, value: Vector) -> Result<(), MapperError> {
        if !self.owns(id) {
            return Err(MapperError::UnknownSignal(id));
        }
        let now = self.now();
        if let Some(sig) = self.signals.get_mut(&id) {
            sig.set_value(inst, value, now);
        }
        self.dirty_signals.push_back((id, inst));
        Ok(())
    }

    pub fn release_instance(&mut self, id: SignalId, inst: usize) -> Result<(), MapperError> {
        if !self.owns(id) {
            return Err(MapperError::UnknownSignal(id));
        }
        if let Some(sig) = self.signals.get_mut(&id) {
            sig.release(inst);
        }
        self.dirty_signals.push_back((id, inst));
        Ok(())
    }

    // ---------------------------------------------------------------
    // Map creation (destination side always drives it, §4.F)
    // ---------------------------------------------------------------

    pub fn create_map(
        &mut self,
        sources: Vec<SignalId>,
        destination: SignalId,
        expr: Option<&str>,
        process_location: ProcessLocation,
        num_inst: usize,
    ) -> Result<MapId, MapperError> {
        if !self.owns(destination) {
            return Err(MapperError::NotDestinationOwner(destination));
        }
        if process_location == ProcessLocation::Source && sources.len() != 1 {
            return Err(MapperError::SourceProcessedMustBeSingleSource(sources.len()));
        }
        let Some(device_id) = self.id else {
            return Err(MapperError::UnknownDevice("device not yet locked".into()));
        };

        let dest_shape = self.signal_shape(destination).expect("just checked ownership");
        let map_id = MapId(device_id.0 | self.next_map_idx as u64);
        self.next_map_idx += 1;

        let slot_base = self.next_slot_idx;
        for i in 0..sources.len() {
            let slot = SlotId(slot_base + i);
            self.next_slot_idx += 1;
            self.router.bind(destination, slot, map_id);
            self.slot_owners.insert(slot, (map_id, i));
        }

        let mut map = Map::new_destination(
            map_id,
            sources.clone(),
            destination,
            dest_shape,
            process_location,
            expr.map(|s| s.to_string()),
            num_inst,
        );

        let all_local = sources.iter().all(|s| self.owns(*s));
        if all_local {
            for (i, src) in sources.iter().enumerate() {
                let shape = self.signal_shape(*src).expect("owned");
                let src_num_inst = self.signals[src].num_inst();
                map.record_source_shape(i, shape, src_num_inst)?;
                self.outgoing.entry(*src).or_default().push(OutgoingRoute {
                    kind: RouteKind::Local { map_id, source_idx: i },
                });
            }
            map.activate();
        } else {
            let dest_path = self.signal_path(destination).expect("owned");
            let pending = sources
                .iter()
                .enumerate()
                .map(|(i, _)| PendingSource { slot: SlotId(slot_base + i) })
                .collect();
            self.pending_sources.insert(map_id, pending);

            let mut tags = vec![
                ("@from".to_string(), OscValue::Str(self.allocator.name())),
                ("@id".to_string(), OscValue::I64(map_id.0 as i64)),
                ("@dst_id".to_string(), OscValue::I64(destination.0 as i64)),
                ("@dst_path".to_string(), OscValue::Str(dest_path)),
                (
                    "@process".to_string(),
                    OscValue::Str(match process_location {
                        ProcessLocation::Source => "source".into(),
                        ProcessLocation::Destination => "destination".into(),
                    }),
                ),
                ("@dstType".to_string(), OscValue::Str(format!("{:?}", dest_shape.scalar_type))),
                ("@dstLen".to_string(), OscValue::I32(dest_shape.vec_len as i32)),
                ("@num_instances".to_string(), OscValue::I32(num_inst as i32)),
            ];
            if let Some(e) = expr {
                tags.push(("@expr".to_string(), OscValue::Str(e.to_string())));
            }
            for i in 0..sources.len() {
                tags.push(("@slot".to_string(), OscValue::I32((slot_base + i) as i32)));
            }
            let args = sources.iter().map(|s| OscValue::I64(s.0 as i64)).collect();
            let msg = OscMessage::new("/map", self.now()).with_args(args);
            let msg = tags.into_iter().fold(msg, |m, (k, v)| m.with_tag(k, v));
            self.bus.send_admin(msg);
        }

        self.maps.insert(map_id, map);
        Ok(map_id)
    }

    pub fn unmap(&mut self, map_id: MapId) {
        self.router.unbind_map(map_id);
        self.slot_owners.retain(|_, (m, _)| *m != map_id);
        self.maps.remove(&map_id);
        self.pending_sources.remove(&map_id);
        self.outgoing.retain(|_, routes| {
            routes.retain(|r| r.kind.map_id() != map_id);
            !routes.is_empty()
        });
        self.bus.send_admin(
            OscMessage::new("/unmap", self.now())
                .with_tag("@from", OscValue::Str(self.allocator.name()))
                .with_tag("@id", OscValue::I64(map_id.0 as i64)),
        );
    }

    pub fn map_status(&self, map_id: MapId) -> Option<mapper_types::MapStatus> {
        self.maps.get(&map_id).map(|m| m.status)
    }

    // ---------------------------------------------------------------
    // The poll loop, §4.F "Map state machine & device pipeline"
    // ---------------------------------------------------------------

    /// Service the bus for up to `budget` (capped at 100ms so housekeeping
    /// still runs at least that often, §5 "Suspension points"), then run
    /// the outgoing and incoming passes. Returns the number of messages
    /// serviced.
    pub fn poll(&mut self, budget: Duration) -> usize {
        let budget = budget.min(Duration::from_millis(100));
        let messages = self.bus.recv(budget);
        let n = messages.len();
        for msg in messages {
            self.dispatch(&msg);
        }

        let now = self.now();
        let num_peers = self.graph.devices().count() as u32;
        self.allocator.tick(now, num_peers, &*self.bus);
        if self.id.is_none() && self.allocator.is_locked() {
            self.lock_identity(now);
        }

        self.run_outgoing_pass(now);
        self.run_incoming_pass(now);

        self.graph.housekeeping(now, self.config.link_timeout.as_secs_f64(), 9.0);
        self.maybe_send_sync(now);
        self.maybe_push_device_state(now);

        n
    }

    fn lock_identity(&mut self, now: Timetag) {
        let device_id = DeviceId::from_name(&self.allocator.name());
        self.id = Some(device_id);
        self.status = DeviceStatus::Ready;
        self.idmaps = (0..self.config.num_signal_groups.max(1))
            .map(|_| IdMapTable::new(device_id))
            .collect();
        self.graph.upsert_device(DeviceRecord::new(device_id, self.allocator.name()));
        tracing::info!(name = %self.allocator.name(), "device ready");
        self.bus.send_admin(
            OscMessage::new("/device", now)
                .with_args(vec![OscValue::Str(self.allocator.name())])
                .with_tag("@id", OscValue::I64(device_id.0 as i64))
                .with_tag("@version", OscValue::I32(0)),
        );
    }

    fn run_outgoing_pass(&mut self, now: Timetag) {
        let mut queue: VecDeque<(SignalId, usize)> = self.dirty_signals.drain(..).collect();
        while let Some((sig_id, inst)) = queue.pop_front() {
            let Some(value) = self.signals.get(&sig_id).and_then(|s| s.value(inst)).map(|s| s.value) else {
                continue;
            };
            let route_count = self.outgoing.get(&sig_id).map(|r| r.len()).unwrap_or(0);
            for i in 0..route_count {
                // Re-borrow per iteration: evaluating a `Local` route may
                // itself push further signals that this same loop drains.
                let kind_desc = match &self.outgoing[&sig_id][i].kind {
                    RouteKind::Local { map_id, source_idx } => {
                        RouteAction::Local(*map_id, *source_idx)
                    }
                    RouteKind::RawForward { dest_dev, dest_path, slot, .. } => {
                        RouteAction::RawForward(dest_dev.clone(), dest_path.clone(), *slot)
                    }
                    RouteKind::ComputeAtSource { map_id, dest_dev, dest_path } => {
                        RouteAction::ComputeAtSource(*map_id, dest_dev.clone(), dest_path.clone())
                    }
                };
                match kind_desc {
                    RouteAction::Local(map_id, source_idx) => {
                        if let Some((dest, out_value)) =
                            self.evaluate_local_map(map_id, source_idx, inst, &value, now)
                        {
                            if let Some(sig) = self.signals.get_mut(&dest) {
                                sig.set_value(inst, out_value, now);
                            }
                            queue.push_back((dest, inst));
                        }
                    }
                    RouteAction::RawForward(dest_dev, dest_path, slot) => {
                        let msg = OscMessage::value_update(dest_path, &value, now)
                            .with_tag("@sl", OscValue::I32(slot.0 as i32));
                        let _ = self.bus.send_to(&dest_dev, msg);
                    }
                    RouteAction::ComputeAtSource(map_id, dest_dev, dest_path) => {
                        if let Some(out_value) = self.evaluate_source_map(map_id, inst) {
                            let msg = OscMessage::value_update(dest_path, &out_value, now)
                                .with_tag("@id", OscValue::I64(map_id.0 as i64));
                            let _ = self.bus.send_to(&dest_dev, msg);
                        }
                    }
                }
            }
        }
    }

    fn evaluate_local_map(
        &mut self,
        map_id: MapId,
        source_idx: usize,
        inst: usize,
        value: &Vector,
        now: Timetag,
    ) -> Option<(SignalId, Vector)> {
        let dest = self.maps.get(&map_id)?.destination;
        let prev_y = self.signals.get(&dest).and_then(|s| s.value(inst)).map(|s| s.value);
        let map = self.maps.get_mut(&map_id)?;
        map.push_source_sample(source_idx, inst, value.clone(), now);
        if map.muted {
            return None;
        }
        let (y, _status) = map.evaluate(inst, None, prev_y.as_ref())?;
        map.clear_dirty();
        Some((dest, y))
    }

    /// A `Source`-processed map reads straight from its one input's own
    /// ring rather than mirroring it into a slot (`map.rs` `compile_on_source`).
    /// `self.signals` and `self.maps` are disjoint fields, so the immutable
    /// borrow of the ring can simply end before the mutable borrow of the
    /// map begins; no raw pointer needed.
    fn evaluate_source_map(&mut self, map_id: MapId, inst: usize) -> Option<Vector> {
        let map = self.maps.get(&map_id)?;
        let source = *map.sources.first()?;
        let ring = self.signals.get(&source)?.ring();
        let map = self.maps.get_mut(&map_id)?;
        if map.muted {
            return None;
        }
        let (y, _status) = map.evaluate(inst, Some(ring), None)?;
        Some(y)
    }

    fn run_incoming_pass(&mut self, now: Timetag) {
        let ids: Vec<MapId> = self
            .maps
            .iter()
            .filter(|(_, m)| {
                matches!(m.role, MapRole::Destination { .. })
                    && m.process_location == ProcessLocation::Destination
                    && m.status == mapper_types::MapStatus::Active
                    && m.is_dirty()
                    && !m.muted
            })
            .map(|(id, _)| *id)
            .collect();

        for map_id in ids {
            let Some(map) = self.maps.get_mut(&map_id) else { continue };
            let dest = map.destination;
            let num_inst = map.num_inst;
            let mut results = Vec::new();
            for inst in 0..num_inst {
                let prev_y = self.signals.get(&dest).and_then(|s| s.value(inst)).map(|s| s.value);
                if let Some(map) = self.maps.get_mut(&map_id) {
                    if let Some((y, _status)) = map.evaluate(inst, None, prev_y.as_ref()) {
                        results.push((inst, y));
                    }
                }
            }
            if let Some(map) = self.maps.get_mut(&map_id) {
                map.clear_dirty();
            }
            if let Some(sig) = self.signals.get_mut(&dest) {
                for (inst, y) in results {
                    sig.set_value(inst, y, now);
                    self.dirty_signals.push_back((dest, inst));
                }
            }
        }
    }

    fn maybe_send_sync(&mut self, now: Timetag) {
        if self.id.is_none() {
            return;
        }
        if now.checked_sub(self.last_sync_sent).map(|d| d.as_secs_f64()).unwrap_or(f64::MAX) < SYNC_PERIOD_SECS {
            return;
        }
        self.last_sync_sent = now;
        self.bus.send_admin(
            OscMessage::new("/sync", now)
                .with_args(vec![OscValue::Str(self.allocator.name()), OscValue::I32(0)]),
        );
    }

    fn maybe_push_device_state(&mut self, now: Timetag) {
        let Some(device_id) = self.id else { return };
        if !self.properties.is_dirty() {
            return;
        }
        let subscribers: Vec<String> = self
            .graph
            .subscribers_mut(device_id)
            .live_matching(SubscribeFlags::DEVICE, now)
            .into_iter()
            .map(|s| s.address.clone())
            .collect();
        if subscribers.is_empty() {
            return;
        }
        let msg = OscMessage::new("/device", now).with_args(vec![OscValue::Str(self.allocator.name())]);
        for addr in subscribers {
            let _ = self.bus.send_to(&addr, msg.clone());
        }
        self.properties.clear_dirty();
    }

    // ---------------------------------------------------------------
    // Inbound message dispatch
    // ---------------------------------------------------------------

    fn dispatch(&mut self, msg: &OscMessage) {
        self.allocator.mark_online();
        match msg.path.as_str() {
            "/name/probe" => self.handle_name_probe(msg),
            "/name/registered" => self.handle_name_registered(msg),
            "/device" => self.handle_device(msg),
            "/sync" => self.handle_sync(msg),
            "/logout" => self.handle_logout(msg),
            "/map" => self.handle_map(msg),
            "/mapTo" => self.handle_map_to(msg),
            "/mapped" => self.handle_mapped(msg),
            "/unmap" => self.handle_unmap(msg),
            "/ping" => self.handle_ping(msg),
            path if path.ends_with("/subscribe") => self.handle_subscribe(msg),
            path => self.handle_value_message(path, msg),
        }
    }

    fn handle_name_probe(&mut self, msg: &OscMessage) {
        let (Some(name), Some(rand)) = (msg.args.first().and_then(OscValue::as_str), msg.args.get(1).and_then(OscValue::as_i64)) else {
            return;
        };
        self.allocator.observe_contest(name, rand as i32);
        if self.allocator.is_locked() && name == self.allocator.name() {
            // We already hold this name; tell the late prober so it bumps.
            self.bus.send_admin(
                OscMessage::new("/name/registered", self.now())
                    .with_args(vec![OscValue::Str(name.to_string()), OscValue::I32(i32::MAX)]),
            );
        }
    }

    fn handle_name_registered(&mut self, msg: &OscMessage) {
        let (Some(name), Some(rand)) = (msg.args.first().and_then(OscValue::as_str), msg.args.get(1).and_then(OscValue::as_i64)) else {
            return;
        };
        self.allocator.observe_contest(name, rand as i32);
    }

    fn handle_device(&mut self, msg: &OscMessage) {
        let Some(name) = msg.args.first().and_then(OscValue::as_str) else { return };
        let Some(OscValue::I64(id)) = msg.tag("@id") else { return };
        let id = DeviceId(*id as u64);
        let version = msg.tag("@version").and_then(OscValue::as_i64).unwrap_or(0) as u32;
        let mut rec = DeviceRecord::new(id, name);
        rec.version = version;
        rec.last_sync = msg.time;
        self.graph.upsert_device(rec);
    }

    fn handle_sync(&mut self, msg: &OscMessage) {
        let (Some(name), Some(version)) = (
            msg.args.first().and_then(OscValue::as_str),
            msg.args.get(1).and_then(OscValue::as_i64),
        ) else {
            return;
        };
        let id = DeviceId::from_name(name);
        let mut rec = self.graph.device(id).cloned().unwrap_or_else(|| DeviceRecord::new(id, name));
        if version as u32 >= rec.version {
            rec.version = version as u32;
            rec.last_sync = msg.time;
            self.graph.upsert_device(rec);
        }
    }

    fn handle_logout(&mut self, msg: &OscMessage) {
        let Some(name) = msg.args.first().and_then(OscValue::as_str) else { return };
        self.graph.remove_device(DeviceId::from_name(name));
    }

    fn handle_ping(&mut self, msg: &OscMessage) {
        let Some(OscValue::I64(dev_id)) = msg.args.first() else { return };
        let peer = DeviceId(*dev_id as u64);
        let sent = msg.args.get(1).and_then(OscValue::as_i64).unwrap_or(0) as f64;
        let delta = msg.args.get(3).and_then(|v| match v {
            OscValue::F64(d) => Some(*d),
            OscValue::F32(d) => Some(*d as f64),
            _ => None,
        }).unwrap_or(0.0);
        let now = self.now();
        let link = self.graph.link_mut_or_create(peer, now);
        link.clock.on_ping(now.as_secs_f64(), sent, delta, msg.time.as_secs_f64());
        link.last_seen = now;
    }

    fn handle_subscribe(&mut self, msg: &OscMessage) {
        let Some(device_id) = self.id else { return };
        let Some(from) = msg.tag("@from").and_then(OscValue::as_str) else { return };
        let flags = msg
            .args
            .first()
            .and_then(OscValue::as_str)
            .map(flags_for_keyword)
            .unwrap_or(SubscribeFlags::ALL);
        let lease = msg.tag("@lease").and_then(OscValue::as_i64).map(|v| v as f64).unwrap_or(DEFAULT_SUBSCRIBE_LEASE_SECS);
        self.graph.subscribe(device_id, from, lease, flags, msg.time);
    }

    /// `/map`: this device responds if it owns one of the listed sources.
    fn handle_map(&mut self, msg: &OscMessage) {
        let Some(from) = msg.tag("@from").and_then(OscValue::as_str).map(str::to_string) else { return };
        let Some(OscValue::I64(map_id)) = msg.tag("@id") else { return };
        let map_id = MapId(*map_id as u64);
        let Some(OscValue::I64(dst_id)) = msg.tag("@dst_id") else { return };
        let destination = SignalId(*dst_id as u64);
        let Some(dst_path) = msg.tag("@dst_path").and_then(OscValue::as_str).map(str::to_string) else { return };
        let is_source_located = matches!(msg.tag("@process").and_then(OscValue::as_str), Some("source"));
        let num_inst = msg.tag("@num_instances").and_then(OscValue::as_i64).unwrap_or(1) as usize;
        let expr = msg.tag("@expr").and_then(OscValue::as_str).map(str::to_string);
        let dst_len = msg.tag("@dstLen").and_then(OscValue::as_i64).unwrap_or(1) as usize;
        let dst_type = msg.tag("@dstType").and_then(OscValue::as_str).map(parse_scalar_type).unwrap_or(ScalarType::F64);
        let dest_shape = InputSig { scalar_type: dst_type, vec_len: dst_len };

        let sources: Vec<SignalId> = msg.args.iter().filter_map(|a| a.as_i64()).map(|v| SignalId(v as u64)).collect();
        let slots: Vec<i32> = msg
            .tags
            .iter()
            .filter(|(k, _)| k == "@slot")
            .filter_map(|(_, v)| v.as_i64())
            .map(|v| v as i32)
            .collect();

        let Some(own_idx) = sources.iter().position(|s| self.owns(*s)) else { return };
        let own_source = sources[own_idx];
        let own_shape = self.signal_shape(own_source).expect("owned");
        let own_num_inst = self.signals[&own_source].num_inst();
        let slot = slots.get(own_idx).copied().map(|v| SlotId(v as usize));

        if is_source_located {
            let mut map = Map::new_source(map_id, sources, destination, dest_shape, ProcessLocation::Source, expr, num_inst, own_idx);
            match map.compile_on_source(own_shape) {
                Ok(history_depth) => {
                    if let Some(sig) = self.signals.get_mut(&own_source) {
                        sig.ensure_history(history_depth as usize);
                    }
                    self.outgoing.entry(own_source).or_default().push(OutgoingRoute {
                        kind: RouteKind::ComputeAtSource { map_id, dest_dev: from.clone(), dest_path: dst_path },
                    });
                    self.maps.insert(map_id, map);
                }
                Err(_) => return,
            }
        } else if let Some(slot) = slot {
            self.outgoing.entry(own_source).or_default().push(OutgoingRoute {
                kind: RouteKind::RawForward { map_id, dest_dev: from.clone(), dest_path: dst_path, slot },
            });
        } else {
            return;
        }

        self.bus.send_admin(
            OscMessage::new("/mapTo", self.now())
                .with_tag("@from", OscValue::Str(self.allocator.name()))
                .with_tag("@id", OscValue::I64(map_id.0 as i64))
                .with_tag("@src_id", OscValue::I64(own_source.0 as i64))
                .with_tag("@srcType", OscValue::Str(format!("{:?}", own_shape.scalar_type)))
                .with_tag("@srcLen", OscValue::I32(own_shape.vec_len as i32))
                .with_tag("@num_instances", OscValue::I32(own_num_inst as i32)),
        );
    }

    /// `/mapTo`: only meaningful to the device that owns this map's
    /// destination and is still waiting on source shapes.
    fn handle_map_to(&mut self, msg: &OscMessage) {
        let Some(OscValue::I64(map_id)) = msg.tag("@id") else { return };
        let map_id = MapId(*map_id as u64);
        let Some(OscValue::I64(src_id)) = msg.tag("@src_id") else { return };
        let src_id = SignalId(*src_id as u64);
        let Some(ty) = msg.tag("@srcType").and_then(OscValue::as_str).map(parse_scalar_type) else { return };
        let len = msg.tag("@srcLen").and_then(OscValue::as_i64).unwrap_or(1) as usize;
        let num_inst = msg.tag("@num_instances").and_then(OscValue::as_i64).unwrap_or(1) as usize;

        let Some(map) = self.maps.get_mut(&map_id) else { return };
        let Some(idx) = map.sources.iter().position(|s| *s == src_id) else { return };
        let shape = InputSig { scalar_type: ty, vec_len: len };
        let completed = match map.record_source_shape(idx, shape, num_inst) {
            Ok(c) => c,
            Err(_) => return,
        };
        if completed {
            map.activate();
            self.bus.send_admin(
                OscMessage::new("/mapped", self.now())
                    .with_tag("@from", OscValue::Str(self.allocator.name()))
                    .with_tag("@id", OscValue::I64(map_id.0 as i64)),
            );
        }
    }

    /// `/mapped`: every participant (source devices holding a `Source`-role
    /// `Map`) promotes to `Active`.
    fn handle_mapped(&mut self, msg: &OscMessage) {
        let Some(OscValue::I64(map_id)) = msg.tag("@id") else { return };
        let map_id = MapId(*map_id as u64);
        if let Some(map) = self.maps.get_mut(&map_id) {
            map.activate();
        }
    }

    fn handle_unmap(&mut self, msg: &OscMessage) {
        let Some(OscValue::I64(map_id)) = msg.tag("@id") else { return };
        let map_id = MapId(*map_id as u64);
        self.maps.remove(&map_id);
        self.slot_owners.retain(|_, (m, _)| *m != map_id);
        self.outgoing.retain(|_, routes| {
            routes.retain(|r| r.kind.map_id() != map_id);
            !routes.is_empty()
        });
    }

    /// A value or release message addressed to one of our own signals'
    /// paths (§4.E "Slot & router"): `@sl` present means it's feeding a
    /// specific map slot, absent means either a direct signal update or
    /// the already-computed result of a `Source`-processed map.
    fn handle_value_message(&mut self, path: &str, msg: &OscMessage) {
        let Some(&dest_id) = self.signal_ids_by_path.get(path) else { return };
        let Some(slot_arg) = msg.tag("@sl").and_then(OscValue::as_i64) else {
            // No slot tag: either a direct update or a `Source`-computed
            // result landing straight on the destination signal.
            let Some(dest_shape) = self.signal_shape(dest_id) else { return };
            let Some(value) = msg.values_as_vector(dest_shape.scalar_type) else { return };
            if let Some(sig) = self.signals.get_mut(&dest_id) {
                sig.set_value(0, value, msg.time);
            }
            self.dirty_signals.push_back((dest_id, 0));
            return;
        };
        let slot = SlotId(slot_arg as usize);
        let Some(&(map_id, source_idx)) = self.slot_owners.get(&slot) else { return };
        let Some(map) = self.maps.get(&map_id) else { return };
        let dest_is_instanced = self.signals.get(&dest_id).map(|s| s.num_inst() > 1).unwrap_or(false);
        let max_src_inst = map.max_source_num_inst();
        let dest_slot_num_inst = map.num_inst;
        let is_release = msg.is_release();

        let inst = match msg.tag("@in").and_then(OscValue::as_i64) {
            Some(gid_raw) => {
                let Some(inst) = self.resolve_instance(map_id, source_idx, Gid(gid_raw as u64), !is_release) else {
                    return;
                };
                inst
            }
            None => 0,
        };

        let Some(src_shape) = self.pending_sources_shape(map_id, source_idx) else { return };
        let admission = admit(dest_is_instanced, max_src_inst, dest_slot_num_inst, msg.args.len(), src_shape.vec_len, is_release, inst);

        let Some(map) = self.maps.get_mut(&map_id) else { return };
        match admission {
            Admission::Direct(i) => {
                if let Some(value) = msg.values_as_vector(src_shape.scalar_type) {
                    map.push_source_sample(source_idx, i, value, msg.time);
                }
            }
            Admission::Broadcast => {
                if let Some(value) = msg.values_as_vector(src_shape.scalar_type) {
                    for row in 0..map.num_inst {
                        map.push_source_sample(source_idx, row, value.clone(), msg.time);
                    }
                }
            }
            Admission::Release(i) => {
                map.reset_source_instance(source_idx, i);
                if let Some(sig) = self.signals.get_mut(&dest_id) {
                    sig.release(i);
                }
            }
            Admission::RejectedPartial => {
                tracing::warn!(path, "rejected partial vector on convergent map slot");
            }
        }
    }

    fn pending_sources_shape(&self, map_id: MapId, idx: usize) -> Option<InputSig> {
        let map = self.maps.get(&map_id)?;
        map.source_shape(idx)
    }

    /// Resolve an incoming GID to a local instance row via the id-map
    /// table (§4.D). `has_values` false means the message is a release.
    fn resolve_instance(&mut self, map_id: MapId, source_idx: usize, gid: Gid, has_values: bool) -> Option<usize> {
        let table = self.idmaps.get_mut(0)?;
        let key = (map_id, source_idx, gid);
        if !has_values {
            if self.gid_bound.remove(&key) {
                if let Some(handle) = table.lookup_by_gid(gid) {
                    let row = handle.index();
                    table.gid_decref(handle);
                    return Some(row);
                }
            }
            return None;
        }
        let handle = match table.lookup_by_gid(gid) {
            Some(h) => h,
            None => {
                let lid = Lid(self.next_lid);
                self.next_lid += 1;
                table.add(lid, Some(gid))
            }
        };
        if self.gid_bound.insert(key) {
            table.gid_incref(handle);
        }
        Some(handle.index())
    }
}

enum RouteAction {
    Local(MapId, usize),
    RawForward(String, String, SlotId),
    ComputeAtSource(MapId, String, String),
}

fn flags_for_keyword(kw: &str) -> SubscribeFlags {
    match kw {
        "device" => SubscribeFlags::DEVICE,
        "signals" => SubscribeFlags::SIGNALS,
        "incoming_maps" => SubscribeFlags::MAPS_IN,
        "outgoing_maps" => SubscribeFlags::MAPS_OUT,
        "maps" => SubscribeFlags::MAPS_IN | SubscribeFlags::MAPS_OUT,
        _ => SubscribeFlags::ALL,
    }
}

fn parse_scalar_type(s: &str) -> ScalarType {
    match s {
        "I32" => ScalarType::I32,
        "F32" => ScalarType::F32,
        _ => ScalarType::F64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use mapper_transport::{BusRegistry, InProcessBus, ManualClock};
    use std::sync::Arc;

    fn spin_until_locked(dev: &mut Device, clock: &Arc<ManualClock>) {
        for _ in 0..10 {
            clock.advance_secs(2.1);
            dev.poll(Duration::from_millis(0));
            if dev.is_ready() {
                return;
            }
        }
        panic!("device never locked");
    }

    fn new_device(registry: &BusRegistry, bus_name: &str, prefix: &str) -> (Device, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timetag::ZERO));
        let dev = Device::new(
            DeviceConfig::new(prefix),
            Box::new(InProcessBus::join(registry, bus_name)),
            Box::new(clock.clone()),
        )
        .unwrap();
        (dev, clock)
    }

    #[test]
    fn single_device_locks_and_adds_a_signal() {
        let registry = BusRegistry::new();
        let (mut dev, clock) = new_device(&registry, "solo.1", "solo");
        spin_until_locked(&mut dev, &clock);
        assert!(dev.is_ready());
        let sig = dev.add_signal("out", Direction::Out, ScalarType::F32, 1, 1, false).unwrap();
        assert!(dev.signal_value(sig, 0).is_none());
    }

    #[test]
    fn local_only_identity_map_delivers_same_tick() {
        let registry = BusRegistry::new();
        let (mut dev, clock) = new_device(&registry, "solo.1", "solo");
        spin_until_locked(&mut dev, &clock);
        let out = dev.add_signal("out", Direction::Out, ScalarType::F32, 1, 1, false).unwrap();
        let inp = dev.add_signal("in", Direction::In, ScalarType::F32, 1, 1, false).unwrap();
        dev.create_map(vec![out], inp, Some("y = x + 1;"), ProcessLocation::Destination, 1).unwrap();
        dev.set_value(out, 0, Vector::F32(vec![41.0])).unwrap();
        dev.poll(Duration::from_millis(0));
        assert_eq!(dev.signal_value(inp, 0), Some(Vector::F32(vec![42.0])));
    }

    #[test]
    fn unmapping_stops_further_propagation() {
        let registry = BusRegistry::new();
        let (mut dev, clock) = new_device(&registry, "solo.1", "solo");
        spin_until_locked(&mut dev, &clock);
        let out = dev.add_signal("out", Direction::Out, ScalarType::F32, 1, 1, false).unwrap();
        let inp = dev.add_signal("in", Direction::In, ScalarType::F32, 1, 1, false).unwrap();
        let map_id = dev.create_map(vec![out], inp, None, ProcessLocation::Destination, 1).unwrap();
        dev.unmap(map_id);
        dev.set_value(out, 0, Vector::F32(vec![9.0])).unwrap();
        dev.poll(Duration::from_millis(0));
        assert!(dev.signal_value(inp, 0).is_none());
    }
}
