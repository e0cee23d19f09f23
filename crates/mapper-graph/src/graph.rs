use std::collections::HashMap;

use mapper_types::{DeviceId, SignalId, Timetag};

use crate::link::Link;
use crate::records::{DeviceRecord, MapRecord, SignalRecord};
use crate::subscription::SubscriberTable;

/// Replicated peer index (§3 "Graph", §4.H). One `Graph` is shared
/// (immutably, per the concurrency model in §5) across every device
/// created against the same discovery bus, or owned by a single device;
/// concurrent mutation across devices sharing one `Graph` is the caller's
/// responsibility.
#[derive(Default)]
pub struct Graph {
    devices: HashMap<DeviceId, DeviceRecord>,
    signals: HashMap<SignalId, SignalRecord>,
    maps: HashMap<u64, MapRecord>,
    links: HashMap<DeviceId, Link>,
    subscribers: HashMap<DeviceId, SubscriberTable>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replicate a `/device` or `/sync` announcement. Monotone versioning
    /// (Testable Property 8): an announcement with a version older than
    /// what's already recorded is ignored outright.
    pub fn upsert_device(&mut self, record: DeviceRecord) {
        match self.devices.get(&record.id) {
            Some(existing) if record.version < existing.version => {
                tracing::debug!(
                    name = %record.name,
                    incoming = record.version,
                    known = existing.version,
                    "ignoring stale /sync version"
                );
            }
            _ => {
                self.devices.insert(record.id, record);
            }
        }
    }

    pub fn device(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.devices.get(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub fn remove_device(&mut self, id: DeviceId) {
        self.devices.remove(&id);
        self.links.remove(&id);
        self.signals.retain(|_, s| s.device != id);
        self.maps.retain(|_, m| {
            m.destination.device() != id && !m.sources.iter().any(|s| s.device() == id)
        });
    }

    pub fn upsert_signal(&mut self, record: SignalRecord) {
        self.signals.insert(record.id, record);
    }

    pub fn signal(&self, id: SignalId) -> Option<&SignalRecord> {
        self.signals.get(&id)
    }

    pub fn upsert_map(&mut self, record: MapRecord) {
        self.maps.insert(record.id, record);
    }

    pub fn map(&self, id: u64) -> Option<&MapRecord> {
        self.maps.get(&id)
    }

    pub fn map_mut(&mut self, id: u64) -> Option<&mut MapRecord> {
        self.maps.get_mut(&id)
    }

    pub fn remove_map(&mut self, id: u64) -> Option<MapRecord> {
        self.maps.remove(&id)
    }

    pub fn maps(&self) -> impl Iterator<Item = &MapRecord> {
        self.maps.values()
    }

    pub fn link_mut_or_create(&mut self, peer: DeviceId, now: Timetag) -> &mut Link {
        self.links.entry(peer).or_insert_with(|| Link::new(peer, now))
    }

    pub fn link(&self, peer: DeviceId) -> Option<&Link> {
        self.links.get(&peer)
    }

    pub fn subscribe(
        &mut self,
        device: DeviceId,
        address: impl Into<String>,
        lease_secs: f64,
        flags: crate::subscription::SubscribeFlags,
        now: Timetag,
    ) {
        self.subscribers.entry(device).or_default().subscribe(address, lease_secs, flags, now);
    }

    pub fn subscribers_mut(&mut self, device: DeviceId) -> &mut SubscriberTable {
        self.subscribers.entry(device).or_default()
    }

    /// Reclaim links idle past `link_timeout_secs` and devices that have
    /// gone silent past `sync_timeout_secs` — the graph's housekeeping pass
    /// (§3 "Graph": "objects' lifetimes are governed by the graph's
    /// housekeeping pass").
    pub fn housekeeping(&mut self, now: Timetag, link_timeout_secs: f64, sync_timeout_secs: f64) -> Vec<DeviceId> {
        self.links.retain(|_, link| !link.is_idle() && !link.timed_out(now, link_timeout_secs));

        let expired: Vec<DeviceId> = self
            .devices
            .values()
            .filter(|d| {
                now.checked_sub(d.last_sync).map(|dur| dur.as_secs_f64()).unwrap_or(0.0) > sync_timeout_secs
            })
            .map(|d| d.id)
            .collect();
        for id in &expired {
            self.remove_device(*id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_types::ProcessLocation;

    #[test]
    fn stale_sync_version_is_ignored() {
        let mut g = Graph::new();
        let id = DeviceId::from_name("node.1");
        let mut rec = DeviceRecord::new(id, "node.1");
        rec.version = 5;
        g.upsert_device(rec.clone());

        let mut stale = rec.clone();
        stale.version = 3;
        stale.host = Some("stale-host".into());
        g.upsert_device(stale);

        assert_eq!(g.device(id).unwrap().version, 5);
        assert_ne!(g.device(id).unwrap().host, Some("stale-host".into()));
    }

    #[test]
    fn newer_sync_version_wins() {
        let mut g = Graph::new();
        let id = DeviceId::from_name("node.1");
        let mut rec = DeviceRecord::new(id, "node.1");
        rec.version = 1;
        g.upsert_device(rec.clone());
        let mut newer = rec;
        newer.version = 2;
        g.upsert_device(newer);
        assert_eq!(g.device(id).unwrap().version, 2);
    }

    #[test]
    fn housekeeping_drops_devices_silent_past_timeout() {
        let mut g = Graph::new();
        let id = DeviceId::from_name("node.1");
        let mut rec = DeviceRecord::new(id, "node.1");
        rec.last_sync = Timetag::ZERO;
        g.upsert_device(rec);

        let expired = g.housekeeping(Timetag::from_secs_f64(100.0), 30.0, 9.0);
        assert_eq!(expired, vec![id]);
        assert!(g.device(id).is_none());
    }

    #[test]
    fn removing_a_device_drops_its_signals_and_maps() {
        let mut g = Graph::new();
        let dev_a = DeviceId::from_name("a.1");
        let dev_b = DeviceId::from_name("b.1");
        let sig_out = SignalId::new(dev_a, 0);
        let sig_in = SignalId::new(dev_b, 0);
        g.upsert_map(MapRecord {
            id: 1,
            sources: vec![sig_out],
            destination: sig_in,
            expr: None,
            process_location: ProcessLocation::Destination,
            num_inst: 1,
            status: mapper_types::MapStatus::Active,
        });
        g.remove_device(dev_a);
        assert!(g.map(1).is_none());
    }
}
