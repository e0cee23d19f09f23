use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::TransportError;
use crate::osc::OscMessage;

/// The wire boundary this crate actually implements against: administrative
/// broadcast (the multicast discovery bus) plus unicast to a named peer
/// (a link's data channel). A real deployment backs this with UDP
/// multicast and per-link TCP/UDP sockets (§6); nothing above this trait
/// needs to know that.
pub trait Bus {
    /// This bus's own device name, as registered.
    fn local_name(&self) -> &str;

    /// Broadcast to every other registered peer — the admin/discovery bus.
    fn send_admin(&self, msg: OscMessage);

    /// Send to exactly one named peer — a link's unicast data channel.
    fn send_to(&self, peer: &str, msg: OscMessage) -> Result<(), TransportError>;

    /// Drain inbound messages. Blocks for up to `budget` waiting for the
    /// first message, then drains whatever else has already arrived
    /// without blocking further — this is the shape the device poll loop
    /// needs (§5 "Suspension points": recv is the only blocking call, and
    /// it's capped so housekeeping still runs every tick).
    fn recv(&self, budget: Duration) -> Vec<OscMessage>;
}

/// Shared registry of peers' inboxes, standing in for a multicast segment.
/// Cloning an `InProcessBus` does not clone the registry's contents — every
/// device on the same simulated network shares one `BusRegistry`, grounded
/// in the same "in-process stand-in for a network transport" role that
/// `sem_os_client::InProcessClient` plays for its RPC boundary, adapted
/// here to a synchronous, channel-based multi-peer bus rather than a
/// single-peer async call.
#[derive(Clone, Default)]
pub struct BusRegistry {
    inboxes: Arc<Mutex<HashMap<String, Sender<OscMessage>>>>,
}

impl BusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_count(&self) -> usize {
        self.inboxes.lock().unwrap().len()
    }
}

pub struct InProcessBus {
    name: String,
    registry: BusRegistry,
    rx: Receiver<OscMessage>,
}

impl InProcessBus {
    /// Join `registry` under `name`, replacing any prior registration of
    /// the same name (a fresh probe after a crash/restart takes over the
    /// old inbox rather than racing it).
    pub fn join(registry: &BusRegistry, name: impl Into<String>) -> Self {
        let name = name.into();
        let (tx, rx) = channel();
        registry.inboxes.lock().unwrap().insert(name.clone(), tx);
        InProcessBus { name, registry: registry.clone(), rx }
    }
}

impl Bus for InProcessBus {
    fn local_name(&self) -> &str {
        &self.name
    }

    fn send_admin(&self, msg: OscMessage) {
        let inboxes = self.registry.inboxes.lock().unwrap();
        for (name, tx) in inboxes.iter() {
            if name != &self.name {
                let _ = tx.send(msg.clone());
            }
        }
    }

    fn send_to(&self, peer: &str, msg: OscMessage) -> Result<(), TransportError> {
        let inboxes = self.registry.inboxes.lock().unwrap();
        match inboxes.get(peer) {
            Some(tx) => tx.send(msg).map_err(|_| TransportError::ChannelClosed(peer.to_string())),
            None => Err(TransportError::UnknownPeer(peer.to_string())),
        }
    }

    fn recv(&self, budget: Duration) -> Vec<OscMessage> {
        let mut out = Vec::new();
        if let Ok(msg) = self.rx.recv_timeout(budget) {
            out.push(msg);
        }
        while let Ok(msg) = self.rx.try_recv() {
            out.push(msg);
        }
        out
    }
}

impl Drop for InProcessBus {
    fn drop(&mut self) {
        self.registry.inboxes.lock().unwrap().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_types::Timetag;

    #[test]
    fn admin_broadcast_reaches_every_other_peer_not_self() {
        let registry = BusRegistry::new();
        let a = InProcessBus::join(&registry, "a.1");
        let b = InProcessBus::join(&registry, "b.1");

        a.send_admin(OscMessage::new("/device", Timetag::ZERO));

        let received_b = b.recv(Duration::from_millis(50));
        assert_eq!(received_b.len(), 1);
        let received_a = a.recv(Duration::from_millis(10));
        assert!(received_a.is_empty());
    }

    #[test]
    fn unicast_to_unknown_peer_errors() {
        let registry = BusRegistry::new();
        let a = InProcessBus::join(&registry, "a.1");
        let err = a.send_to("ghost.1", OscMessage::new("/x", Timetag::ZERO));
        assert_eq!(err, Err(TransportError::UnknownPeer("ghost.1".into())));
    }

    #[test]
    fn drop_deregisters_the_peer() {
        let registry = BusRegistry::new();
        {
            let _a = InProcessBus::join(&registry, "a.1");
            assert_eq!(registry.peer_count(), 1);
        }
        assert_eq!(registry.peer_count(), 0);
    }
}
