use bitflags::bitflags;
use mapper_types::Timetag;

bitflags! {
    /// `object_flags` from `/dev/subscribe` — which object categories the
    /// subscriber wants pushed. `ALL` is the union of every other bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubscribeFlags: u8 {
        const DEVICE        = 1 << 0;
        const SIGNALS       = 1 << 1;
        const MAPS_IN       = 1 << 2;
        const MAPS_OUT      = 1 << 3;
        const ALL = Self::DEVICE.bits() | Self::SIGNALS.bits() | Self::MAPS_IN.bits() | Self::MAPS_OUT.bits();
    }
}

/// `(address, expiry_time, flag_mask)` — one subscriber's standing request
/// for push updates (§4.H).
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub address: String,
    pub expiry: Timetag,
    pub flags: SubscribeFlags,
}

impl Subscription {
    pub fn is_expired(&self, now: Timetag) -> bool {
        now > self.expiry
    }
}

/// Per-device table of subscribers. `subscribe` is idempotent within a
/// lease (Testable Property 7): re-subscribing the same address replaces
/// its entry rather than appending a duplicate.
#[derive(Debug, Default)]
pub struct SubscriberTable {
    subs: Vec<Subscription>,
}

impl SubscriberTable {
    pub fn subscribe(&mut self, address: impl Into<String>, lease_secs: f64, flags: SubscribeFlags, now: Timetag) {
        let address = address.into();
        self.subs.retain(|s| s.address != address);
        self.subs.push(Subscription { address, expiry: now.offset_by(lease_secs), flags });
    }

    pub fn unsubscribe(&mut self, address: &str) {
        self.subs.retain(|s| s.address != address);
    }

    /// Drop expired subscribers lazily, as the spec describes ("dropped
    /// lazily on next publish"), and return the still-live ones matching
    /// `flag`.
    pub fn live_matching(&mut self, flag: SubscribeFlags, now: Timetag) -> Vec<&Subscription> {
        self.subs.retain(|s| !s.is_expired(now));
        self.subs.iter().filter(|s| s.flags.intersects(flag)).collect()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resubscribing_within_lease_does_not_duplicate() {
        let mut t = SubscriberTable::default();
        t.subscribe("peer.1", 10.0, SubscribeFlags::ALL, Timetag::ZERO);
        t.subscribe("peer.1", 10.0, SubscribeFlags::ALL, Timetag::from_secs_f64(1.0));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn expired_subscriber_is_dropped_on_next_publish() {
        let mut t = SubscriberTable::default();
        t.subscribe("peer.1", 1.0, SubscribeFlags::ALL, Timetag::ZERO);
        let live = t.live_matching(SubscribeFlags::ALL, Timetag::from_secs_f64(5.0));
        assert!(live.is_empty());
        assert!(t.is_empty());
    }

    #[test]
    fn flag_filtering_excludes_non_matching_subscribers() {
        let mut t = SubscriberTable::default();
        t.subscribe("peer.1", 10.0, SubscribeFlags::SIGNALS, Timetag::ZERO);
        assert!(t.live_matching(SubscribeFlags::MAPS_IN, Timetag::ZERO).is_empty());
        assert_eq!(t.live_matching(SubscribeFlags::SIGNALS, Timetag::ZERO).len(), 1);
    }
}
