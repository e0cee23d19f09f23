//! Component G — the name allocator.
//!
//! Each device starts at ordinal 1 and probes `prefix.1` on the discovery
//! bus; a peer that already holds that name and wins the random tie-break
//! answers with `/name/registered`, forcing a bump. The allocator owns
//! nothing but its own probe/collision bookkeeping — the device drives it
//! by calling `tick` once per poll and feeding it `/name/probe` and
//! `/name/registered` traffic observed on the bus.

use mapper_transport::{Bus, OscMessage, OscValue};
use mapper_types::Timetag;

/// Number of alternative-ordinal hints a collision responder can suggest
/// before it has to fall back to a random bump; also bounds how many
/// distinct "first free hint" slots the tick rule can consume in one
/// collision round.
const NUM_HINTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorState {
    Probing,
    Locked,
}

/// `{ordinal_val, hints[8], collision_count, count_time, locked, online}`
/// from §4.G, plus the random tie-break value carried on the current probe.
pub struct NameAllocator {
    prefix: String,
    ordinal_val: u32,
    hints: [bool; NUM_HINTS],
    collision_count: u32,
    count_time: Option<Timetag>,
    locked: bool,
    /// Whether this device has observed any bus traffic since its last
    /// probe; a device that hears nothing for 5s re-probes the same
    /// ordinal rather than assuming it's uncontested (it may simply be
    /// isolated from the segment).
    online: bool,
    probe_rand: u32,
}

impl NameAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        NameAllocator {
            prefix: prefix.into(),
            ordinal_val: 1,
            hints: [true; NUM_HINTS],
            collision_count: 0,
            count_time: None,
            locked: false,
            online: false,
            probe_rand: rand::random(),
        }
    }

    pub fn name(&self) -> String {
        format!("{}.{}", self.prefix, self.ordinal_val)
    }

    pub fn state(&self) -> AllocatorState {
        if self.locked { AllocatorState::Locked } else { AllocatorState::Probing }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Mark that bus traffic was observed this tick (any message at all,
    /// not just naming traffic) — clears the "offline" branch of the tick
    /// rule below.
    pub fn mark_online(&mut self) {
        self.online = true;
    }

    fn probe(&mut self, now: Timetag, bus: &dyn Bus) {
        self.probe_rand = rand::random();
        self.count_time = Some(now);
        self.online = false;
        tracing::debug!(name = %self.name(), "probing ordinal");
        bus.send_admin(
            OscMessage::new("/name/probe", now)
                .with_args(vec![OscValue::Str(self.name()), OscValue::I32(self.probe_rand as i32)]),
        );
    }

    fn lock(&mut self, now: Timetag, bus: &dyn Bus) {
        self.locked = true;
        self.online = true;
        tracing::info!(name = %self.name(), "ordinal locked");
        bus.send_admin(
            OscMessage::new("/name/registered", now)
                .with_args(vec![OscValue::Str(self.name()), OscValue::I32(self.probe_rand as i32)]),
        );
    }

    /// Feed an observed `/name/probe` or `/name/registered` naming the same
    /// ordinal this device is currently holding. Returns `true` if this
    /// device lost the tie-break and should count a collision.
    pub fn observe_contest(&mut self, peer_name: &str, peer_rand: i32) -> bool {
        self.online = true;
        if self.locked || peer_name != self.name() {
            return false;
        }
        if (peer_rand as u32) > self.probe_rand {
            self.collision_count += 1;
            if let Some(slot) = self.hints.iter().position(|free| *free) {
                self.hints[slot] = false;
            }
            true
        } else {
            false
        }
    }

    /// Advance the allocator by one poll tick, per the rule in §4.G.
    /// `num_devices_seen` is the graph's current peer count, used to scale
    /// the collision-bump random offset; a minimum bump of 1 guards the
    /// degenerate fresh-boot case where no peers have been seen yet (§9
    /// Open Questions, decided).
    pub fn tick(&mut self, now: Timetag, num_devices_seen: u32, bus: &dyn Bus) {
        if self.locked {
            return;
        }
        let Some(count_time) = self.count_time else {
            self.probe(now, bus);
            return;
        };
        let elapsed = now.checked_sub(count_time).map(|d| d.as_secs_f64()).unwrap_or(0.0);

        if !self.online && elapsed >= 5.0 {
            self.probe(now, bus);
        } else if elapsed >= 2.0 && self.collision_count < 2 {
            self.lock(now, bus);
        } else if elapsed >= 0.5 && self.collision_count > 1 {
            let hint_idx = self.hints.iter().position(|free| *free).unwrap_or(0) as u32;
            let bump = hint_idx + 1 + rand::random::<u32>() % num_devices_seen.max(1);
            self.ordinal_val += bump;
            self.hints = [true; NUM_HINTS];
            self.collision_count = 0;
            self.probe(now, bus);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_transport::{BusRegistry, InProcessBus};

    #[test]
    fn starts_at_ordinal_one() {
        let a = NameAllocator::new("node");
        assert_eq!(a.name(), "node.1");
        assert!(!a.is_locked());
    }

    #[test]
    fn locks_after_quiet_period_with_no_collisions() {
        let registry = BusRegistry::new();
        let bus = InProcessBus::join(&registry, "node.1");
        let mut a = NameAllocator::new("node");

        a.tick(Timetag::ZERO, 0, &bus);
        assert!(!a.is_locked());
        a.tick(Timetag::from_secs_f64(2.1), 0, &bus);
        assert!(a.is_locked());
        assert_eq!(a.name(), "node.1");
    }

    #[test]
    fn losing_tie_break_bumps_ordinal_past_two_collisions() {
        let registry = BusRegistry::new();
        let bus = InProcessBus::join(&registry, "node.probe");
        let mut a = NameAllocator::new("node");
        a.tick(Timetag::ZERO, 0, &bus);

        assert!(a.observe_contest("node.1", i32::MAX));
        assert!(a.observe_contest("node.1", i32::MAX));

        a.tick(Timetag::from_secs_f64(0.6), 1, &bus);
        assert_ne!(a.ordinal_val, 1);
        assert!(!a.is_locked());
    }

    #[test]
    fn winning_tie_break_does_not_count_as_collision() {
        let mut a = NameAllocator::new("node");
        assert!(!a.observe_contest("node.1", -1));
    }

    #[test]
    fn contest_for_a_different_name_is_ignored() {
        let mut a = NameAllocator::new("node");
        assert!(!a.observe_contest("other.1", i32::MAX));
    }

    proptest::proptest! {
        /// A collision-triggered bump always advances the ordinal by at
        /// least 1, regardless of how many peers have been seen — including
        /// the degenerate zero-peers case (§9 Open Questions, decided).
        #[test]
        fn collision_bump_always_advances_ordinal(num_devices_seen in 0u32..20) {
            let registry = BusRegistry::new();
            let bus = InProcessBus::join(&registry, "probe-peer");
            let mut a = NameAllocator::new("node");
            a.tick(Timetag::ZERO, 0, &bus);
            a.observe_contest("node.1", i32::MAX);
            a.observe_contest("node.1", i32::MAX);
            let before = a.ordinal_val;
            a.tick(Timetag::from_secs_f64(0.6), num_devices_seen, &bus);
            proptest::prop_assert!(a.ordinal_val > before);
        }
    }
}
