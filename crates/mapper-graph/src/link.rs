use mapper_types::{DeviceId, Timetag};

/// Latency/offset estimates stay within this band of the running average
/// before a new sample is trusted enough to exponentially blend rather than
/// replace outright (§4.H "Per-link clock").
const JITTER_BAND_SECS: f64 = 0.05;
const EMA_ALPHA: f64 = 0.2;

fn ema(prev: f64, sample: f64) -> f64 {
    prev + EMA_ALPHA * (sample - prev)
}

/// Running clock-offset/latency estimate for one link, fed by `/ping`
/// exchanges. The first exchange seeds the estimate outright; later
/// exchanges blend when the new latency sample is close to what's already
/// trusted, and replace outright when the peer reports an offset running
/// further ahead (favoring the more conservative, larger offset).
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkClock {
    pub offset_secs: f64,
    pub latency_secs: f64,
    seeded: bool,
}

impl LinkClock {
    /// `now`/`their_send_time` are this device's and the peer's clocks at
    /// the moment this ack was received; `sent_time` is when this device
    /// sent the ping being acked; `peer_delta` is the peer-reported
    /// processing delay between receiving and replying.
    pub fn on_ping(&mut self, now: f64, sent_time: f64, peer_delta: f64, their_send_time: f64) {
        let latency = ((now - sent_time - peer_delta) / 2.0).max(0.0);
        let offset = now - their_send_time - latency;

        if !self.seeded {
            self.offset_secs = offset;
            self.latency_secs = latency;
            self.seeded = true;
        } else if (latency - self.latency_secs).abs() <= JITTER_BAND_SECS {
            self.offset_secs = ema(self.offset_secs, offset);
            self.latency_secs = ema(self.latency_secs, latency);
        } else if offset > self.offset_secs {
            self.offset_secs = offset;
            self.latency_secs = latency;
        }
    }
}

/// Between-device transport state (data model §3 "Link"). Lazily created
/// the first time a map binds two devices; removed when the last map using
/// it is dropped or the peer goes unreachable past `link_timeout`.
pub struct Link {
    pub peer: DeviceId,
    pub addr: Option<String>,
    pub clock: LinkClock,
    pub in_maps: u32,
    pub out_maps: u32,
    pub last_seen: Timetag,
}

impl Link {
    pub fn new(peer: DeviceId, now: Timetag) -> Self {
        Link { peer, addr: None, clock: LinkClock::default(), in_maps: 0, out_maps: 0, last_seen: now }
    }

    pub fn is_idle(&self) -> bool {
        self.in_maps == 0 && self.out_maps == 0
    }

    pub fn timed_out(&self, now: Timetag, timeout_secs: f64) -> bool {
        now.checked_sub(self.last_seen).map(|d| d.as_secs_f64()).unwrap_or(0.0) > timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_ping_seeds_the_estimate() {
        let mut c = LinkClock::default();
        c.on_ping(10.0, 9.0, 0.1, 8.5);
        assert!(c.latency_secs > 0.0);
    }

    #[test]
    fn close_followup_blends_rather_than_replaces() {
        let mut c = LinkClock::default();
        c.on_ping(10.0, 9.0, 0.1, 8.5);
        let after_first = c.offset_secs;
        c.on_ping(20.0, 19.0, 0.1, 18.5);
        // blended estimate moves toward the new sample but isn't identical
        // to either the first estimate or a full replacement.
        assert_ne!(c.offset_secs, after_first);
    }

    proptest::proptest! {
        /// `latency_secs` is a physical round-trip half, never negative,
        /// no matter how skewed the reported clocks are relative to each
        /// other.
        #[test]
        fn latency_is_never_negative(
            now in 0.0f64..1e6,
            sent_time in 0.0f64..1e6,
            peer_delta in 0.0f64..10.0,
            their_send_time in 0.0f64..1e6,
        ) {
            let mut c = LinkClock::default();
            c.on_ping(now, sent_time, peer_delta, their_send_time);
            proptest::prop_assert!(c.latency_secs >= 0.0);
        }
    }
}
