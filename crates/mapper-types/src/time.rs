use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A 64-bit NTP-style timetag: the upper 32 bits count whole seconds since an
/// arbitrary epoch chosen by the first device to start, the lower 32 bits are
/// a fractional-second count. Devices never need to agree on the epoch
/// itself — only on relative offsets, which is what the per-link clock
/// (`mapper-graph`) estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timetag(pub u64);

impl Timetag {
    pub const ZERO: Timetag = Timetag(0);

    pub fn from_secs_f64(secs: f64) -> Self {
        let whole = secs.trunc().max(0.0) as u64;
        let frac = (secs.fract().max(0.0) * (u32::MAX as f64)) as u64;
        Timetag((whole << 32) | frac)
    }

    pub fn as_secs_f64(&self) -> f64 {
        let whole = (self.0 >> 32) as f64;
        let frac = (self.0 & 0xffff_ffff) as f64 / (u32::MAX as f64);
        whole + frac
    }

    pub fn checked_sub(&self, other: Timetag) -> Option<Duration> {
        let delta = self.as_secs_f64() - other.as_secs_f64();
        if delta < 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(delta))
        }
    }

    pub fn offset_by(&self, secs: f64) -> Timetag {
        Timetag::from_secs_f64(self.as_secs_f64() + secs)
    }
}

impl From<Duration> for Timetag {
    fn from(d: Duration) -> Self {
        Timetag::from_secs_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_seconds() {
        let tt = Timetag::from_secs_f64(12.5);
        assert!((tt.as_secs_f64() - 12.5).abs() < 1e-6);
    }

    #[test]
    fn ordering_matches_time() {
        let a = Timetag::from_secs_f64(1.0);
        let b = Timetag::from_secs_f64(2.0);
        assert!(a < b);
    }

    #[test]
    fn sub_is_none_when_negative() {
        let a = Timetag::from_secs_f64(1.0);
        let b = Timetag::from_secs_f64(2.0);
        assert!(a.checked_sub(b).is_none());
        assert!(b.checked_sub(a).is_some());
    }
}
