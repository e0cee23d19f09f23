use mapper_types::Timetag;
use std::time::Instant;

/// Wall-clock source. Threading this as an explicit trait (rather than the
/// source's `static mpr_time ts`, see REDESIGN FLAGS) means a device's poll
/// can snapshot `now` once per tick and pass it down everywhere it's
/// needed, and tests can substitute a deterministic clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timetag;
}

/// Real wall-clock time, relative to the instant the clock was created.
/// Every device sharing one `InProcessClock` (or separate instances created
/// at the same moment) agree closely enough for the demos and integration
/// tests; devices on a real deployment would instead rely on the per-link
/// offset estimation in `mapper-graph`.
pub struct InProcessClock {
    start: Instant,
}

impl InProcessClock {
    pub fn new() -> Self {
        InProcessClock { start: Instant::now() }
    }
}

impl Default for InProcessClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for InProcessClock {
    fn now(&self) -> Timetag {
        Timetag::from(self.start.elapsed())
    }
}

/// A clock with a value the test sets explicitly, for scenarios that need
/// to assert on exact elapsed-time thresholds (e.g. the name-allocator
/// tick rule in `mapper-alloc`) without sleeping the test thread.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timetag) -> Self {
        ManualClock { now: std::sync::atomic::AtomicU64::new(start.0) }
    }

    pub fn advance_secs(&self, secs: f64) {
        let now = Timetag(self.now.load(std::sync::atomic::Ordering::SeqCst));
        self.set(now.offset_by(secs));
    }

    pub fn set(&self, t: Timetag) {
        self.now.store(t.0, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timetag {
        Timetag(self.now.load(std::sync::atomic::Ordering::SeqCst))
    }
}

/// Lets a test hold an `Arc<ManualClock>` to advance from outside while a
/// `Box<dyn Clock>` built from a clone of the same `Arc` is handed to a
/// device under test.
impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now(&self) -> Timetag {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_deterministically() {
        let clock = ManualClock::new(Timetag::ZERO);
        clock.advance_secs(2.5);
        assert!((clock.now().as_secs_f64() - 2.5).abs() < 1e-9);
    }
}
