//! Component A — the value ring.
//!
//! A per-slot, per-instance ring of `history_size` samples, each a
//! `vec_len`-wide typed vector plus a timetag. This is the lowest-level data
//! structure in the pipeline: slots (`mapper-router`) own one of these per
//! bound signal, and the VM (`mapper-expr`) reads through it via `get`.

use mapper_types::{ScalarType, Timetag, Vector};

mod sample;

pub use sample::Sample;

/// Ring buffer for a single signal instance.
#[derive(Debug, Clone)]
struct InstanceRing {
    /// `samples[0]` is always the oldest slot in storage order; `head` is the
    /// index of the most-recently-written sample. Reading `get(0)` yields
    /// `samples[head]`.
    samples: Vec<Sample>,
    head: usize,
    /// Number of valid (pushed) samples, capped at `samples.len()`.
    filled: usize,
}

impl InstanceRing {
    fn new(vec_len: usize, ty: ScalarType, history_size: usize) -> Self {
        let history_size = history_size.max(1);
        InstanceRing {
            samples: (0..history_size)
                .map(|_| Sample::empty(ty, vec_len))
                .collect(),
            head: 0,
            filled: 0,
        }
    }

    fn push(&mut self, value: Vector, time: Timetag) {
        let cap = self.samples.len();
        self.head = (self.head + 1) % cap;
        self.samples[self.head] = Sample { value, time, has_value: true };
        self.filled = (self.filled + 1).min(cap);
    }

    fn reset(&mut self) {
        for s in &mut self.samples {
            s.has_value = false;
        }
        self.filled = 0;
    }

    /// `offset` is in "samples back from the most recent", 0 = newest,
    /// negative counts further into the past. Positive offsets are rejected
    /// (there is no future). Fractional offsets interpolate linearly between
    /// the two bracketing integer offsets, both along the time axis (the
    /// interpolation fraction) and, independently, along the vector axis
    /// (`Vector::lerp` broadcasts narrower operands).
    fn get(&self, offset: f64) -> Option<Sample> {
        if offset > 0.0 {
            return None;
        }
        let cap = self.samples.len();
        if cap == 1 {
            // History of 1 collapses to a single slot with no interpolation.
            let s = &self.samples[self.head];
            return s.has_value.then(|| s.clone());
        }
        let steps_back = -offset;
        let lo_steps = steps_back.floor() as usize;
        let hi_steps = steps_back.ceil() as usize;
        let frac = steps_back - lo_steps as f64;

        let lo = self.at_steps_back(lo_steps)?;
        if frac.abs() < f64::EPSILON || lo_steps == hi_steps {
            return Some(lo);
        }
        let hi = self.at_steps_back(hi_steps)?;
        Some(Sample {
            value: lo.value.lerp(&hi.value, frac),
            time: Timetag::from_secs_f64(
                lo.time.as_secs_f64() + (hi.time.as_secs_f64() - lo.time.as_secs_f64()) * frac,
            ),
            has_value: true,
        })
    }

    fn at_steps_back(&self, steps_back: usize) -> Option<Sample> {
        let cap = self.samples.len();
        if steps_back >= self.filled || steps_back >= cap {
            return None;
        }
        let idx = (self.head + cap - steps_back) % cap;
        let s = &self.samples[idx];
        s.has_value.then(|| s.clone())
    }

    /// Rebuild this ring at a new shape, replaying surviving samples oldest
    /// first so that `push`'s usual head-advance leaves the newest sample
    /// newest. Each replayed value is cast/truncated/padded to the new
    /// vec_len and type (`resize_vector`), so overlapping dimensions survive
    /// exactly as the caller's invariant requires; a shrunk history keeps the
    /// most recent samples, a grown one just has emptier tail slots.
    fn resized(&self, vec_len: usize, ty: ScalarType, history_size: usize) -> InstanceRing {
        let mut out = InstanceRing::new(vec_len, ty, history_size);
        let filled = self.filled.min(self.samples.len());
        for steps_back in (0..filled).rev() {
            if let Some(sample) = self.at_steps_back(steps_back) {
                out.push(resize_vector(&sample.value, vec_len, ty), sample.time);
            }
        }
        out
    }
}

/// Cast `v` to `ty`, then truncate or zero-pad to `vec_len`. Used by
/// `realloc` to preserve overlapping elements across a shape change.
fn resize_vector(v: &Vector, vec_len: usize, ty: ScalarType) -> Vector {
    let cast = v.cast_to(ty);
    if cast.len() == vec_len {
        return cast;
    }
    let mut out = Vector::zeros(ty, vec_len);
    for i in 0..vec_len.min(cast.len()) {
        out.set(i, cast.get_wrapped(i));
    }
    out
}

/// A ring buffer per instance, all sharing the same shape. Owned by a slot
/// (`mapper-router::Slot`) or a user-defined expression variable.
#[derive(Debug, Clone)]
pub struct ValueRing {
    vec_len: usize,
    scalar_type: ScalarType,
    history_size: usize,
    rings: Vec<InstanceRing>,
}

impl ValueRing {
    pub fn new(vec_len: usize, scalar_type: ScalarType, history_size: usize, num_inst: usize) -> Self {
        let history_size = history_size.max(1);
        ValueRing {
            vec_len,
            scalar_type,
            history_size,
            rings: (0..num_inst.max(1))
                .map(|_| InstanceRing::new(vec_len, scalar_type, history_size))
                .collect(),
        }
    }

    pub fn vec_len(&self) -> usize {
        self.vec_len
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.scalar_type
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    pub fn num_inst(&self) -> usize {
        self.rings.len()
    }

    pub fn push(&mut self, inst: usize, values: Vector, time: Timetag) {
        self.rings[inst].push(values, time);
    }

    pub fn get(&self, inst: usize, offset: f64) -> Option<Sample> {
        self.rings.get(inst).and_then(|r| r.get(offset))
    }

    pub fn reset(&mut self, inst: usize) {
        if let Some(r) = self.rings.get_mut(inst) {
            r.reset();
        }
    }

    /// The only operation permitted to change shape. Preserves existing
    /// values where dimensions overlap: more instances start empty, fewer
    /// instances drop the tail, and every surviving instance's samples are
    /// replayed through the new vec_len/type/history shape (`InstanceRing::
    /// resized`) rather than discarded, so a pure history-depth grow (the
    /// common case, `Signal::ensure_history`) never loses a value.
    pub fn realloc(&mut self, vec_len: usize, scalar_type: ScalarType, history_size: usize, num_inst: usize) {
        let history_size = history_size.max(1);
        let num_inst = num_inst.max(1);

        let mut rings: Vec<InstanceRing> = self
            .rings
            .iter()
            .map(|r| r.resized(vec_len, scalar_type, history_size))
            .collect();
        rings.truncate(num_inst);
        rings.extend((rings.len()..num_inst).map(|_| InstanceRing::new(vec_len, scalar_type, history_size)));

        self.rings = rings;
        self.vec_len = vec_len;
        self.scalar_type = scalar_type;
        self.history_size = history_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn newest_sample_is_offset_zero() {
        let mut r = ValueRing::new(1, ScalarType::F64, 4, 1);
        r.push(0, Vector::F64(vec![1.0]), Timetag::from_secs_f64(1.0));
        r.push(0, Vector::F64(vec![2.0]), Timetag::from_secs_f64(2.0));
        assert_eq!(r.get(0, 0.0).unwrap().value, Vector::F64(vec![2.0]));
        assert_eq!(r.get(0, -1.0).unwrap().value, Vector::F64(vec![1.0]));
        assert!(r.get(0, -2.0).is_none());
    }

    #[test]
    fn fractional_offset_interpolates() {
        let mut r = ValueRing::new(1, ScalarType::F64, 4, 1);
        r.push(0, Vector::F64(vec![0.0]), Timetag::from_secs_f64(0.0));
        r.push(0, Vector::F64(vec![10.0]), Timetag::from_secs_f64(1.0));
        let mid = r.get(0, -0.5).unwrap();
        assert_eq!(mid.value, Vector::F64(vec![5.0]));
    }

    #[test]
    fn history_of_one_has_no_interpolation() {
        let mut r = ValueRing::new(1, ScalarType::F64, 1, 1);
        r.push(0, Vector::F64(vec![1.0]), Timetag::from_secs_f64(1.0));
        r.push(0, Vector::F64(vec![2.0]), Timetag::from_secs_f64(2.0));
        assert_eq!(r.get(0, 0.0).unwrap().value, Vector::F64(vec![2.0]));
        assert!(r.get(0, -0.5).is_none());
    }

    #[test]
    fn reset_clears_has_value_but_keeps_shape() {
        let mut r = ValueRing::new(2, ScalarType::F32, 2, 1);
        r.push(0, Vector::F32(vec![1.0, 2.0]), Timetag::ZERO);
        r.reset(0);
        assert!(r.get(0, 0.0).is_none());
        assert_eq!(r.vec_len(), 2);
    }

    #[test]
    fn realloc_changes_shape_and_instance_count() {
        let mut r = ValueRing::new(1, ScalarType::I32, 4, 1);
        r.push(0, Vector::I32(vec![7]), Timetag::ZERO);
        r.realloc(3, ScalarType::F32, 4, 2);
        assert_eq!(r.num_inst(), 2);
        assert_eq!(r.vec_len(), 3);
        // overlapping dimension (element 0, cast to the new type) survives;
        // the newly widened elements start at zero.
        assert_eq!(r.get(0, 0.0).unwrap().value, Vector::F32(vec![7.0, 0.0, 0.0]));
        assert!(r.get(1, 0.0).is_none());
    }

    #[test]
    fn realloc_pure_history_grow_preserves_value() {
        // Signal::ensure_history's common call shape: same vec_len/type,
        // only history_size grows. The existing sample must survive.
        let mut r = ValueRing::new(1, ScalarType::F32, 1, 1);
        r.push(0, Vector::F32(vec![3.5]), Timetag::from_secs_f64(1.0));
        r.realloc(1, ScalarType::F32, 5, 1);
        assert_eq!(r.history_size(), 5);
        assert_eq!(r.get(0, 0.0).unwrap().value, Vector::F32(vec![3.5]));
    }

    #[test]
    fn realloc_grows_instances_without_disturbing_existing() {
        let mut r = ValueRing::new(1, ScalarType::F64, 4, 1);
        r.push(0, Vector::F64(vec![9.0]), Timetag::from_secs_f64(1.0));
        r.realloc(1, ScalarType::F64, 4, 3);
        assert_eq!(r.num_inst(), 3);
        assert_eq!(r.get(0, 0.0).unwrap().value, Vector::F64(vec![9.0]));
        assert!(r.get(1, 0.0).is_none());
    }

    proptest! {
        /// Whatever sequence of pushes lands last, `get(inst, 0.0)` (offset
        /// zero, the most recent sample) always returns exactly that push —
        /// the ring never reorders or drops the newest write.
        #[test]
        fn most_recent_push_is_always_offset_zero(values in prop::collection::vec(-1000i32..1000, 1..20)) {
            let mut r = ValueRing::new(1, ScalarType::I32, values.len().max(4), 1);
            for (t, v) in values.iter().enumerate() {
                r.push(0, Vector::I32(vec![*v]), Timetag::from_secs_f64(t as f64));
            }
            let last = *values.last().unwrap();
            prop_assert_eq!(r.get(0, 0.0).unwrap().value, Vector::I32(vec![last]));
        }
    }
}
