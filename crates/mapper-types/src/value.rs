use serde::{Deserialize, Serialize};

/// The three scalar types a signal or expression value can hold. Ordered so
/// that `i32 < f32 < f64` is literally `derive(PartialOrd)` order — the
/// expression compiler's type-promotion lattice (§4.C) relies on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    I32,
    F32,
    F64,
}

impl ScalarType {
    /// Join of two types in the promotion lattice: the wider of the two.
    pub fn join(self, other: ScalarType) -> ScalarType {
        self.max(other)
    }
}

/// A single typed scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    I32(i32),
    F32(f32),
    F64(f64),
}

impl ScalarValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ScalarValue::I32(_) => ScalarType::I32,
            ScalarValue::F32(_) => ScalarType::F32,
            ScalarValue::F64(_) => ScalarType::F64,
        }
    }

    /// Widen (or narrow, truncating) this value to `ty`.
    pub fn cast_to(self, ty: ScalarType) -> ScalarValue {
        let as_f64 = self.as_f64();
        match ty {
            ScalarType::I32 => ScalarValue::I32(as_f64 as i32),
            ScalarType::F32 => ScalarValue::F32(as_f64 as f32),
            ScalarType::F64 => ScalarValue::F64(as_f64),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            ScalarValue::I32(v) => *v as f64,
            ScalarValue::F32(v) => *v as f64,
            ScalarValue::F64(v) => *v,
        }
    }

    pub fn zero(ty: ScalarType) -> ScalarValue {
        match ty {
            ScalarType::I32 => ScalarValue::I32(0),
            ScalarType::F32 => ScalarValue::F32(0.0),
            ScalarType::F64 => ScalarValue::F64(0.0),
        }
    }
}

/// A dense, typed vector of `vec_len` scalars — the unit the ring buffer
/// (`mapper-ring`) and the VM (`mapper-expr`) operate on. Unlike the wire
/// representation, every element always holds a concrete value; whether a
/// *sample* is present at all is tracked by the ring's has-value bitflag, not
/// by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Vector {
    pub fn zeros(ty: ScalarType, len: usize) -> Vector {
        match ty {
            ScalarType::I32 => Vector::I32(vec![0; len]),
            ScalarType::F32 => Vector::F32(vec![0.0; len]),
            ScalarType::F64 => Vector::F64(vec![0.0; len]),
        }
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Vector::I32(_) => ScalarType::I32,
            Vector::F32(_) => ScalarType::F32,
            Vector::F64(_) => ScalarType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Vector::I32(v) => v.len(),
            Vector::F32(v) => v.len(),
            Vector::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read element `idx`, wrapping modulo the vector's own length (the
    /// broadcast rule used throughout the VM for narrower operands).
    pub fn get_wrapped(&self, idx: usize) -> ScalarValue {
        let len = self.len().max(1);
        let i = idx % len;
        match self {
            Vector::I32(v) => ScalarValue::I32(v[i]),
            Vector::F32(v) => ScalarValue::F32(v[i]),
            Vector::F64(v) => ScalarValue::F64(v[i]),
        }
    }

    pub fn set(&mut self, idx: usize, value: ScalarValue) {
        match self {
            Vector::I32(v) => v[idx] = match value.cast_to(ScalarType::I32) {
                ScalarValue::I32(x) => x,
                _ => unreachable!(),
            },
            Vector::F32(v) => v[idx] = match value.cast_to(ScalarType::F32) {
                ScalarValue::F32(x) => x,
                _ => unreachable!(),
            },
            Vector::F64(v) => v[idx] = match value.cast_to(ScalarType::F64) {
                ScalarValue::F64(x) => x,
                _ => unreachable!(),
            },
        }
    }

    pub fn cast_to(&self, ty: ScalarType) -> Vector {
        match ty {
            ScalarType::I32 => Vector::I32(
                (0..self.len()).map(|i| match self.get_wrapped(i).cast_to(ty) {
                    ScalarValue::I32(x) => x,
                    _ => unreachable!(),
                }).collect(),
            ),
            ScalarType::F32 => Vector::F32(
                (0..self.len()).map(|i| match self.get_wrapped(i).cast_to(ty) {
                    ScalarValue::F32(x) => x,
                    _ => unreachable!(),
                }).collect(),
            ),
            ScalarType::F64 => Vector::F64(
                (0..self.len()).map(|i| match self.get_wrapped(i).cast_to(ty) {
                    ScalarValue::F64(x) => x,
                    _ => unreachable!(),
                }).collect(),
            ),
        }
    }

    /// Linearly interpolate between `self` and `other` element-wise, wrapping
    /// the (possibly narrower) `other` per the broadcast rule. `t` in `[0,1]`.
    pub fn lerp(&self, other: &Vector, t: f64) -> Vector {
        let ty = self.scalar_type().join(other.scalar_type());
        let len = self.len();
        let mut out = Vector::zeros(ty, len);
        for i in 0..len {
            let a = self.get_wrapped(i).as_f64();
            let b = other.get_wrapped(i).as_f64();
            out.set(i, ScalarValue::F64(a + (b - a) * t));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn join_is_widest() {
        assert_eq!(ScalarType::I32.join(ScalarType::F32), ScalarType::F32);
        assert_eq!(ScalarType::F64.join(ScalarType::I32), ScalarType::F64);
    }

    #[test]
    fn wrapped_access_broadcasts() {
        let v = Vector::F32(vec![1.0, 2.0]);
        assert_eq!(v.get_wrapped(0).as_f64(), 1.0);
        assert_eq!(v.get_wrapped(2).as_f64(), 1.0);
        assert_eq!(v.get_wrapped(3).as_f64(), 2.0);
    }

    #[test]
    fn lerp_midpoint() {
        let a = Vector::F64(vec![0.0, 10.0]);
        let b = Vector::F64(vec![2.0, 20.0]);
        let mid = a.lerp(&b, 0.5);
        assert_eq!(mid, Vector::F64(vec![1.0, 15.0]));
    }

    proptest! {
        /// `join` must pick the wider of the two types regardless of
        /// argument order, and joining with yourself is a no-op — the
        /// lattice has to actually be a lattice for the VM's promotion
        /// rule (§4.C) to be sound.
        #[test]
        fn join_is_commutative_and_idempotent(a in 0u8..3, b in 0u8..3) {
            let ty = |n: u8| match n {
                0 => ScalarType::I32,
                1 => ScalarType::F32,
                _ => ScalarType::F64,
            };
            let (ta, tb) = (ty(a), ty(b));
            prop_assert_eq!(ta.join(tb), tb.join(ta));
            prop_assert_eq!(ta.join(ta), ta);
        }

        /// Wraparound broadcast (§4.A, §4.B): indexing within bounds never
        /// wraps, and indexing `len + i` always lands on the same element
        /// as indexing `i`.
        #[test]
        fn wrapped_access_is_periodic(len in 1usize..8, i in 0usize..64) {
            let v = Vector::F64((0..len).map(|n| n as f64).collect());
            prop_assert_eq!(v.get_wrapped(i), v.get_wrapped(i % len));
        }
    }
}
