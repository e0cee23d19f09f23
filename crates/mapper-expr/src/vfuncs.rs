//! `VFN` vector/reduction evaluation. Grounded in `vfn_tbl` from
//! `original_source/src/expression.c`. Two call conventions reach these
//! functions from the VM (see `compiler.rs`'s module doc for why):
//!
//! - **Direct**: `mean(x)`, `sort(x)`, `dot(a, b)` — the function consumes
//!   the operand vector(s) exactly as compiled, reducing *within* a single
//!   vector's own elements.
//! - **Gathered**: `history(4).x.mean()`, `instance().x.sum()` — a
//!   preceding `LoopStart`/`LoopEnd` pair has assembled a sequence of
//!   same-shaped frames (one per historical sample / active instance /
//!   source signal), and the function reduces *across* that sequence,
//!   elementwise, preserving each frame's width.

use mapper_types::{ScalarType, ScalarValue, Vector};

use crate::token::VFn;

fn join_type(frames: &[Vector]) -> ScalarType {
    frames
        .iter()
        .map(|v| v.scalar_type())
        .fold(ScalarType::I32, |acc, t| acc.join(t))
}

fn fold_scalar(vf: VFn, vals: &[f64]) -> f64 {
    match vf {
        VFn::Sum => vals.iter().sum(),
        VFn::Mean => vals.iter().sum::<f64>() / vals.len().max(1) as f64,
        VFn::Min => vals.iter().cloned().fold(f64::INFINITY, f64::min),
        VFn::Max => vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        VFn::Center => {
            let lo = vals.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            (lo + hi) / 2.0
        }
        _ => unreachable!("fold_scalar called with non-foldable function {vf:?}"),
    }
}

/// Gathered form: `frames` is one same-shaped vector per sample/instance/
/// signal; the output keeps that width, reducing elementwise across the
/// frame sequence.
pub fn eval_vfn_gathered(vf: VFn, frames: &[Vector]) -> Vector {
    let ty = join_type(frames);
    if frames.is_empty() {
        return Vector::zeros(ty, 1);
    }
    match vf {
        VFn::Sum | VFn::Mean | VFn::Min | VFn::Max | VFn::Center => {
            let len = frames.iter().map(|v| v.len()).max().unwrap_or(1);
            let mut out = Vector::zeros(ty, len);
            for i in 0..len {
                let vals: Vec<f64> = frames.iter().map(|v| v.get_wrapped(i).as_f64()).collect();
                out.set(i, ScalarValue::F64(fold_scalar(vf, &vals)).cast_to(ty));
            }
            out
        }
        VFn::Norm => {
            let mut acc = 0.0;
            for v in frames {
                for i in 0..v.len() {
                    let x = v.get_wrapped(i).as_f64();
                    acc += x * x;
                }
            }
            let mut out = Vector::zeros(ty, 1);
            out.set(0, ScalarValue::F64(acc.sqrt()).cast_to(ty));
            out
        }
        // Order-dependent and binary functions aren't meaningful gathered
        // across samples; the compiler never emits them in this form.
        VFn::Sort | VFn::Median | VFn::Length | VFn::Dot | VFn::Angle | VFn::Concat => {
            eval_vfn_direct(vf, frames)
        }
    }
}

/// Direct form: `frames.len() == vf.arity()`. `sum`/`mean`/`min`/`max`/
/// `center`/`norm` reduce within `frames[0]`'s own elements to a scalar;
/// `sort`/`median`/`length` inspect `frames[0]` directly; `dot`/`angle`/
/// `concat` combine `frames[0]` and `frames[1]`.
pub fn eval_vfn_direct(vf: VFn, frames: &[Vector]) -> Vector {
    match vf {
        VFn::Dot | VFn::Angle => reduce_dot_angle(vf, &frames[0], &frames[1]),
        VFn::Concat => reduce_concat(&frames[0], &frames[1]),
        VFn::Sort => {
            let ty = frames[0].scalar_type();
            let mut vals: Vec<f64> = (0..frames[0].len()).map(|i| frames[0].get_wrapped(i).as_f64()).collect();
            vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mut out = Vector::zeros(ty, vals.len());
            for (i, v) in vals.into_iter().enumerate() {
                out.set(i, ScalarValue::F64(v).cast_to(ty));
            }
            out
        }
        VFn::Median => {
            let ty = frames[0].scalar_type();
            let mut vals: Vec<f64> = (0..frames[0].len()).map(|i| frames[0].get_wrapped(i).as_f64()).collect();
            vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let mid = vals.len() / 2;
            let med = if vals.is_empty() {
                0.0
            } else if vals.len() % 2 == 0 {
                (vals[mid - 1] + vals[mid]) / 2.0
            } else {
                vals[mid]
            };
            let mut out = Vector::zeros(ty, 1);
            out.set(0, ScalarValue::F64(med).cast_to(ty));
            out
        }
        VFn::Length => {
            let mut out = Vector::zeros(ScalarType::I32, 1);
            out.set(0, ScalarValue::I32(frames[0].len() as i32));
            out
        }
        VFn::Sum | VFn::Mean | VFn::Min | VFn::Max | VFn::Center => {
            let ty = frames[0].scalar_type();
            let vals: Vec<f64> = (0..frames[0].len()).map(|i| frames[0].get_wrapped(i).as_f64()).collect();
            let mut out = Vector::zeros(ty, 1);
            out.set(0, ScalarValue::F64(fold_scalar(vf, &vals)).cast_to(ty));
            out
        }
        VFn::Norm => {
            let ty = frames[0].scalar_type();
            let acc: f64 = (0..frames[0].len()).map(|i| frames[0].get_wrapped(i).as_f64().powi(2)).sum();
            let mut out = Vector::zeros(ty, 1);
            out.set(0, ScalarValue::F64(acc.sqrt()).cast_to(ty));
            out
        }
    }
}

/// `dot(a, b)`: scalar dot product. `angle(a, b)`: angle in radians between
/// two equal-length vectors.
fn reduce_dot_angle(vf: VFn, a: &Vector, b: &Vector) -> Vector {
    let ty = a.scalar_type().join(b.scalar_type());
    let len = a.len().max(b.len());
    let mut dot = 0.0;
    let mut mag_a = 0.0;
    let mut mag_b = 0.0;
    for i in 0..len {
        let x = a.get_wrapped(i).as_f64();
        let y = b.get_wrapped(i).as_f64();
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let mut out = Vector::zeros(ty, 1);
    let r = match vf {
        VFn::Dot => dot,
        VFn::Angle => (dot / (mag_a.sqrt() * mag_b.sqrt())).acos(),
        _ => unreachable!(),
    };
    out.set(0, ScalarValue::F64(r).cast_to(ty));
    out
}

/// `concat(a, b)`: append two vectors.
fn reduce_concat(a: &Vector, b: &Vector) -> Vector {
    let ty = a.scalar_type().join(b.scalar_type());
    let mut out = Vector::zeros(ty, a.len() + b.len());
    for i in 0..a.len() {
        out.set(i, a.get_wrapped(i).cast_to(ty));
    }
    for i in 0..b.len() {
        out.set(a.len() + i, b.get_wrapped(i).cast_to(ty));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_mean_reduces_within_one_vector() {
        let v = Vector::F64(vec![1.0, 2.0, 3.0]);
        let out = eval_vfn_direct(VFn::Mean, &[v]);
        assert_eq!(out, Vector::F64(vec![2.0]));
    }

    #[test]
    fn gathered_mean_reduces_across_frames_elementwise() {
        let frames = vec![Vector::F64(vec![1.0, 10.0]), Vector::F64(vec![3.0, 20.0])];
        let out = eval_vfn_gathered(VFn::Mean, &frames);
        assert_eq!(out, Vector::F64(vec![2.0, 15.0]));
    }

    #[test]
    fn direct_sort_orders_elements() {
        let v = Vector::F64(vec![3.0, 1.0, 2.0]);
        let out = eval_vfn_direct(VFn::Sort, &[v]);
        assert_eq!(out, Vector::F64(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn dot_product_of_orthogonal_vectors_is_zero() {
        let a = Vector::F64(vec![1.0, 0.0]);
        let b = Vector::F64(vec![0.0, 1.0]);
        let out = eval_vfn_direct(VFn::Dot, &[a, b]);
        assert_eq!(out, Vector::F64(vec![0.0]));
    }
}
