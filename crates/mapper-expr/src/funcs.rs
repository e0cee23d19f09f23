//! Scalar `FN` evaluation, elementwise across `Vector`s. Grounded in
//! `fn_tbl` from `original_source/src/expression.c`; always promotes to
//! `f64` internally (libm transcendentals have no meaningful i32/f32 fast
//! path) and casts the result back to the operand's join type.

use mapper_types::{ScalarType, Vector};

use crate::token::MathFn;

/// Per-(stateful-function-instance) hidden state: `ema` keeps a running
/// average, `schmitt` keeps the last output level. Allocated one per
/// occurrence of a stateful `FN` token in a compiled program, one f64 per
/// vector element times per-instance (see `vm.rs::FnState`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FnState {
    pub value: f64,
}

fn eval1(f: MathFn, a: f64) -> f64 {
    match f {
        MathFn::Abs => a.abs(),
        MathFn::Acos => a.acos(),
        MathFn::Acosh => a.acosh(),
        MathFn::Asin => a.asin(),
        MathFn::Asinh => a.asinh(),
        MathFn::Atan => a.atan(),
        MathFn::Atanh => a.atanh(),
        MathFn::Cbrt => a.cbrt(),
        MathFn::Ceil => a.ceil(),
        MathFn::Cos => a.cos(),
        MathFn::Cosh => a.cosh(),
        MathFn::Exp => a.exp(),
        MathFn::Exp2 => a.exp2(),
        MathFn::Floor => a.floor(),
        MathFn::HzToMidi => 69.0 + 12.0 * (a / 440.0).log2(),
        MathFn::Log => a.ln(),
        MathFn::Log10 => a.log10(),
        MathFn::Log2 => a.log2(),
        MathFn::Logb => a.abs().log2().floor(),
        MathFn::MidiToHz => 440.0 * 2f64.powf((a - 69.0) / 12.0),
        MathFn::Round => a.round(),
        MathFn::Sign => {
            if a > 0.0 {
                1.0
            } else if a < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        MathFn::Sin => a.sin(),
        MathFn::Sinh => a.sinh(),
        MathFn::Sqrt => a.sqrt(),
        MathFn::Tan => a.tan(),
        MathFn::Tanh => a.tanh(),
        MathFn::Trunc => a.trunc(),
        MathFn::Uniform => a * pseudo_rand(),
        _ => unreachable!("eval1 called with non-unary function {f:?}"),
    }
}

fn eval2(f: MathFn, a: f64, b: f64) -> f64 {
    match f {
        MathFn::Atan2 => a.atan2(b),
        MathFn::Hypot => a.hypot(b),
        MathFn::Max => a.max(b),
        MathFn::Min => a.min(b),
        MathFn::Pow => a.powf(b),
        _ => unreachable!("eval2 called with function {f:?} of arity != 2"),
    }
}

/// `ema(input, weight)`: `state = state * (1 - weight) + input * weight`.
fn eval_ema(input: f64, weight: f64, state: &mut f64) -> f64 {
    *state = *state * (1.0 - weight) + input * weight;
    *state
}

/// `schmitt(input, low, high, hysteresis_state)`: a two-threshold trigger
/// that only flips once `input` crosses the threshold opposite its current
/// level.
fn eval_schmitt(input: f64, low: f64, high: f64, state: &mut f64) -> f64 {
    if *state == 0.0 && input > high {
        *state = 1.0;
    } else if *state != 0.0 && input < low {
        *state = 0.0;
    }
    *state
}

/// Deterministic in the sense that it never panics; not cryptographically
/// meaningful. `uniform()` in the original draws from the C library's
/// `rand()`; here we use the process-global `rand` crate source so repeated
/// evaluations still vary.
fn pseudo_rand() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0.0..1.0)
}

/// Evaluate a scalar `FN` token across one or more (already wraparound-
/// broadcast) argument vectors, threading per-element hidden state for
/// stateful functions.
pub fn eval_fn(f: MathFn, args: &[Vector], state: &mut [FnState]) -> Vector {
    let ty = args
        .iter()
        .map(|v| v.scalar_type())
        .fold(ScalarType::I32, |acc, t| acc.join(t))
        .join(ScalarType::F32);
    let len = args.iter().map(|v| v.len()).max().unwrap_or(1);
    let mut out = Vector::zeros(ty, len);
    for i in 0..len {
        let a = args[0].get_wrapped(i).as_f64();
        let r = match f.arity() {
            1 => eval1(f, a),
            2 => eval2(f, a, args[1].get_wrapped(i).as_f64()),
            3 => {
                let b = args[1].get_wrapped(i).as_f64();
                eval_ema(a, b, &mut state[i % state.len().max(1)].value)
            }
            4 => {
                let low = args[1].get_wrapped(i).as_f64();
                let high = args[2].get_wrapped(i).as_f64();
                eval_schmitt(a, low, high, &mut state[i % state.len().max(1)].value)
            }
            _ => unreachable!(),
        };
        out.set(i, mapper_types::ScalarValue::F64(r).cast_to(ty));
    }
    out
}
