//! Scalar evaluation of `Op` tokens, elementwise across a pair (or single,
//! or triple) of `Vector`s. Mirrors `op_tbl`'s evaluator functions in
//! `original_source/src/expression.c`, minus the macro-generated
//! duplication across the three storage types — `ScalarValue`'s own
//! arithmetic (via `mapper_types::value`) already picks the right numeric
//! type.

use mapper_types::{ScalarType, ScalarValue, Vector};

use crate::token::Op;

/// Outcome of evaluating an operator: either a value, or a signal that the
/// statement producing it must be dropped this tick (integer division by
/// zero — the one case §7 calls out as "drop the update, do not crash").
pub enum OpResult {
    Value(Vector),
    DivideByZero,
}

fn eval_scalar(op: Op, a: ScalarValue, b: Option<ScalarValue>, c: Option<ScalarValue>) -> Option<ScalarValue> {
    use ScalarValue::*;
    let ty = match (b, c) {
        (Some(b), Some(c)) => a.scalar_type().join(b.scalar_type()).join(c.scalar_type()),
        (Some(b), None) => a.scalar_type().join(b.scalar_type()),
        (None, _) => a.scalar_type(),
    };
    let af = a.as_f64();
    let bf = b.map(|v| v.as_f64());
    let cf = c.map(|v| v.as_f64());

    let result_f = match op {
        Op::Not => {
            return Some(from_f64(if af == 0.0 { 1.0 } else { 0.0 }, ty));
        }
        Op::Mul => af * bf.unwrap(),
        Op::Add => af + bf.unwrap(),
        Op::Sub => af - bf.unwrap(),
        Op::Div => {
            let b = bf.unwrap();
            if ty == ScalarType::I32 && b == 0.0 {
                return None;
            }
            af / b
        }
        Op::Mod => {
            let b = bf.unwrap();
            if ty == ScalarType::I32 && b == 0.0 {
                return None;
            }
            af % b
        }
        Op::Shl | Op::Shr | Op::BitAnd | Op::BitXor | Op::BitOr => {
            let ai = af as i64;
            let bi = bf.unwrap_or(0.0) as i64;
            let r = match op {
                Op::Shl => ai.wrapping_shl(bi as u32),
                Op::Shr => ai.wrapping_shr(bi as u32),
                Op::BitAnd => ai & bi,
                Op::BitXor => ai ^ bi,
                Op::BitOr => ai | bi,
                _ => unreachable!(),
            };
            return Some(from_f64(r as f64, ScalarType::I32));
        }
        Op::Gt => return Some(from_f64(bool_f(af > bf.unwrap()), ty)),
        Op::Ge => return Some(from_f64(bool_f(af >= bf.unwrap()), ty)),
        Op::Lt => return Some(from_f64(bool_f(af < bf.unwrap()), ty)),
        Op::Le => return Some(from_f64(bool_f(af <= bf.unwrap()), ty)),
        Op::Eq => return Some(from_f64(bool_f(af == bf.unwrap()), ty)),
        Op::Ne => return Some(from_f64(bool_f(af != bf.unwrap()), ty)),
        Op::And => return Some(from_f64(bool_f(af != 0.0 && bf.unwrap() != 0.0), ScalarType::I32)),
        Op::Or => return Some(from_f64(bool_f(af != 0.0 || bf.unwrap() != 0.0), ScalarType::I32)),
        Op::IfThen => {
            return Some(from_f64(if af != 0.0 { bf.unwrap() } else { 0.0 }, ty));
        }
        Op::IfElse => {
            return Some(from_f64(if af == 0.0 { bf.unwrap() } else { 0.0 }, ty));
        }
        Op::IfThenElse => {
            return Some(from_f64(if af != 0.0 { bf.unwrap() } else { cf.unwrap() }, ty));
        }
    };
    Some(from_f64(result_f, ty))
}

fn bool_f(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn from_f64(v: f64, ty: ScalarType) -> ScalarValue {
    match ty {
        ScalarType::I32 => ScalarValue::I32(v as i32),
        ScalarType::F32 => ScalarValue::F32(v as f32),
        ScalarType::F64 => ScalarValue::F64(v),
    }
}

/// Evaluate an operator elementwise, broadcasting the shorter operand(s) by
/// wraparound indexing (`Vector::get_wrapped`) as the spec's vector-length
/// broadening rule requires.
pub fn eval_op(op: Op, args: &[Vector]) -> OpResult {
    let ty = args.iter().map(|v| v.scalar_type()).fold(args[0].scalar_type(), |acc, t| acc.join(t));
    let len = args.iter().map(|v| v.len()).max().unwrap_or(1);
    let mut out = Vector::zeros(ty, len);
    for i in 0..len {
        let a = args[0].get_wrapped(i).cast_to(ty);
        let b = args.get(1).map(|v| v.get_wrapped(i).cast_to(ty));
        let c = args.get(2).map(|v| v.get_wrapped(i).cast_to(ty));
        match eval_scalar(op, a, b, c) {
            Some(v) => out.set(i, v),
            None => return OpResult::DivideByZero,
        }
    }
    OpResult::Value(out)
}
