//! Components B and C — the expression compiler and its stack VM.
//!
//! Infix expression text (`y = ema(x, 0.1) + history(4).x.mean();`) is
//! compiled once, at map-creation time, into a flat `Token` program; the VM
//! then re-evaluates that program once per incoming sample with no further
//! parsing. Grounded throughout in `esper_compiler`'s compile-once/
//! evaluate-many split and `dsl-core::parser`'s span-tracked recursive
//! descent.

pub mod compiler;
pub mod descriptor;
pub mod error;
pub mod funcs;
pub mod lexer;
pub mod ops;
pub mod token;
pub mod vfuncs;
pub mod vm;

pub use compiler::{compile, CompileContext, InputSig};
pub use descriptor::ExprDescriptor;
pub use error::CompileError;
pub use vm::{eval, EvalOutput, EvalStatus, GatherContext, Inputs, VmState};

#[cfg(test)]
mod tests {
    use super::*;
    use mapper_ring::ValueRing;
    use mapper_types::{ScalarType, Timetag};

    fn ctx(n_inputs: usize) -> CompileContext {
        CompileContext {
            inputs: vec![InputSig { scalar_type: ScalarType::F64, vec_len: 1 }; n_inputs],
            output: InputSig { scalar_type: ScalarType::F64, vec_len: 1 },
        }
    }

    #[test]
    fn compiles_and_evaluates_identity() {
        let expr = compile("y = x;", &ctx(1)).unwrap();
        let mut ring = ValueRing::new(1, ScalarType::F64, 1, 1);
        ring.push(0, mapper_types::Vector::zeros(ScalarType::F64, 1), Timetag::ZERO);
        let rings = [&ring];
        let inputs = Inputs { rings: &rings, inst: 0, prev_y: None };
        let gather = GatherContext::default();
        let mut state = VmState::new(expr.num_user_vars, 0);
        let (out, status) = eval(&expr, &inputs, &gather, &mut state);
        assert!(status.contains(EvalStatus::UPDATE));
        assert!(out.y.is_some());
    }

    #[test]
    fn compiles_scale_and_offset() {
        let expr = compile("y = x * 2 + 1;", &ctx(1)).unwrap();
        assert!(expr.program.len() > 0);
    }

    #[test]
    fn rejects_missing_output_assignment() {
        let err = compile("z = x;", &ctx(1));
        assert!(err.is_err());
    }

    #[test]
    fn rejects_unknown_variable() {
        let err = compile("y = bogus;", &ctx(1));
        assert!(matches!(err, Err(CompileError::UnknownVariable { .. })));
    }

    #[test]
    fn compiles_history_mean_reduction() {
        let expr = compile("y = history(4).x.mean();", &ctx(1)).unwrap();
        assert_eq!(expr.input_history_depth[0], 4);
    }

    #[test]
    fn compiles_sugared_vector_mean() {
        let mut c = ctx(1);
        c.inputs[0].vec_len = 3;
        let expr = compile("y = mean(x);", &c).unwrap();
        assert!(expr.program.iter().any(|t| matches!(t, token::Token::VFn(token::VFn::Mean))));
    }

    #[test]
    fn user_variable_round_trips_across_ticks() {
        let expr = compile("acc = acc + x; y = acc;", &ctx(1)).unwrap();
        let mut ring = ValueRing::new(1, ScalarType::F64, 1, 1);
        let mut v1 = mapper_types::Vector::zeros(ScalarType::F64, 1);
        v1.set(0, mapper_types::ScalarValue::F64(2.0));
        ring.push(0, v1, Timetag::ZERO);
        let rings = [&ring];
        let inputs = Inputs { rings: &rings, inst: 0, prev_y: None };
        let gather = GatherContext::default();
        let mut state = VmState::new(expr.num_user_vars, 0);
        let (out1, status1) = eval(&expr, &inputs, &gather, &mut state);
        assert!(status1.contains(EvalStatus::USER_VAR_CHANGED));
        assert!(status1.contains(EvalStatus::UPDATE));
        assert_eq!(out1.y.unwrap().get_wrapped(0).as_f64(), 2.0);
        let (out2, _) = eval(&expr, &inputs, &gather, &mut state);
        assert_eq!(out2.y.unwrap().get_wrapped(0).as_f64(), 4.0);
        assert_eq!(state.user_vars[0].get_wrapped(0).as_f64(), 4.0);
    }

    #[test]
    fn integer_division_by_zero_reports_error() {
        let expr = compile("y = x / 0;", &{
            let mut c = ctx(1);
            c.inputs[0].scalar_type = ScalarType::I32;
            c.output.scalar_type = ScalarType::I32;
            c
        })
        .unwrap();
        let mut ring = ValueRing::new(1, ScalarType::I32, 1, 1);
        ring.push(0, mapper_types::Vector::zeros(ScalarType::I32, 1), Timetag::ZERO);
        let rings = [&ring];
        let inputs = Inputs { rings: &rings, inst: 0, prev_y: None };
        let gather = GatherContext::default();
        let mut state = VmState::new(expr.num_user_vars, 0);
        let (_, status) = eval(&expr, &inputs, &gather, &mut state);
        assert!(status.contains(EvalStatus::ERROR));
    }
}
