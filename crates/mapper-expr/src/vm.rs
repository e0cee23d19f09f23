//! Stack machine that executes a compiled `Token` program against live
//! input history. Grounded in `esper_core`'s state-machine-plus-bitflags
//! pattern: evaluation returns an `EvalStatus` bitmask rather than throwing,
//! mirroring how `esper_core::effect::EffectSet` reports what happened
//! without the caller needing a side-channel.

use bitflags::bitflags;
use mapper_ring::ValueRing;
use mapper_types::{ScalarValue, Timetag, Vector};

use crate::descriptor::ExprDescriptor;
use crate::funcs::{eval_fn, FnState};
use crate::ops::{eval_op, OpResult};
use crate::token::{AssignKind, LoopPlan, ReduceKind, Token, VarRef, VarSlot};
use crate::vfuncs::{eval_vfn_direct, eval_vfn_gathered};

bitflags! {
    /// What a single evaluation pass actually did. `ERROR` is set instead of
    /// returning a `Result` because a mid-expression failure (divide by
    /// zero, an `IFTHEN` guard that never fires) is an expected, silent
    /// "drop this tick's update" outcome rather than an exceptional one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EvalStatus: u16 {
        /// Destination ring was written this call.
        const UPDATE               = 1 << 0;
        /// A write to `y` was suppressed by the `muted` side-channel.
        const MUTED_UPDATE         = 1 << 1;
        /// The reserved `alive` side-channel transitioned to false before
        /// (or without) a `y` write in the same pass.
        const RELEASE_BEFORE_UPDATE = 1 << 2;
        /// Same transition, but after a `y` write already landed this pass.
        const RELEASE_AFTER_UPDATE  = 1 << 3;
        /// No non-reduced reference to a live input remained in the
        /// program: the caller doesn't need to repeat this evaluation per
        /// instance (`ExprDescriptor::per_instance_input`).
        const EVAL_DONE            = 1 << 4;
        const USER_VAR_CHANGED     = 1 << 5;
        const UPDATED_T_Y          = 1 << 6;
        const ERROR                = 1 << 7;
    }
}

/// Read-only view over this evaluation's source signal rings, one per
/// declared `x$N` input.
pub struct Inputs<'a> {
    pub rings: &'a [&'a ValueRing],
    /// Which instance (by ring-local index) is being evaluated.
    pub inst: usize,
    /// The destination's previous value, for `y`-referencing right-hand
    /// sides (`y = y + x;`).
    pub prev_y: Option<&'a Vector>,
}

/// Data the VM cannot derive from `Inputs` alone because it spans state the
/// expression engine doesn't own: which instances of the representative
/// input are currently active (for `instance()` reductions). Supplied by
/// the router when it drives evaluation.
#[derive(Default)]
pub struct GatherContext<'a> {
    pub instance_samples: Option<&'a [Vector]>,
}

/// Per-compiled-expression mutable state that must persist across ticks:
/// user variable values, stateful-function accumulators, and the
/// `alive`/`muted` side-channels an expression can read and write to manage
/// its own instance lifetime (§4.B, §4.C "whether the expression manages
/// instance lifetime").
#[derive(Debug, Clone)]
pub struct VmState {
    pub user_vars: Vec<Vector>,
    pub fn_states: Vec<FnState>,
    pub alive: bool,
    pub muted: bool,
}

impl VmState {
    pub fn new(num_user_vars: usize, num_fn_states: usize) -> Self {
        VmState {
            user_vars: vec![Vector::zeros(mapper_types::ScalarType::F64, 1); num_user_vars],
            fn_states: vec![FnState::default(); num_fn_states],
            alive: true,
            muted: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvalOutput {
    pub y: Option<Vector>,
    pub t_y: Option<Timetag>,
}

pub fn eval(
    expr: &ExprDescriptor,
    inputs: &Inputs<'_>,
    gather: &GatherContext<'_>,
    state: &mut VmState,
) -> (EvalOutput, EvalStatus) {
    let mut stack: Vec<Vector> = Vec::with_capacity(expr.max_stack_depth.max(4));
    let mut pending_gather: Option<usize> = None;
    let mut out = EvalOutput::default();
    let mut status = EvalStatus::empty();

    let mut pc = 0;
    while pc < expr.program.len() {
        let tok = &expr.program[pc];
        match tok {
            Token::Lit(sv) => stack.push(scalar_as_vector(*sv)),
            Token::VLit(v) => stack.push(v.clone()),
            Token::Var(vref) => match resolve_var(vref, inputs, state) {
                Some(v) => stack.push(v),
                None => {
                    status |= EvalStatus::ERROR;
                    return (out, status);
                }
            },
            Token::VarNumInst => {
                let n = gather.instance_samples.map(|s| s.len()).unwrap_or(1) as i32;
                stack.push(scalar_as_vector(ScalarValue::I32(n)));
            }
            Token::Tt(slot) => {
                let t = match slot {
                    VarSlot::Y => inputs.prev_y.map(|_| Timetag::ZERO).unwrap_or(Timetag::ZERO),
                    _ => Timetag::ZERO,
                };
                stack.push(scalar_as_vector(ScalarValue::F64(t.as_secs_f64())));
            }
            Token::Op(op) => {
                let n = op.arity() as usize;
                if stack.len() < n {
                    status |= EvalStatus::ERROR;
                    return (out, status);
                }
                let args: Vec<Vector> = stack.split_off(stack.len() - n);
                match eval_op(*op, &args) {
                    OpResult::Value(v) => stack.push(v),
                    OpResult::DivideByZero => {
                        status |= EvalStatus::ERROR;
                        return (out, status);
                    }
                }
            }
            Token::Fn(f, slot) => {
                let n = f.arity() as usize;
                if stack.len() < n {
                    status |= EvalStatus::ERROR;
                    return (out, status);
                }
                let args: Vec<Vector> = stack.split_off(stack.len() - n);
                let mut scratch = FnState::default();
                let fn_state: &mut [FnState] = match slot {
                    Some(s) => std::slice::from_mut(&mut state.fn_states[*s as usize]),
                    None => std::slice::from_mut(&mut scratch),
                };
                stack.push(eval_fn(*f, &args, fn_state));
            }
            Token::VFn(vf) => {
                let gathered = pending_gather.take();
                let n = gathered.unwrap_or(vf.arity() as usize);
                if stack.len() < n {
                    status |= EvalStatus::ERROR;
                    return (out, status);
                }
                let frames: Vec<Vector> = stack.split_off(stack.len() - n);
                let result = if gathered.is_some() {
                    eval_vfn_gathered(*vf, &frames)
                } else {
                    eval_vfn_direct(*vf, &frames)
                };
                stack.push(result);
            }
            Token::LoopStart { kind, plan } => {
                // This crate's supported reduction grammar wraps exactly
                // one `Var` token per loop (see compiler.rs); resolve the
                // whole gather eagerly rather than re-executing a
                // back-branching token range.
                let body_pc = pc + 1;
                let Token::Var(vref) = &expr.program[body_pc] else {
                    status |= EvalStatus::ERROR;
                    return (out, status);
                };
                let count = resolve_count(*kind, *plan, vref, inputs, gather);
                for cursor in 0..count {
                    let v = gather_one(*kind, cursor, count, vref, inputs, gather, state);
                    stack.push(v);
                }
                pending_gather = Some(count as usize);
                // Advance past Var and LoopEnd in one step.
                pc = body_pc + 2;
                continue;
            }
            Token::LoopEnd { .. } => {
                // Only reached if a caller hand-assembled a program whose
                // LoopStart body wasn't exactly one Var token; normal
                // compiler output skips over this via the LoopStart branch
                // above.
            }
            Token::CopyFrom(rel) => {
                let idx = (stack.len() as i64 - 1 + *rel as i64).max(0) as usize;
                if let Some(v) = stack.get(idx).cloned() {
                    stack.push(v);
                }
            }
            Token::Move(rel) => {
                if let Some(v) = stack.pop() {
                    let idx = (stack.len() as i64 + *rel as i64).max(0) as usize;
                    if idx < stack.len() {
                        stack[idx] = v;
                    } else {
                        stack.push(v);
                    }
                }
            }
            Token::SpAdd(n) => {
                if *n < 0 {
                    let drop = (-*n) as usize;
                    let new_len = stack.len().saturating_sub(drop);
                    stack.truncate(new_len);
                }
            }
            Token::Vectorize(_) | Token::Reducing => {}
            Token::Cast(ty) => {
                if let Some(v) = stack.pop() {
                    stack.push(v.cast_to(*ty));
                }
            }
            Token::Assign { dst, kind, clear_stack } => {
                let Some(v) = stack.pop() else {
                    status |= EvalStatus::ERROR;
                    return (out, status);
                };
                match (dst.slot, kind) {
                    (VarSlot::Y, AssignKind::Timetag) => {
                        out.t_y = Some(Timetag::from_secs_f64(v.get_wrapped(0).as_f64()));
                        status |= EvalStatus::UPDATED_T_Y;
                    }
                    (VarSlot::Y, _) => {
                        if state.muted {
                            status |= EvalStatus::MUTED_UPDATE;
                        } else {
                            out.y = Some(v);
                            status |= EvalStatus::UPDATE;
                        }
                    }
                    (VarSlot::User(idx), _) => {
                        state.user_vars[idx as usize] = v;
                        status |= EvalStatus::USER_VAR_CHANGED;
                    }
                    (VarSlot::Alive, _) => {
                        let was_alive = state.alive;
                        state.alive = v.get_wrapped(0).as_f64() != 0.0;
                        if was_alive && !state.alive {
                            status |= if status.intersects(EvalStatus::UPDATE | EvalStatus::MUTED_UPDATE) {
                                EvalStatus::RELEASE_AFTER_UPDATE
                            } else {
                                EvalStatus::RELEASE_BEFORE_UPDATE
                            };
                        }
                    }
                    (VarSlot::Muted, _) => {
                        state.muted = v.get_wrapped(0).as_f64() != 0.0;
                    }
                    _ => {}
                }
                if *clear_stack {
                    stack.clear();
                }
            }
        }
        pc += 1;
    }
    if !expr.per_instance_input {
        status |= EvalStatus::EVAL_DONE;
    }
    (out, status)
}

fn scalar_as_vector(sv: ScalarValue) -> Vector {
    let mut v = Vector::zeros(sv.scalar_type(), 1);
    v.set(0, sv);
    v
}

fn resolve_var(vref: &VarRef, inputs: &Inputs<'_>, state: &VmState) -> Option<Vector> {
    let base = match vref.slot {
        VarSlot::X(i) => {
            let ring = inputs.rings.get(i)?;
            let offset = vref.hist_idx.unwrap_or(0) as f64;
            ring.get(inputs.inst, offset).map(|s| s.value)
        }
        VarSlot::Y => inputs.prev_y.cloned(),
        VarSlot::User(idx) => state.user_vars.get(idx as usize).cloned(),
        VarSlot::Alive => Some(scalar_as_vector(ScalarValue::I32(state.alive as i32))),
        VarSlot::Muted => Some(scalar_as_vector(ScalarValue::I32(state.muted as i32))),
    }?;
    Some(apply_vec_index(base, vref))
}

fn apply_vec_index(v: Vector, vref: &VarRef) -> Vector {
    use crate::token::VecIndex;
    match vref.vec_idx {
        None => v,
        Some(VecIndex::Single(i)) => {
            let mut out = Vector::zeros(v.scalar_type(), 1);
            out.set(0, v.get_wrapped(i as usize));
            out
        }
        Some(VecIndex::Range(a, b)) => {
            let len = (b - a + 1).max(0) as usize;
            let mut out = Vector::zeros(v.scalar_type(), len);
            for (k, i) in (a..=b).enumerate() {
                out.set(k, v.get_wrapped(i as usize));
            }
            out
        }
    }
}

fn resolve_count(kind: ReduceKind, plan: LoopPlan, _vref: &VarRef, inputs: &Inputs<'_>, gather: &GatherContext<'_>) -> u32 {
    match plan {
        LoopPlan::Fixed(n) => n,
        LoopPlan::Dynamic(ReduceKind::Instance) => gather.instance_samples.map(|s| s.len()).unwrap_or(1) as u32,
        LoopPlan::Dynamic(ReduceKind::Signal) => inputs.rings.len().max(1) as u32,
        LoopPlan::Dynamic(_) => {
            let _ = kind;
            1
        }
    }
}

fn gather_one(
    kind: ReduceKind,
    cursor: u32,
    count: u32,
    vref: &VarRef,
    inputs: &Inputs<'_>,
    gather: &GatherContext<'_>,
    state: &VmState,
) -> Vector {
    match kind {
        ReduceKind::History => {
            let offset = -((count as i32 - 1 - cursor as i32)) as f64;
            if let VarSlot::X(i) = vref.slot {
                if let Some(ring) = inputs.rings.get(i) {
                    if let Some(s) = ring.get(inputs.inst, offset) {
                        return apply_vec_index(s.value, vref);
                    }
                }
            }
            Vector::zeros(mapper_types::ScalarType::F64, 1)
        }
        ReduceKind::Instance => gather
            .instance_samples
            .and_then(|s| s.get(cursor as usize).cloned())
            .unwrap_or_else(|| Vector::zeros(mapper_types::ScalarType::F64, 1)),
        ReduceKind::Signal => {
            let idx = cursor as usize;
            inputs
                .rings
                .get(idx)
                .and_then(|ring| ring.get(inputs.inst, 0.0))
                .map(|s| s.value)
                .unwrap_or_else(|| Vector::zeros(mapper_types::ScalarType::F64, 1))
        }
        ReduceKind::Vector => {
            let base = resolve_var(&VarRef::simple(vref.slot), inputs, state).unwrap_or_else(|| Vector::zeros(mapper_types::ScalarType::F64, 1));
            let mut out = Vector::zeros(base.scalar_type(), 1);
            out.set(0, base.get_wrapped(cursor as usize));
            out
        }
    }
}
