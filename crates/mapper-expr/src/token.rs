use mapper_types::{ScalarType, ScalarValue, Vector};

/// Hard resource limits, carried over verbatim from the original
/// implementation's `MAX_HIST_SIZE`/`N_USER_VARS`/`STACK_SIZE` constants —
/// these are the numbers §7 "Resource exhaustion" compile errors check
/// against.
pub const MAX_HIST_SIZE: i32 = 100;
pub const N_USER_VARS: usize = 16;
pub const STACK_SIZE: usize = 64;
pub const MAX_VLITERAL_LEN: usize = 64;

/// Binary/unary/ternary operators, in the exact order and grouping of
/// `original_source/src/expression.c`'s `op_tbl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Not,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
    IfThen,
    IfElse,
    IfThenElse,
}

impl Op {
    pub fn arity(self) -> u8 {
        match self {
            Op::Not => 1,
            Op::IfThenElse => 3,
            _ => 2,
        }
    }

    /// Left-associative binding power; higher binds tighter. Mirrors
    /// `op_tbl`'s `precedence` column.
    pub fn precedence(self) -> u8 {
        match self {
            Op::Not => 11,
            Op::Mul | Op::Div | Op::Mod => 10,
            Op::Add | Op::Sub => 9,
            Op::Shl | Op::Shr => 8,
            Op::Gt | Op::Ge | Op::Lt | Op::Le => 7,
            Op::Eq | Op::Ne => 6,
            Op::BitAnd => 5,
            Op::BitXor => 4,
            Op::BitOr => 3,
            Op::And => 2,
            Op::Or => 1,
            Op::IfThen | Op::IfElse | Op::IfThenElse => 0,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Op::Not => "!",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Shl => "<<",
            Op::Shr => ">>",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::BitAnd => "&",
            Op::BitXor => "^",
            Op::BitOr => "|",
            Op::And => "&&",
            Op::Or => "||",
            Op::IfThen => "IFTHEN",
            Op::IfElse => "IFELSE",
            Op::IfThenElse => "IFTHENELSE",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Op> {
        Some(match s {
            "!" => Op::Not,
            "*" => Op::Mul,
            "/" => Op::Div,
            "%" => Op::Mod,
            "+" => Op::Add,
            "-" => Op::Sub,
            "<<" => Op::Shl,
            ">>" => Op::Shr,
            ">" => Op::Gt,
            ">=" => Op::Ge,
            "<" => Op::Lt,
            "<=" => Op::Le,
            "==" => Op::Eq,
            "!=" => Op::Ne,
            "&" => Op::BitAnd,
            "^" => Op::BitXor,
            "|" => Op::BitOr,
            "&&" => Op::And,
            "||" => Op::Or,
            _ => return None,
        })
    }
}

/// The closed scalar math library (`FN` tokens), names taken verbatim from
/// `fn_tbl`. `Ema` and `Schmitt` are stateful (they read and write a hidden
/// accumulator variable); the rest are pure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Abs,
    Acos,
    Acosh,
    Asin,
    Asinh,
    Atan,
    Atan2,
    Atanh,
    Cbrt,
    Ceil,
    Cos,
    Cosh,
    Ema,
    Exp,
    Exp2,
    Floor,
    Hypot,
    HzToMidi,
    Log,
    Log10,
    Log2,
    Logb,
    Max,
    MidiToHz,
    Min,
    Pow,
    Round,
    Schmitt,
    Sign,
    Sin,
    Sinh,
    Sqrt,
    Tan,
    Tanh,
    Trunc,
    Uniform,
}

impl MathFn {
    pub fn arity(self) -> u8 {
        match self {
            MathFn::Atan2 | MathFn::Hypot | MathFn::Max | MathFn::Min | MathFn::Pow => 2,
            MathFn::Ema => 3,
            MathFn::Schmitt => 4,
            _ => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MathFn::Abs => "abs",
            MathFn::Acos => "acos",
            MathFn::Acosh => "acosh",
            MathFn::Asin => "asin",
            MathFn::Asinh => "asinh",
            MathFn::Atan => "atan",
            MathFn::Atan2 => "atan2",
            MathFn::Atanh => "atanh",
            MathFn::Cbrt => "cbrt",
            MathFn::Ceil => "ceil",
            MathFn::Cos => "cos",
            MathFn::Cosh => "cosh",
            MathFn::Ema => "ema",
            MathFn::Exp => "exp",
            MathFn::Exp2 => "exp2",
            MathFn::Floor => "floor",
            MathFn::Hypot => "hypot",
            MathFn::HzToMidi => "hzToMidi",
            MathFn::Log => "log",
            MathFn::Log10 => "log10",
            MathFn::Log2 => "log2",
            MathFn::Logb => "logb",
            MathFn::Max => "max",
            MathFn::MidiToHz => "midiToHz",
            MathFn::Min => "min",
            MathFn::Pow => "pow",
            MathFn::Round => "round",
            MathFn::Schmitt => "schmitt",
            MathFn::Sign => "sign",
            MathFn::Sin => "sin",
            MathFn::Sinh => "sinh",
            MathFn::Sqrt => "sqrt",
            MathFn::Tan => "tan",
            MathFn::Tanh => "tanh",
            MathFn::Trunc => "trunc",
            MathFn::Uniform => "uniform",
        }
    }

    pub fn from_name(s: &str) -> Option<MathFn> {
        use MathFn::*;
        Some(match s {
            "abs" => Abs,
            "acos" => Acos,
            "acosh" => Acosh,
            "asin" => Asin,
            "asinh" => Asinh,
            "atan" => Atan,
            "atan2" => Atan2,
            "atanh" => Atanh,
            "cbrt" => Cbrt,
            "ceil" => Ceil,
            "cos" => Cos,
            "cosh" => Cosh,
            "ema" => Ema,
            "exp" => Exp,
            "exp2" => Exp2,
            "floor" => Floor,
            "hypot" => Hypot,
            "hzToMidi" => HzToMidi,
            "log" => Log,
            "log10" => Log10,
            "log2" => Log2,
            "logb" => Logb,
            "max" => Max,
            "midiToHz" => MidiToHz,
            "min" => Min,
            "pow" => Pow,
            "round" => Round,
            "schmitt" => Schmitt,
            "sign" => Sign,
            "sin" => Sin,
            "sinh" => Sinh,
            "sqrt" => Sqrt,
            "tan" => Tan,
            "tanh" => Tanh,
            "trunc" => Trunc,
            "uniform" => Uniform,
            _ => return None,
        })
    }

    /// Stateful functions need a hidden accumulator slot allocated for them.
    pub fn is_stateful(self) -> bool {
        matches!(self, MathFn::Ema | MathFn::Schmitt)
    }
}

/// The closed vector-function library (`VFN` tokens): the twelve reductions
/// named in the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VFn {
    Sum,
    Mean,
    Min,
    Max,
    Center,
    Norm,
    Sort,
    Median,
    Concat,
    Dot,
    Angle,
    Length,
}

impl VFn {
    pub fn name(self) -> &'static str {
        match self {
            VFn::Sum => "sum",
            VFn::Mean => "mean",
            VFn::Min => "min",
            VFn::Max => "max",
            VFn::Center => "center",
            VFn::Norm => "norm",
            VFn::Sort => "sort",
            VFn::Median => "median",
            VFn::Concat => "concat",
            VFn::Dot => "dot",
            VFn::Angle => "angle",
            VFn::Length => "length",
        }
    }

    pub fn from_name(s: &str) -> Option<VFn> {
        use VFn::*;
        Some(match s {
            "sum" => Sum,
            "mean" => Mean,
            "min" => Min,
            "max" => Max,
            "center" => Center,
            "norm" => Norm,
            "sort" => Sort,
            "median" => Median,
            "concat" => Concat,
            "dot" => Dot,
            "angle" => Angle,
            "length" => Length,
            _ => return None,
        })
    }

    /// Arity as used as a reduction over `LoopEnd`-gathered frames: these
    /// all reduce a single gathered sequence of frames down to one, except
    /// `concat` (ternary: src, dst-offset, values) and `dot`/`angle`
    /// (binary: two equal-length vectors).
    pub fn arity(self) -> u8 {
        match self {
            VFn::Concat => 3,
            VFn::Dot | VFn::Angle => 2,
            _ => 1,
        }
    }
}

/// Which dimension a reduction prefix (`history`, `instance`, `signal`,
/// `vector`) iterates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    History,
    Instance,
    Signal,
    Vector,
}

/// How many times a loop body runs, resolved as far as possible at compile
/// time (see the design note in `compiler.rs` on why this crate resolves
/// reduction bounds eagerly rather than re-deriving them per VM step).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPlan {
    /// Count known at compile time (`history(5)`, or `vector()` over an
    /// operand whose width is statically known).
    Fixed(u32),
    /// Count depends on live state at evaluation time (`instance()` — the
    /// number of currently-active instances of the representative input;
    /// `signal()` — the number of source signals feeding this map).
    Dynamic(ReduceKind),
}

/// Which logical value slot a variable reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarSlot {
    /// `x` or `x$N`: input N (0 if unspecified).
    X(usize),
    /// `y`: the destination.
    Y,
    /// A user-declared variable, by its slot index in the variable-ring
    /// array (`0..N_USER_VARS`).
    User(u8),
    /// The reserved `alive` side-channel.
    Alive,
    /// The reserved `muted` side-channel.
    Muted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VecIndex {
    Single(i32),
    Range(i32, i32),
}

/// `VAR (slot, hist_idx?, vec_idx?, sig_idx?)`. `hist_idx` is `None` for "no
/// explicit history index" (implicitly the newest sample); when present it
/// may be fractional at evaluation time even though the compiler only ever
/// emits integral offsets (fractional offsets only arise from `reduce`'s
/// interpolated cursor, which this crate does not implement — see
/// DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarRef {
    pub slot: VarSlot,
    pub hist_idx: Option<i32>,
    pub vec_idx: Option<VecIndex>,
}

impl VarRef {
    pub fn simple(slot: VarSlot) -> Self {
        VarRef { slot, hist_idx: None, vec_idx: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignKind {
    /// Assignment whose right-hand side is wholly constant: evaluated once
    /// at compile time and the program statement is a single, already-
    /// folded write.
    ConstInit,
    /// A plain `y = expr;` or `user_var = expr;` assignment.
    Ordinary,
    /// `y = y + expr;`-shaped: the destination is read before being
    /// overwritten within the same statement.
    UseThenAssign,
    /// `t_y = ...;`: assigns a timetag rather than a value.
    Timetag,
}

/// The closed VM token set from §4.B.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Lit(ScalarValue),
    VLit(Vector),
    Var(VarRef),
    VarNumInst,
    Tt(VarSlot),
    Op(Op),
    /// The second field is the hidden-state slot index for stateful
    /// functions (`ema`, `schmitt`); `None` for pure functions.
    Fn(MathFn, Option<u16>),
    VFn(VFn),
    LoopStart { kind: ReduceKind, plan: LoopPlan },
    LoopEnd { kind: ReduceKind, branch_offset: i32, cache_offset: i32 },
    CopyFrom(i32),
    Move(i32),
    SpAdd(i32),
    Vectorize(u8),
    Reducing,
    Assign { dst: VarRef, kind: AssignKind, clear_stack: bool },
    Cast(ScalarType),
}
