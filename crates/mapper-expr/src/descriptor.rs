use mapper_types::ScalarType;

use crate::token::Token;

/// Everything the VM and the router need to know about a compiled
/// expression besides the token program itself: how deep into each input's
/// history it reaches, how many user variables it needs, and the output's
/// shape. Roughly the `mpr_expr` struct's public-facing fields.
#[derive(Debug, Clone)]
pub struct ExprDescriptor {
    pub program: Vec<Token>,
    /// Per declared input (`x`, `x$1`, ...), how many historical samples
    /// back the expression reaches (1 means "just the newest sample").
    pub input_history_depth: Vec<u32>,
    /// Same, for the output `y`.
    pub output_history_depth: u32,
    pub num_user_vars: usize,
    pub output_scalar_type: ScalarType,
    pub output_vec_len: usize,
    /// Upper bound on simultaneous value-stack depth, checked against
    /// `token::STACK_SIZE` at compile time.
    pub max_stack_depth: usize,
    /// Whether the program contains a direct (non-reduced) reference to an
    /// input — `x`, `x$N`, any history/vector index of those — outside a
    /// reduction loop body. When `false`, every live-input reference is
    /// already folded through `history()`/`instance()`/`signal()`/
    /// `vector()`, so one evaluation pass covers the whole map and the
    /// caller need not repeat it per instance (`EvalStatus::EVAL_DONE`,
    /// §4.B).
    pub per_instance_input: bool,
    /// Whether the program assigns to the reserved `alive` or `muted`
    /// side-channel variables — the expression manages instance lifetime
    /// itself rather than relying on the router's default bookkeeping.
    pub manages_instance_lifetime: bool,
}
