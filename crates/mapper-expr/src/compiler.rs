//! Shunting-yard-equivalent compiler: recursive-descent precedence
//! climbing over the lexeme stream, emitting tokens directly in postfix
//! (RPN) order as each subexpression is reduced — the same output a
//! classic shunting-yard operator stack produces, without maintaining an
//! explicit operator stack of its own. Grounded in `dsl-core::parser`'s
//! span-tracked recursive descent.
//!
//! Scope note (recorded in full in DESIGN.md): the reduction grammar this
//! compiler accepts is restricted to a single variable reference as the
//! loop body (`history(5).x.mean()`, `instance().x.sum()`,
//! `signal().x$0.max()`). This keeps `LoopStart`/`LoopEnd` evaluation
//! tractable as an eager gather (see `vm.rs`) instead of a literal
//! re-executed token range, while still exercising the full
//! `LoopStart`/`LoopEnd`/gather/`VFn` token vocabulary end to end. A direct
//! call like `mean(x)` is a separate, simpler form: no loop at all, just a
//! `VFn` reducing within `x`'s own elements (see `vfuncs::eval_vfn_direct`).

use mapper_types::{ScalarType, ScalarValue, Vector};

use crate::error::CompileError;
use crate::lexer::{lex, Lexeme, LexemeKind};
use crate::token::{
    AssignKind, LoopPlan, MathFn, Op, ReduceKind, Token, VarRef, VarSlot, VecIndex, VFn,
    MAX_HIST_SIZE, MAX_VLITERAL_LEN, N_USER_VARS, STACK_SIZE,
};
use crate::ExprDescriptor;

#[derive(Debug, Clone, Copy)]
pub struct InputSig {
    pub scalar_type: ScalarType,
    pub vec_len: usize,
}

#[derive(Debug, Clone)]
pub struct CompileContext {
    pub inputs: Vec<InputSig>,
    pub output: InputSig,
}

struct Compiler<'a> {
    toks: Vec<Lexeme>,
    pos: usize,
    ctx: &'a CompileContext,
    user_vars: Vec<String>,
    input_hist: Vec<u32>,
    output_hist: u32,
    state_slots: u16,
    depth: i64,
    max_depth: i64,
}

/// Parse and type-check `src` against the signal shapes in `ctx`, producing
/// a token program plus the bookkeeping the VM and router need (history
/// depth per input, stack-depth bound, user variable count).
pub fn compile(src: &str, ctx: &CompileContext) -> Result<ExprDescriptor, CompileError> {
    let toks = lex(src)?;
    let mut c = Compiler {
        toks,
        pos: 0,
        ctx,
        user_vars: Vec::new(),
        input_hist: vec![1; ctx.inputs.len()],
        output_hist: 1,
        state_slots: 0,
        depth: 0,
        max_depth: 0,
    };
    let program = c.parse_program()?;
    if c.user_vars.len() > N_USER_VARS {
        return Err(CompileError::TooManyUserVariables { found: c.user_vars.len(), max: N_USER_VARS });
    }
    if c.max_depth as usize > STACK_SIZE {
        return Err(CompileError::StackOverflow { needed: c.max_depth as usize, max: STACK_SIZE });
    }
    let assigns_y = program.iter().any(|t| matches!(t, Token::Assign { dst: VarRef { slot: VarSlot::Y, .. }, .. }));
    if !assigns_y {
        return Err(CompileError::MissingOutputAssignment);
    }
    let per_instance_input = has_direct_input_reference(&program);
    let manages_instance_lifetime = program.iter().any(|t| {
        matches!(t, Token::Assign { dst: VarRef { slot: VarSlot::Alive | VarSlot::Muted, .. }, .. })
    });
    Ok(ExprDescriptor {
        program,
        input_history_depth: c.input_hist,
        output_history_depth: c.output_hist,
        num_user_vars: c.user_vars.len(),
        output_scalar_type: ctx.output.scalar_type,
        output_vec_len: ctx.output.vec_len,
        max_stack_depth: c.max_depth as usize,
        per_instance_input,
        manages_instance_lifetime,
    })
}

/// Scans for a `Var(X(_))` token outside a reduction loop body. Every
/// `LoopStart` emitted by this compiler wraps exactly one `Var` followed by
/// its matching `LoopEnd` (see the module-level scope note), so skipping
/// three tokens at each `LoopStart` steps cleanly over the reduced
/// reference without needing to track nesting depth.
fn has_direct_input_reference(program: &[Token]) -> bool {
    let mut i = 0;
    while i < program.len() {
        match &program[i] {
            Token::LoopStart { .. } => i += 3,
            Token::Var(VarRef { slot: VarSlot::X(_), .. }) => return true,
            _ => i += 1,
        }
    }
    false
}

impl<'a> Compiler<'a> {
    fn peek(&self) -> &LexemeKind {
        &self.toks[self.pos].kind
    }

    fn offset(&self) -> usize {
        self.toks[self.pos].offset
    }

    fn advance(&mut self) -> LexemeKind {
        let k = self.toks[self.pos].kind.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        k
    }

    fn eat_symbol(&mut self, c: char) -> Result<(), CompileError> {
        if self.peek() == &LexemeKind::Symbol(c) {
            self.advance();
            Ok(())
        } else {
            Err(CompileError::UnexpectedToken { offset: self.offset(), expected: c.to_string() })
        }
    }

    fn eat_ident(&mut self) -> Result<String, CompileError> {
        match self.advance() {
            LexemeKind::Ident(s) => Ok(s),
            _ => Err(CompileError::UnexpectedToken { offset: self.offset(), expected: "identifier".into() }),
        }
    }

    /// Parses an optionally-negated integer literal (history offsets and
    /// vector indices are always integral, never fractional).
    fn eat_signed_int(&mut self) -> Result<i32, CompileError> {
        let negate = if self.peek() == &LexemeKind::Symbol('-') {
            self.advance();
            true
        } else {
            false
        };
        let n = match self.advance() {
            LexemeKind::Number(n) => n as i32,
            _ => return Err(CompileError::UnexpectedToken { offset: self.offset(), expected: "integer".into() }),
        };
        if matches!(self.peek(), LexemeKind::IsFloat(_)) {
            self.advance();
        }
        Ok(if negate { -n } else { n })
    }

    fn push(&mut self, out: &mut Vec<Token>, delta: i64, tok: Token) {
        out.push(tok);
        self.depth += delta;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn parse_program(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut program = Vec::new();
        loop {
            if self.peek() == &LexemeKind::Eof {
                break;
            }
            self.depth = 0;
            self.parse_statement(&mut program)?;
            if self.peek() == &LexemeKind::Symbol(';') {
                self.advance();
            }
        }
        Ok(program)
    }

    fn parse_statement(&mut self, out: &mut Vec<Token>) -> Result<(), CompileError> {
        let offset = self.offset();
        let name = self.eat_ident()?;
        let (dst, kind) = self.resolve_target(&name, offset)?;
        self.eat_symbol('=')?;
        self.parse_expr(out, 0)?;
        let clear_stack = true;
        self.push(out, -1, Token::Assign { dst, kind, clear_stack });
        Ok(())
    }

    fn resolve_target(&mut self, name: &str, offset: usize) -> Result<(VarRef, AssignKind), CompileError> {
        if name == "y" {
            return Ok((VarRef::simple(VarSlot::Y), AssignKind::Ordinary));
        }
        if name == "t_y" {
            return Ok((VarRef::simple(VarSlot::Y), AssignKind::Timetag));
        }
        if name == "x" || name.starts_with("x$") {
            return Err(CompileError::InvalidAssignmentTarget { offset });
        }
        if let Some(idx) = self.user_vars.iter().position(|v| v == name) {
            return Ok((VarRef::simple(VarSlot::User(idx as u8)), AssignKind::Ordinary));
        }
        if self.user_vars.len() >= N_USER_VARS {
            return Err(CompileError::TooManyUserVariables { found: self.user_vars.len() + 1, max: N_USER_VARS });
        }
        let idx = self.user_vars.len() as u8;
        self.user_vars.push(name.to_string());
        Ok((VarRef::simple(VarSlot::User(idx)), AssignKind::Ordinary))
    }

    // Precedence climbing; each level consumes operators of a given
    // priority band and recurses into the next-tighter level.
    fn parse_expr(&mut self, out: &mut Vec<Token>, min_prec: u8) -> Result<(), CompileError> {
        self.parse_unary(out)?;
        loop {
            let op = match self.peek().clone() {
                LexemeKind::Symbol(c) => Op::from_symbol(&c.to_string()),
                LexemeKind::Op2(s) => Op::from_symbol(s),
                _ => None,
            };
            let Some(op) = op else { break };
            if op.precedence() < min_prec || op.arity() != 2 {
                break;
            }
            self.advance();
            self.parse_expr(out, op.precedence() + 1)?;
            self.push(out, -1, Token::Op(op));
        }
        Ok(())
    }

    fn parse_unary(&mut self, out: &mut Vec<Token>) -> Result<(), CompileError> {
        match self.peek().clone() {
            LexemeKind::Symbol('!') => {
                self.advance();
                self.parse_unary(out)?;
                self.push(out, 0, Token::Op(Op::Not));
                Ok(())
            }
            LexemeKind::Symbol('-') => {
                self.advance();
                self.push(out, 1, Token::Lit(ScalarValue::I32(0)));
                self.parse_unary(out)?;
                self.push(out, -1, Token::Op(Op::Sub));
                Ok(())
            }
            _ => self.parse_primary(out),
        }
    }

    fn parse_primary(&mut self, out: &mut Vec<Token>) -> Result<(), CompileError> {
        let offset = self.offset();
        match self.peek().clone() {
            LexemeKind::Number(n) => {
                self.advance();
                let is_float = matches!(self.peek(), LexemeKind::IsFloat(_));
                let literal_is_float = if is_float {
                    match self.advance() {
                        LexemeKind::IsFloat(f) => f,
                        _ => unreachable!(),
                    }
                } else {
                    false
                };
                let sv = if literal_is_float { ScalarValue::F64(n) } else { ScalarValue::I32(n as i32) };
                self.push(out, 1, Token::Lit(sv));
                Ok(())
            }
            LexemeKind::Symbol('(') => {
                self.advance();
                self.parse_expr(out, 0)?;
                self.eat_symbol(')')?;
                Ok(())
            }
            LexemeKind::Symbol('[') => self.parse_vector_literal(out, offset),
            LexemeKind::Ident(name) => self.parse_ident_expr(out, &name, offset),
            _ => Err(CompileError::UnexpectedToken { offset, expected: "expression".into() }),
        }
    }

    fn parse_vector_literal(&mut self, out: &mut Vec<Token>, offset: usize) -> Result<(), CompileError> {
        self.advance(); // '['
        let mut vals = Vec::new();
        if self.peek() != &LexemeKind::Symbol(']') {
            loop {
                match self.advance() {
                    LexemeKind::Number(n) => vals.push(n),
                    _ => return Err(CompileError::UnexpectedToken { offset: self.offset(), expected: "number".into() }),
                }
                if matches!(self.peek(), LexemeKind::IsFloat(_)) {
                    self.advance();
                }
                if self.peek() == &LexemeKind::Symbol(',') {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.eat_symbol(']')?;
        if vals.len() > MAX_VLITERAL_LEN {
            return Err(CompileError::VectorLiteralTooLong { found: vals.len(), max: MAX_VLITERAL_LEN });
        }
        let mut v = Vector::zeros(ScalarType::F64, vals.len());
        for (i, val) in vals.into_iter().enumerate() {
            v.set(i, ScalarValue::F64(val));
        }
        let _ = offset;
        self.push(out, 1, Token::VLit(v));
        Ok(())
    }

    fn parse_ident_expr(&mut self, out: &mut Vec<Token>, name: &str, offset: usize) -> Result<(), CompileError> {
        // Reduction-prefixed form: `history(N).ident.vfn()`,
        // `instance().ident.vfn()`, `signal().ident.vfn()`.
        if matches!(name, "history" | "instance" | "signal" | "vector") && self.peek() == &LexemeKind::Symbol('(') {
            return self.parse_reduction(out, name, offset);
        }
        // Function call: either a scalar FN or a direct (vector-sugared)
        // VFN call.
        if self.peek() == &LexemeKind::Symbol('(') {
            if let Some(f) = MathFn::from_name(name) {
                return self.parse_fn_call(out, f, offset);
            }
            if let Some(vf) = VFn::from_name(name) {
                return self.parse_direct_vfn_call(out, vf, offset);
            }
            return Err(CompileError::UnknownFunction { offset, name: name.to_string() });
        }
        let vref = self.parse_var_ref(name, offset)?;
        self.record_history_reach(&vref);
        self.push(out, 1, Token::Var(vref));
        Ok(())
    }

    fn parse_fn_call(&mut self, out: &mut Vec<Token>, f: MathFn, offset: usize) -> Result<(), CompileError> {
        self.advance(); // '('
        let mut n = 0u8;
        if self.peek() != &LexemeKind::Symbol(')') {
            loop {
                self.parse_expr(out, 0)?;
                n += 1;
                if self.peek() == &LexemeKind::Symbol(',') {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.eat_symbol(')')?;
        if n != f.arity() {
            return Err(CompileError::ArityMismatch { name: f.name().to_string(), expected: f.arity(), found: n });
        }
        let slot = if f.is_stateful() {
            let s = self.state_slots;
            self.state_slots += 1;
            Some(s)
        } else {
            None
        };
        self.push(out, -(n as i64) + 1, Token::Fn(f, slot));
        let _ = offset;
        Ok(())
    }

    fn parse_direct_vfn_call(&mut self, out: &mut Vec<Token>, vf: VFn, offset: usize) -> Result<(), CompileError> {
        self.advance(); // '('
        let mut n = 0u8;
        if self.peek() != &LexemeKind::Symbol(')') {
            loop {
                self.parse_expr(out, 0)?;
                n += 1;
                if self.peek() == &LexemeKind::Symbol(',') {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.eat_symbol(')')?;
        if n != vf.arity() {
            return Err(CompileError::ArityMismatch { name: vf.name().to_string(), expected: vf.arity(), found: n });
        }
        self.push(out, -(n as i64) + 1, Token::VFn(vf));
        let _ = offset;
        Ok(())
    }

    /// `KIND '(' [N] ')' '.' ident '.' vfn '(' ')'`.
    fn parse_reduction(&mut self, out: &mut Vec<Token>, kind_name: &str, offset: usize) -> Result<(), CompileError> {
        let kind = match kind_name {
            "history" => ReduceKind::History,
            "instance" => ReduceKind::Instance,
            "signal" => ReduceKind::Signal,
            "vector" => ReduceKind::Vector,
            _ => unreachable!(),
        };
        self.advance(); // '('
        let plan = if kind == ReduceKind::History {
            let n = self.eat_signed_int()?;
            if n <= 0 || n > MAX_HIST_SIZE {
                return Err(CompileError::HistoryOutOfRange { offset, offset_value: n });
            }
            LoopPlan::Fixed(n as u32)
        } else {
            // `instance()`/`signal()` bounds are resolved at evaluation
            // time; `vector()`'s bound is resolved just below, once the
            // operand variable (and hence its declared width) is known.
            LoopPlan::Dynamic(kind)
        };
        self.eat_symbol(')')?;
        self.eat_symbol('.')?;
        let var_offset = self.offset();
        let var_name = self.eat_ident()?;
        let vref = self.parse_var_ref(&var_name, var_offset)?;
        self.eat_symbol('.')?;
        let vfn_offset = self.offset();
        let vfn_name = self.eat_ident()?;
        let vf = VFn::from_name(&vfn_name).ok_or_else(|| CompileError::UnknownFunction { offset: vfn_offset, name: vfn_name.clone() })?;
        self.eat_symbol('(')?;
        self.eat_symbol(')')?;

        let plan = if kind == ReduceKind::Vector {
            let len = self.ctx.inputs.get(self.input_index(&vref)).map(|s| s.vec_len).unwrap_or(1);
            LoopPlan::Fixed(len.max(1) as u32)
        } else {
            plan
        };

        if kind == ReduceKind::History {
            let depth = match plan {
                LoopPlan::Fixed(n) => n,
                _ => 1,
            };
            self.bump_history_reach(&vref, depth);
        } else {
            self.record_history_reach(&vref);
        }

        self.push(out, 1, Token::LoopStart { kind, plan });
        self.push(out, 0, Token::Var(vref));
        let cache_offset = (self.depth - 1).max(0) as i32;
        self.push(out, 0, Token::LoopEnd { kind, branch_offset: 0, cache_offset });
        self.push(out, 0, Token::VFn(vf));
        Ok(())
    }

    fn input_index(&self, vref: &VarRef) -> usize {
        match vref.slot {
            VarSlot::X(i) => i,
            _ => 0,
        }
    }

    fn record_history_reach(&mut self, vref: &VarRef) {
        if let VarSlot::Y = vref.slot {
            let reach = vref.hist_idx.map(|h| (-h).max(1) as u32 + 1).unwrap_or(1);
            self.output_hist = self.output_hist.max(reach);
        }
        self.bump_history_reach(vref, vref.hist_idx.map(|h| (-h).max(0) as u32 + 1).unwrap_or(1));
    }

    fn bump_history_reach(&mut self, vref: &VarRef, depth: u32) {
        if let VarSlot::X(i) = vref.slot {
            if let Some(slot) = self.input_hist.get_mut(i) {
                *slot = (*slot).max(depth);
            }
        }
    }

    fn parse_var_ref(&mut self, name: &str, offset: usize) -> Result<VarRef, CompileError> {
        let slot = if name == "y" {
            VarSlot::Y
        } else if name == "x" {
            VarSlot::X(0)
        } else if let Some(rest) = name.strip_prefix("x$") {
            let idx: usize = rest.parse().map_err(|_| CompileError::UnknownVariable { offset, name: name.to_string() })?;
            VarSlot::X(idx)
        } else if name == "alive" {
            VarSlot::Alive
        } else if name == "muted" {
            VarSlot::Muted
        } else if let Some(idx) = self.user_vars.iter().position(|v| v == name) {
            VarSlot::User(idx as u8)
        } else {
            return Err(CompileError::UnknownVariable { offset, name: name.to_string() });
        };

        let mut hist_idx = None;
        let mut vec_idx = None;
        if self.peek() == &LexemeKind::Symbol('{') {
            self.advance();
            let n = self.eat_signed_int()?;
            self.eat_symbol('}')?;
            if n > 0 || -n > MAX_HIST_SIZE {
                return Err(CompileError::HistoryOutOfRange { offset, offset_value: n });
            }
            hist_idx = Some(n);
        }
        if self.peek() == &LexemeKind::Symbol('[') {
            self.advance();
            let a = self.eat_signed_int()?;
            if self.peek() == &LexemeKind::Symbol(':') {
                self.advance();
                let b = self.eat_signed_int()?;
                vec_idx = Some(VecIndex::Range(a, b));
            } else {
                vec_idx = Some(VecIndex::Single(a));
            }
            self.eat_symbol(']')?;
        }
        Ok(VarRef { slot, hist_idx, vec_idx })
    }
}
