//! The "bite" IR
//!
//! One statement of a function body turns into a small tree of typed IR
//! nodes held in an id-indexed arena. Tagged integers flow through
//! arithmetic unshifted (their low tag bits are zero), comparisons produce
//! `t`/`nil`, and `car`/`cdr` become displaced loads with the cell-tag
//! correction folded into the displacement.

use crate::runtime::object::{
    builtin_ref, car, cdr, function_ref, list_len, symbol_name, BuiltinKind, CompileStage,
    CELL_CAR_OFFSET, CELL_CDR_OFFSET,
};
use crate::runtime::value::{Tag, Value, NIL, TRUE};

use super::CodegenError;

/// Machine word size; also the argument-array stride.
pub const WORD: i32 = 8;

/// Most parameters (and call arguments) a compiled function can have: every
/// slot must stay addressable with an 8-bit displacement.
pub const MAX_JIT_ARGS: usize = 15;

/// Index of a bite in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiteId(pub u32);

/// A single IR node.
#[derive(Debug, Clone)]
pub enum BiteOp {
    /// Any constant or integer literal, as its raw tagged word.
    Constant(usize),
    /// Positional argument at a byte offset into the argument array.
    Parameter(i32),
    Add(BiteId, BiteId),
    Sub(BiteId, BiteId),
    Neg(BiteId),
    Less(BiteId, BiteId),
    Eq(BiteId, BiteId),
    /// Load `base[disp]`; implements `car`/`cdr`.
    Ptr(BiteId, i32),
    If {
        cond: BiteId,
        then_branch: BiteId,
        else_branch: BiteId,
    },
    /// Tail self-call: write the arguments back into the incoming argument
    /// array and jump to the function's own entry.
    Recurse(Vec<BiteId>),
    /// Non-tail call of compiled code at `entry`.
    Call { args: Vec<BiteId>, entry: usize },
    /// Evaluate in order, produce the last value.
    Progn(Vec<BiteId>),
    /// Print each argument through the host helper, produce `nil`.
    WriteChar(Vec<BiteId>),
}

/// An arena node: the operation plus the back end's annotations.
#[derive(Debug, Clone)]
pub struct Bite {
    pub op: BiteOp,
    /// Allocated register index, -1 until the back end assigns one.
    pub reg: i8,
    /// Sethi–Ullman register requirement.
    pub reg_count: u32,
}

/// Arena of bites for one function.
#[derive(Debug, Default)]
pub struct Bites {
    nodes: Vec<Bite>,
}

impl Bites {
    pub fn new() -> Bites {
        Bites { nodes: Vec::new() }
    }

    pub fn push(&mut self, op: BiteOp) -> BiteId {
        let id = BiteId(self.nodes.len() as u32);
        self.nodes.push(Bite {
            op,
            reg: -1,
            reg_count: 0,
        });
        id
    }

    pub fn op(&self, id: BiteId) -> &BiteOp {
        &self.nodes[id.0 as usize].op
    }

    pub fn node(&self, id: BiteId) -> &Bite {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: BiteId) -> &mut Bite {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Lower a resolved body expression into bites. `can_recurse` is true in
/// tail position (the whole body, and through the arms of `if` and the
/// last form of `progn`), where a self-call may reuse the current frame.
pub fn lower(
    b: &mut Bites,
    func: Value,
    params: Value,
    body: Value,
    can_recurse: bool,
) -> Result<BiteId, CodegenError> {
    match body.tag() {
        Tag::Cell => {
            let head = car(body);
            let args = cdr(body);
            if head == func {
                if can_recurse {
                    lower_recurse(b, func, params, args)
                } else {
                    lower_call(b, func, params, head, args)
                }
            } else if head.tag() == Tag::Function {
                lower_call(b, func, params, head, args)
            } else if head.tag() == Tag::Builtin {
                match builtin_ref(head).kind {
                    BuiltinKind::Add => lower_add(b, func, params, args),
                    BuiltinKind::Sub => lower_sub(b, func, params, args),
                    BuiltinKind::Less => lower_binary(b, func, params, args, BiteOp::Less),
                    BuiltinKind::Eq => lower_binary(b, func, params, args, BiteOp::Eq),
                    BuiltinKind::Car => lower_ptr(b, func, params, args, cell_field_disp(CELL_CAR_OFFSET)),
                    BuiltinKind::Cdr => lower_ptr(b, func, params, args, cell_field_disp(CELL_CDR_OFFSET)),
                    BuiltinKind::If => lower_if(b, func, params, args, can_recurse),
                    BuiltinKind::Progn => lower_progn(b, func, params, args, can_recurse),
                    BuiltinKind::WriteChar => lower_write_char(b, func, params, args),
                    _ => Err(CodegenError::Unsupported("builtin outside the compile whitelist")),
                }
            } else {
                Err(CodegenError::Unsupported("head is not callable in compiled code"))
            }
        }
        Tag::Symbol => {
            let name = symbol_name(body);
            if name == "nil" {
                Ok(b.push(BiteOp::Constant(NIL.raw())))
            } else if name == "t" {
                Ok(b.push(BiteOp::Constant(TRUE.raw())))
            } else {
                lower_parameter(b, params, body)
            }
        }
        Tag::Int | Tag::Const => Ok(b.push(BiteOp::Constant(body.raw()))),
        _ => Ok(b.push(BiteOp::Constant(NIL.raw()))),
    }
}

/// A cell pointer carries tag 0b011; subtracting it folds the untag into
/// the field load.
fn cell_field_disp(field_offset: i32) -> i32 {
    field_offset - Tag::Cell as i32
}

fn lower_parameter(b: &mut Bites, params: Value, sym: Value) -> Result<BiteId, CodegenError> {
    let mut index = 0i32;
    let mut p = params;
    while p.is_cell() {
        if car(p) == sym {
            if index as usize >= MAX_JIT_ARGS {
                return Err(CodegenError::Unsupported("too many parameters"));
            }
            return Ok(b.push(BiteOp::Parameter(index * WORD)));
        }
        index += 1;
        p = cdr(p);
    }
    Err(CodegenError::Unsupported("unknown parameter"))
}

fn lower_args(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
) -> Result<Vec<BiteId>, CodegenError> {
    let mut ids = Vec::new();
    let mut arg = args;
    while arg.is_cell() {
        ids.push(lower(b, func, params, car(arg), false)?);
        arg = cdr(arg);
    }
    Ok(ids)
}

fn lower_recurse(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
) -> Result<BiteId, CodegenError> {
    if list_len(args) != list_len(params) {
        return Err(CodegenError::Unsupported("self-call arity mismatch"));
    }
    if list_len(args) > MAX_JIT_ARGS {
        return Err(CodegenError::Unsupported("too many arguments"));
    }
    let ids = lower_args(b, func, params, args)?;
    Ok(b.push(BiteOp::Recurse(ids)))
}

fn lower_call(
    b: &mut Bites,
    func: Value,
    params: Value,
    target: Value,
    args: Value,
) -> Result<BiteId, CodegenError> {
    // The target's body slot holds its native entry: for another function
    // because it is already compiled, for a self-call because the slot is
    // repurposed for the duration of code generation.
    if target != func && function_ref(target).compiled != CompileStage::Code {
        return Err(CodegenError::Unsupported("callee is not compiled"));
    }
    if list_len(args) != list_len(function_ref(target).params) {
        return Err(CodegenError::Unsupported("call arity mismatch"));
    }
    if list_len(args) > MAX_JIT_ARGS {
        return Err(CodegenError::Unsupported("too many arguments"));
    }
    let entry = function_ref(target).body.raw();
    let ids = lower_args(b, func, params, args)?;
    Ok(b.push(BiteOp::Call { args: ids, entry }))
}

fn lower_add(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
) -> Result<BiteId, CodegenError> {
    match list_len(args) {
        0 => Ok(b.push(BiteOp::Constant(Value::int(0).raw()))),
        1 => lower(b, func, params, car(args), false),
        _ => {
            let mut lhs = lower(b, func, params, car(args), false)?;
            let mut arg = cdr(args);
            while arg.is_cell() {
                let rhs = lower(b, func, params, car(arg), false)?;
                lhs = b.push(BiteOp::Add(lhs, rhs));
                arg = cdr(arg);
            }
            Ok(lhs)
        }
    }
}

fn lower_sub(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
) -> Result<BiteId, CodegenError> {
    match list_len(args) {
        0 => Err(CodegenError::Unsupported("subtraction needs an argument")),
        1 => {
            let v = lower(b, func, params, car(args), false)?;
            Ok(b.push(BiteOp::Neg(v)))
        }
        _ => {
            let mut lhs = lower(b, func, params, car(args), false)?;
            let mut arg = cdr(args);
            while arg.is_cell() {
                let rhs = lower(b, func, params, car(arg), false)?;
                lhs = b.push(BiteOp::Sub(lhs, rhs));
                arg = cdr(arg);
            }
            Ok(lhs)
        }
    }
}

fn lower_binary(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
    make: impl FnOnce(BiteId, BiteId) -> BiteOp,
) -> Result<BiteId, CodegenError> {
    if list_len(args) != 2 {
        return Err(CodegenError::Unsupported("comparison needs two arguments"));
    }
    let lhs = lower(b, func, params, car(args), false)?;
    let rhs = lower(b, func, params, car(cdr(args)), false)?;
    Ok(b.push(make(lhs, rhs)))
}

fn lower_ptr(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
    disp: i32,
) -> Result<BiteId, CodegenError> {
    if list_len(args) != 1 {
        return Err(CodegenError::Unsupported("field access needs one argument"));
    }
    let base = lower(b, func, params, car(args), false)?;
    Ok(b.push(BiteOp::Ptr(base, disp)))
}

fn lower_if(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
    can_recurse: bool,
) -> Result<BiteId, CodegenError> {
    if list_len(args) != 3 {
        return Err(CodegenError::Unsupported("if needs three arguments"));
    }
    let cond = lower(b, func, params, car(args), false)?;
    let then_branch = lower(b, func, params, car(cdr(args)), can_recurse)?;
    let else_branch = lower(b, func, params, car(cdr(cdr(args))), can_recurse)?;
    Ok(b.push(BiteOp::If {
        cond,
        then_branch,
        else_branch,
    }))
}

fn lower_progn(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
    can_recurse: bool,
) -> Result<BiteId, CodegenError> {
    if args == NIL {
        return Ok(b.push(BiteOp::Constant(NIL.raw())));
    }
    let mut ids = Vec::new();
    let mut arg = args;
    while arg.is_cell() {
        let is_last = !cdr(arg).is_cell();
        ids.push(lower(b, func, params, car(arg), can_recurse && is_last)?);
        arg = cdr(arg);
    }
    Ok(b.push(BiteOp::Progn(ids)))
}

fn lower_write_char(
    b: &mut Bites,
    func: Value,
    params: Value,
    args: Value,
) -> Result<BiteId, CodegenError> {
    let ids = lower_args(b, func, params, args)?;
    Ok(b.push(BiteOp::WriteChar(ids)))
}
