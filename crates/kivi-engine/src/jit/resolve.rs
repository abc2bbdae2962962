//! Resolve-symbols pre-pass and the compile admission check
//!
//! Before lowering, every symbol in a function body is rewritten in place:
//! parameter references stay symbols (they become argument-array indices),
//! references to the function's own name become the function object, and
//! globals are replaced by their currently-bound values. After the pass the
//! body contains no unresolved symbols.

use crate::runtime::errors::RuntimeError;
use crate::runtime::object::{
    builtin_ref, car, cdr, function_ref, set_car, symbol_name, BuiltinKind, CompileStage,
};
use crate::runtime::scope::symbol_lookup;
use crate::runtime::value::{Tag, Value, UNDEFINED};
use crate::runtime::Runtime;

use super::CodegenError;

/// The builtins the back end can lower.
pub const JIT_BUILTINS: &[BuiltinKind] = &[
    BuiltinKind::If,
    BuiltinKind::Less,
    BuiltinKind::Add,
    BuiltinKind::Sub,
    BuiltinKind::Eq,
    BuiltinKind::Car,
    BuiltinKind::Cdr,
    BuiltinKind::Progn,
    BuiltinKind::WriteChar,
];

/// Is `sym` one of the function's parameters?
pub fn is_parameter(params: Value, sym: Value) -> bool {
    let mut p = params;
    while p.is_cell() {
        if car(p) == sym {
            return true;
        }
        p = cdr(p);
    }
    false
}

/// Rewrite every symbol in `body` (a list) in place. Returns false and
/// records `UndefinedSymbol` when a global reference has no binding.
pub fn resolve_symbols(
    rt: &mut Runtime,
    scope: Value,
    name: Value,
    func: Value,
    body: Value,
) -> bool {
    if !body.is_cell() {
        return true;
    }
    let mut item = body;
    while item.is_cell() {
        let v = car(item);
        match v.tag() {
            Tag::Symbol => {
                let params = function_ref(func).params;
                let resolved = if is_parameter(params, v) {
                    // Parameters stay symbolic; they turn into argument
                    // offsets during lowering.
                    v
                } else if v == name {
                    func
                } else {
                    let found = symbol_lookup(scope, v);
                    if found == UNDEFINED {
                        rt.record(RuntimeError::UndefinedSymbol(symbol_name(v).to_string()));
                        return false;
                    }
                    found
                };
                set_car(item, resolved);
            }
            Tag::Cell => {
                if !resolve_symbols(rt, scope, name, func, v) {
                    return false;
                }
            }
            _ => {}
        }
        item = cdr(item);
    }
    true
}

/// Admission check for the back end: integer and constant literals,
/// parameter references, self references, and calls whose head is a
/// whitelisted builtin or an already-compiled function, with recursively
/// admissible arguments. Runs after [`resolve_symbols`], so call heads are
/// values, not names.
pub fn valid_for_compile(func: Value, params: Value, body: Value) -> Result<(), CodegenError> {
    match body.tag() {
        Tag::Int | Tag::Const => return Ok(()),
        Tag::Symbol => {
            let name = symbol_name(body);
            if name == "nil" || name == "t" || is_parameter(params, body) {
                return Ok(());
            }
            return Err(CodegenError::Unsupported("unresolved symbol in body"));
        }
        Tag::Cell => {}
        _ => return Err(CodegenError::Unsupported("body is not a list or a constant")),
    }

    let head = car(body);
    if head == func {
        // Self-recursion.
    } else if head.tag() == Tag::Function {
        if function_ref(head).compiled != CompileStage::Code {
            return Err(CodegenError::Unsupported("callee is not compiled"));
        }
    } else if head.tag() == Tag::Builtin {
        if !JIT_BUILTINS.contains(&builtin_ref(head).kind) {
            return Err(CodegenError::Unsupported("builtin outside the compile whitelist"));
        }
    } else {
        return Err(CodegenError::Unsupported("head is not a builtin or compiled function"));
    }

    let mut arg = cdr(body);
    while arg.is_cell() {
        valid_for_compile(func, params, car(arg))?;
        arg = cdr(arg);
    }
    Ok(())
}
