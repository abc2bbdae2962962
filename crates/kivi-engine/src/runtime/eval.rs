//! The evaluator
//!
//! A single dispatch loop: self-evaluating values break out immediately,
//! symbols go through the scope chain, and cells are applications. The
//! loop doubles as the tail-call trampoline: `if` and `progn` return the
//! tail-call marker instead of evaluating their winning expression, and
//! user-function application continues on the body in the callee scope, so
//! tail-recursive interpreted code runs in bounded native stack.

use super::errors::{ArgDirection, RuntimeError};
use super::object::{builtin_ref, car, cdr, function_ref, list_len, symbol_name};
use super::print::format_value;
use super::roots::push_roots;
use super::scope::{bind_value, new_scope, symbol_lookup};
use super::value::{Tag, Value, NIL, TAIL_CALL, UNDEFINED};
use super::Runtime;

#[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
use super::object::CompileStage;

/// How an application continues.
enum Flow {
    /// A finished value.
    Done(Value),
    /// Keep evaluating `(expr, scope)` in the same native frame.
    Tail(Value, Value),
}

/// Evaluate `expr` in `scope`.
pub fn eval(rt: &mut Runtime, scope: Value, expr: Value) -> Value {
    let mut scope = scope;
    let mut expr = expr;
    // The loop locals live across arbitrary allocations; rooting them here
    // keeps them current through every collection.
    push_roots!(rt, scope, expr);

    rt.eval_depth += 1;
    let result = loop {
        trace(rt, "eval", expr);
        match expr.tag() {
            Tag::Int | Tag::Const | Tag::Builtin | Tag::Function | Tag::Macro => break expr,

            Tag::Symbol => {
                let value = symbol_lookup(scope, expr);
                if value == UNDEFINED {
                    let name = symbol_name(expr).to_string();
                    rt.record(RuntimeError::UndefinedSymbol(name));
                    break NIL;
                }
                break value;
            }

            Tag::Cell => {
                let head = eval(rt, scope, car(expr));
                match head.tag() {
                    Tag::Builtin => {
                        let f = builtin_ref(head).f;
                        let result = f(rt, scope, cdr(expr));
                        if result == TAIL_CALL {
                            expr = rt.tail_expr;
                            scope = rt.tail_scope;
                            continue;
                        }
                        break result;
                    }
                    Tag::Macro => {
                        // Expand once, then re-evaluate the expansion in the
                        // current scope.
                        expr = expand_macro(rt, scope, head, expr);
                        continue;
                    }
                    Tag::Function => match apply_function(rt, scope, head, expr) {
                        Flow::Done(value) => break value,
                        Flow::Tail(body, callee_scope) => {
                            expr = body;
                            scope = callee_scope;
                            continue;
                        }
                    },
                    _ => {
                        rt.record(RuntimeError::NotAFunction);
                        break NIL;
                    }
                }
            }
        }
    };
    trace(rt, "=>", result);
    rt.eval_depth -= 1;
    result
}

/// Apply a user function: child scope of the captured environment (or the
/// caller's scope when none was captured), arguments evaluated left to
/// right in the caller's scope and bound positionally.
fn apply_function(rt: &mut Runtime, caller_scope: Value, func: Value, expr: Value) -> Flow {
    let mut func = func;
    let mut caller_scope = caller_scope;
    let mut expr = expr;
    let mut call_scope = NIL;
    push_roots!(rt, func, caller_scope, expr, call_scope);

    let captured = function_ref(func).env;
    let parent = if captured == NIL { caller_scope } else { captured };
    call_scope = new_scope(rt, parent);

    let mut param = function_ref(func).params;
    let mut arg = cdr(expr);
    push_roots!(rt, param, arg);

    while param.is_cell() && arg.is_cell() {
        let value = eval(rt, caller_scope, car(arg));
        bind_value(rt, call_scope, car(param), value);
        param = cdr(param);
        arg = cdr(arg);
    }

    if param != NIL || arg != NIL {
        let expected = list_len(function_ref(func).params);
        let actual = list_len(cdr(expr));
        let direction = if param != NIL {
            ArgDirection::TooFew
        } else {
            ArgDirection::TooMany
        };
        rt.record(RuntimeError::ArgCountMismatch {
            callee: callee_name(expr),
            expected,
            actual,
            direction,
        });
        return Flow::Done(NIL);
    }

    #[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
    if function_ref(func).compiled == CompileStage::Code {
        return Flow::Done(crate::jit::enter_compiled(func, call_scope));
    }

    Flow::Tail(function_ref(func).body, call_scope)
}

/// Bind the macro's parameters to the unevaluated argument expressions in a
/// fresh child of the current scope and evaluate the body there once.
fn expand_macro(rt: &mut Runtime, scope: Value, mac: Value, expr: Value) -> Value {
    let callee = callee_name(expr);
    expand_once(rt, scope, mac, cdr(expr), &callee)
}

/// One macro expansion step; shared between application dispatch and the
/// `macroexpand` builtin (which does not re-evaluate the result).
pub(crate) fn expand_once(
    rt: &mut Runtime,
    scope: Value,
    mac: Value,
    args: Value,
    callee: &str,
) -> Value {
    let mut mac = mac;
    let mut scope = scope;
    let mut args = args;
    let mut expand_scope = NIL;
    push_roots!(rt, mac, scope, args, expand_scope);

    expand_scope = new_scope(rt, scope);

    let mut param = function_ref(mac).params;
    let mut arg = args;
    push_roots!(rt, param, arg);

    while param.is_cell() && arg.is_cell() {
        bind_value(rt, expand_scope, car(param), car(arg));
        param = cdr(param);
        arg = cdr(arg);
    }

    // Arity is strict: arguments are never silently dropped or padded.
    if param != NIL || arg != NIL {
        let expected = list_len(function_ref(mac).params);
        let actual = list_len(args);
        let direction = if param != NIL {
            ArgDirection::TooFew
        } else {
            ArgDirection::TooMany
        };
        rt.record(RuntimeError::ArgCountMismatch {
            callee: callee.to_string(),
            expected,
            actual,
            direction,
        });
        return NIL;
    }

    eval(rt, expand_scope, function_ref(mac).body)
}

/// Name the callee for argument-count diagnostics.
fn callee_name(expr: Value) -> String {
    let head = car(expr);
    if head.is_symbol() {
        symbol_name(head).to_string()
    } else {
        "<function>".to_string()
    }
}

/// `-s` stack tracing (debug builds only). Purely diagnostic.
fn trace(rt: &Runtime, what: &str, v: Value) {
    if cfg!(debug_assertions) && rt.options.stack_trace {
        eprintln!("[{:>3}]{} {} {}", rt.eval_depth, "  ".repeat(rt.eval_depth.min(20)), what, format_value(v));
    }
}
