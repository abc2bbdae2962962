//! Builtin functions
//!
//! Builtins receive `(runtime, scope, raw argument list)` and evaluate
//! their own arguments. Errors go to the runtime's error ring and the
//! builtin produces `nil`; there is no unwinding.

use std::io::Write;

use rand::Rng;

use super::errors::{ArgDirection, RuntimeError};
use super::eval::{eval, expand_once};
use super::object::{car, cdr, list_len, symbol_name};
use super::roots::push_roots;
use super::scope::bind_value;
use super::value::{Tag, Value, INT_MAX, NIL, TAIL_CALL, TRUE};
use super::Runtime;

pub use super::object::BuiltinKind;

/// Install every builtin into the global environment.
pub fn install(rt: &mut Runtime) {
    use BuiltinKind as K;
    let table: &[(&str, BuiltinKind, super::object::BuiltinFn)] = &[
        ("+", K::Add, builtin_add),
        ("-", K::Sub, builtin_sub),
        ("<", K::Less, builtin_less),
        ("eq", K::Eq, builtin_eq),
        ("cons", K::Cons, builtin_cons),
        ("car", K::Car, builtin_car),
        ("cdr", K::Cdr, builtin_cdr),
        ("quote", K::Quote, builtin_quote),
        ("list", K::List, builtin_list),
        ("if", K::If, builtin_if),
        ("progn", K::Progn, builtin_progn),
        ("eval", K::Eval, builtin_eval),
        ("apply", K::Apply, builtin_apply),
        ("lambda", K::Lambda, builtin_lambda),
        ("define", K::Define, builtin_define),
        ("defvar", K::Define, builtin_define),
        ("defun", K::Defun, builtin_defun),
        ("defmacro", K::Defmacro, builtin_defmacro),
        ("macroexpand", K::Macroexpand, builtin_macroexpand),
        ("freeze", K::Freeze, builtin_freeze),
        ("compile", K::Compile, builtin_compile),
        ("print", K::Print, builtin_print),
        ("write-char", K::WriteChar, builtin_write_char),
        ("rand", K::Rand, builtin_rand),
        ("load", K::Load, builtin_load),
        ("exit", K::Exit, builtin_exit),
        ("debug", K::Debug, builtin_debug),
    ];
    for &(name, kind, f) in table {
        rt.install_builtin(name, kind, f);
    }
}

/// Check an exact argument count, recording the mismatch direction.
fn check_arity(rt: &mut Runtime, callee: &str, args: Value, expected: usize) -> bool {
    let actual = list_len(args);
    if actual == expected {
        return true;
    }
    rt.record(RuntimeError::ArgCountMismatch {
        callee: callee.to_string(),
        expected,
        actual,
        direction: if actual < expected {
            ArgDirection::TooFew
        } else {
            ArgDirection::TooMany
        },
    });
    false
}

fn eval_int(rt: &mut Runtime, scope: Value, expr: Value) -> Option<i64> {
    let v = eval(rt, scope, expr);
    if v.is_int() {
        Some(v.as_int())
    } else {
        rt.record(RuntimeError::NotANumber);
        None
    }
}

fn builtin_add(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if args == NIL {
        rt.record(RuntimeError::ArgCountMismatch {
            callee: "+".to_string(),
            expected: 1,
            actual: 0,
            direction: ArgDirection::TooFew,
        });
        return NIL;
    }
    let mut scope = scope;
    let mut arg = args;
    push_roots!(rt, scope, arg);

    let mut sum: i64 = 0;
    while arg.is_cell() {
        match eval_int(rt, scope, car(arg)) {
            Some(n) => sum = sum.wrapping_add(n),
            None => return NIL,
        }
        arg = cdr(arg);
    }
    Value::int(sum)
}

fn builtin_sub(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if args == NIL {
        rt.record(RuntimeError::ArgCountMismatch {
            callee: "-".to_string(),
            expected: 1,
            actual: 0,
            direction: ArgDirection::TooFew,
        });
        return NIL;
    }
    let mut scope = scope;
    let mut arg = args;
    push_roots!(rt, scope, arg);

    let head = match eval_int(rt, scope, car(arg)) {
        Some(n) => n,
        None => return NIL,
    };
    arg = cdr(arg);
    if arg == NIL {
        // Single argument negates.
        return Value::int(head.wrapping_neg());
    }
    let mut result = head;
    while arg.is_cell() {
        match eval_int(rt, scope, car(arg)) {
            Some(n) => result = result.wrapping_sub(n),
            None => return NIL,
        }
        arg = cdr(arg);
    }
    Value::int(result)
}

fn builtin_less(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "<", args, 2) {
        return NIL;
    }
    let mut scope = scope;
    let mut args = args;
    push_roots!(rt, scope, args);

    let lhs = match eval_int(rt, scope, car(args)) {
        Some(n) => n,
        None => return NIL,
    };
    let rhs = match eval_int(rt, scope, car(cdr(args))) {
        Some(n) => n,
        None => return NIL,
    };
    if lhs < rhs {
        TRUE
    } else {
        NIL
    }
}

fn builtin_eq(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "eq", args, 2) {
        return NIL;
    }
    let mut scope = scope;
    let mut args = args;
    let mut lhs = NIL;
    push_roots!(rt, scope, args, lhs);

    lhs = eval(rt, scope, car(args));
    let rhs = eval(rt, scope, car(cdr(args)));
    // Object identity: integers by value, heap objects by pointer. The
    // forwarding pointer keeps identities unique across collections.
    if lhs == rhs {
        TRUE
    } else {
        NIL
    }
}

fn builtin_cons(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "cons", args, 2) {
        return NIL;
    }
    let mut scope = scope;
    let mut args = args;
    let mut head = NIL;
    push_roots!(rt, scope, args, head);

    head = eval(rt, scope, car(args));
    let tail = eval(rt, scope, car(cdr(args)));
    rt.cons(head, tail)
}

fn builtin_car(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "car", args, 1) {
        return NIL;
    }
    let v = eval(rt, scope, car(args));
    if v.is_cell() {
        car(v)
    } else {
        rt.record(RuntimeError::NotAList);
        NIL
    }
}

fn builtin_cdr(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "cdr", args, 1) {
        return NIL;
    }
    let v = eval(rt, scope, car(args));
    if v.is_cell() {
        cdr(v)
    } else {
        rt.record(RuntimeError::NotAList);
        NIL
    }
}

fn builtin_quote(rt: &mut Runtime, _scope: Value, args: Value) -> Value {
    if !check_arity(rt, "quote", args, 1) {
        return NIL;
    }
    car(args)
}

fn builtin_list(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    let mut scope = scope;
    let mut arg = args;
    let mut head = NIL;
    let mut tail = NIL;
    push_roots!(rt, scope, arg, head, tail);

    while arg.is_cell() {
        let value = eval(rt, scope, car(arg));
        let cell = rt.cons(value, NIL);
        if head == NIL {
            head = cell;
        } else {
            super::object::set_cdr(tail, cell);
        }
        tail = cell;
        arg = cdr(arg);
    }
    head
}

fn builtin_if(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "if", args, 3) {
        return NIL;
    }
    let mut scope = scope;
    let mut args = args;
    push_roots!(rt, scope, args);

    let cond = eval(rt, scope, car(args));
    let winner = if cond.is_truthy() {
        car(cdr(args))
    } else {
        car(cdr(cdr(args)))
    };
    // Never evaluate the winning branch here: hand it to the evaluator's
    // dispatch loop so tail recursion stays in bounded native stack.
    rt.set_tail(winner, scope);
    TAIL_CALL
}

fn builtin_progn(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if args == NIL {
        return NIL;
    }
    let mut scope = scope;
    let mut arg = args;
    push_roots!(rt, scope, arg);

    while arg.is_cell() && cdr(arg).is_cell() {
        eval(rt, scope, car(arg));
        arg = cdr(arg);
    }
    rt.set_tail(car(arg), scope);
    TAIL_CALL
}

fn builtin_eval(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "eval", args, 1) {
        return NIL;
    }
    let mut scope = scope;
    push_roots!(rt, scope);
    let form = eval(rt, scope, car(args));
    eval(rt, scope, form)
}

fn builtin_apply(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "apply", args, 2) {
        return NIL;
    }
    let mut scope = scope;
    let mut args = args;
    let mut func = NIL;
    push_roots!(rt, scope, args, func);

    func = eval(rt, scope, car(args));
    let list = eval(rt, scope, car(cdr(args)));
    if list != NIL && !list.is_cell() {
        rt.record(RuntimeError::NotAList);
        return NIL;
    }
    let form = rt.cons(func, list);
    eval(rt, scope, form)
}

fn builtin_lambda(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "lambda", args, 2) {
        return NIL;
    }
    rt.make_function(car(args), car(cdr(args)), scope, Tag::Function)
}

fn builtin_define(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "define", args, 2) {
        return NIL;
    }
    let mut scope = scope;
    let mut args = args;
    push_roots!(rt, scope, args);

    let name = car(args);
    if !name.is_symbol() {
        rt.record(RuntimeError::NotASymbol);
        return NIL;
    }
    let mut value = eval(rt, scope, car(cdr(args)));
    push_roots!(rt, value);
    bind_value(rt, scope, car(args), value);
    value
}

fn define_callable(rt: &mut Runtime, scope: Value, args: Value, tag: Tag, callee: &str) -> Value {
    if !check_arity(rt, callee, args, 3) {
        return NIL;
    }
    let mut scope = scope;
    let mut args = args;
    push_roots!(rt, scope, args);

    let name = car(args);
    if !name.is_symbol() {
        rt.record(RuntimeError::NotASymbol);
        return NIL;
    }
    let mut func = rt.make_function(car(cdr(args)), car(cdr(cdr(args))), scope, tag);
    push_roots!(rt, func);
    bind_value(rt, scope, car(args), func);
    func
}

fn builtin_defun(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    define_callable(rt, scope, args, Tag::Function, "defun")
}

fn builtin_defmacro(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    define_callable(rt, scope, args, Tag::Macro, "defmacro")
}

fn builtin_macroexpand(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "macroexpand", args, 2) {
        return NIL;
    }
    let mut scope = scope;
    let mut args = args;
    let mut mac = NIL;
    push_roots!(rt, scope, args, mac);

    // Double-evaluate like `eval`: `'name` yields the symbol, the second
    // round resolves it to the macro object.
    mac = eval(rt, scope, car(args));
    mac = eval(rt, scope, mac);
    if mac.tag() != Tag::Macro {
        rt.record(RuntimeError::NotAMacro);
        return NIL;
    }
    let arglist = eval(rt, scope, car(cdr(args)));
    // Expand once without re-evaluating the expansion.
    expand_once(rt, scope, mac, arglist, "macroexpand")
}

fn builtin_freeze(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if crate::jit::freeze_functions(rt, scope, args) {
        TRUE
    } else {
        NIL
    }
}

fn builtin_compile(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if crate::jit::compile_functions(rt, scope, args) {
        TRUE
    } else {
        NIL
    }
}

fn builtin_print(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "print", args, 1) {
        return NIL;
    }
    let v = eval(rt, scope, car(args));
    super::print::print(v);
    NIL
}

/// Write one character for an integer code point. Shared with the JIT's
/// host call-out.
pub(crate) fn write_char_value(v: Value) {
    if !v.is_int() {
        return;
    }
    let c = char::from_u32(v.as_int() as u32).unwrap_or('?');
    let mut out = std::io::stdout();
    let _ = write!(out, "{c}");
    let _ = out.flush();
}

fn builtin_write_char(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "write-char", args, 1) {
        return NIL;
    }
    let v = eval(rt, scope, car(args));
    if !v.is_int() {
        rt.record(RuntimeError::NotANumber);
        return NIL;
    }
    write_char_value(v);
    NIL
}

fn builtin_rand(rt: &mut Runtime, _scope: Value, args: Value) -> Value {
    if !check_arity(rt, "rand", args, 0) {
        return NIL;
    }
    let n = rand::thread_rng().gen::<u64>() & INT_MAX as u64;
    Value::int(n as i64)
}

fn builtin_load(rt: &mut Runtime, scope: Value, args: Value) -> Value {
    if !check_arity(rt, "load", args, 1) {
        return NIL;
    }
    let v = eval(rt, scope, car(args));
    if !v.is_symbol() {
        rt.record(RuntimeError::NotASymbol);
        return NIL;
    }
    let path = symbol_name(v).to_string();
    rt.load_file(&path)
}

fn builtin_exit(rt: &mut Runtime, _scope: Value, _args: Value) -> Value {
    rt.running = false;
    NIL
}

fn builtin_debug(rt: &mut Runtime, _scope: Value, _args: Value) -> Value {
    rt.options.debug = !rt.options.debug;
    if rt.options.debug {
        TRUE
    } else {
        NIL
    }
}
