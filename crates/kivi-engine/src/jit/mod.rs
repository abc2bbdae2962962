//! Tiered JIT compiler
//!
//! `freeze` runs the symbol-resolution pre-pass over named functions;
//! `compile` resolves and then lowers the body into the typed "bite" IR,
//! folds constants, counts registers Sethi–Ullman style, and emits native
//! code through an abstract instruction emitter. Functions the front end
//! rejects stay interpreted; JIT-internal failures never reach the user.

pub mod backend;
pub mod codegen;
pub mod display;
pub mod ir;
pub mod optimize;
pub mod resolve;

#[cfg(unix)]
pub mod exec;

use crate::jit::backend::Emitter;
use crate::runtime::errors::RuntimeError;
use crate::runtime::object::{car, cdr, function_ref, function_mut, symbol_name, CompileStage};
use crate::runtime::scope::symbol_lookup;
use crate::runtime::value::{Tag, Value, UNDEFINED};
use crate::runtime::Runtime;

/// Internal compilation errors. Never user-visible: the function stays
/// callable through the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    #[error("unsupported for compilation: {0}")]
    Unsupported(&'static str),
    #[error("native code generation failed")]
    Failure,
}

/// Native entry point of a compiled function: the argument array pointer
/// arrives in the first callee-accessible register, the result returns in
/// the second.
pub type JitEntry = unsafe extern "C" fn(*mut Value) -> Value;

/// Host call-out for `write-char` in compiled code; receives the value in
/// the argument register.
#[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
pub(crate) extern "C" fn jit_write_char(v: Value) {
    crate::runtime::builtins::write_char_value(v);
}

/// `freeze`: run the resolve-symbols pre-pass over each named function.
/// Returns false when any name fails (errors are in the ring).
pub fn freeze_functions(rt: &mut Runtime, scope: Value, args: Value) -> bool {
    for_each_named(rt, scope, args, |rt, scope, name, func| {
        // Already native; its body is an entry point, not an expression.
        if function_ref(func).compiled == CompileStage::Code {
            return true;
        }
        let body = function_ref(func).body;
        if resolve::resolve_symbols(rt, scope, name, func, body) {
            function_mut(func).compiled = CompileStage::Symbols;
            true
        } else {
            false
        }
    })
}

/// `compile`: resolve symbols, then generate native code for each named
/// function. A function the back end rejects keeps its resolved body and
/// stays interpreted.
pub fn compile_functions(rt: &mut Runtime, scope: Value, args: Value) -> bool {
    if !freeze_functions(rt, scope, args) {
        return false;
    }
    for_each_named(rt, scope, args, |rt, scope, name, func| {
        if function_ref(func).compiled == CompileStage::Code {
            return true;
        }
        match compile_one(rt, scope, name, func) {
            Ok(()) => {
                function_mut(func).compiled = CompileStage::Code;
                true
            }
            Err(err) => {
                if rt.options.debug {
                    eprintln!("[debug] compilation of '{}' failed: {err}", symbol_name(name));
                }
                false
            }
        }
    })
}

/// Resolve each argument to a function binding and run `op` over it.
fn for_each_named(
    rt: &mut Runtime,
    scope: Value,
    args: Value,
    mut op: impl FnMut(&mut Runtime, Value, Value, Value) -> bool,
) -> bool {
    let mut ok = true;
    let mut arg = args;
    while arg.is_cell() {
        let name = car(arg);
        if !name.is_symbol() {
            rt.record(RuntimeError::NotASymbol);
            ok = false;
        } else {
            let func = symbol_lookup(scope, name);
            if func == UNDEFINED {
                rt.record(RuntimeError::UndefinedSymbol(symbol_name(name).to_string()));
                ok = false;
            } else if func.tag() != Tag::Function {
                rt.record(RuntimeError::NotAFunction);
                ok = false;
            } else if !op(rt, scope, name, func) {
                ok = false;
            }
        }
        arg = cdr(arg);
    }
    ok
}

#[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
fn compile_one(
    rt: &mut Runtime,
    _scope: Value,
    name: Value,
    func: Value,
) -> Result<(), CodegenError> {
    use self::backend::x86_64::X64Emitter;

    let params = function_ref(func).params;
    let body = function_ref(func).body;
    resolve::valid_for_compile(func, params, body)?;

    let page = exec::CodePage::new(exec::PAGE_SIZE)?;

    // The body slot temporarily holds the page base so self-calls can read
    // their own entry point. Nothing below allocates on the lisp heap, so
    // the collector never observes the repurposed slot.
    function_mut(func).body = Value::from_raw(page.base() as usize);

    let debug = rt.options.debug;
    let result = (|| {
        let mut bites = ir::Bites::new();
        let root = ir::lower(&mut bites, func, params, body, true)?;
        let root = optimize::fold_constants(&mut bites, root);
        optimize::count_registers(&mut bites, root, false);
        if debug {
            eprintln!(
                "[debug] bites for '{}':\n{}",
                symbol_name(name),
                display::dump(&bites, root)
            );
        }

        let mut emitter = X64Emitter::new();
        codegen::generate(&mut emitter, &mut bites, root, jit_write_char as usize)?;
        if debug {
            eprintln!("[debug] compiled '{}' into {} bytes", symbol_name(name), emitter.code().len());
        }
        if emitter.code().len() > exec::PAGE_SIZE {
            return Err(CodegenError::Failure);
        }
        page.fill(emitter.code());
        Ok(())
    })();

    match result {
        Ok(()) => {
            page.protect_exec()?;
            let f = function_mut(func);
            f.jit_mem = page.base();
            rt.jit_pages.push(page);
            Ok(())
        }
        Err(err) => {
            function_mut(func).body = body;
            Err(err)
        }
    }
}

#[cfg(not(all(feature = "jit", unix, target_arch = "x86_64")))]
fn compile_one(
    _rt: &mut Runtime,
    _scope: Value,
    _name: Value,
    _func: Value,
) -> Result<(), CodegenError> {
    Err(CodegenError::Unsupported("no native back end for this target"))
}

/// Invoke a compiled function. The callee scope already holds the evaluated
/// arguments (bound most-recent-first); they are copied into a flat array
/// in parameter-declaration order and control transfers to the entry point.
#[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
pub(crate) fn enter_compiled(func: Value, call_scope: Value) -> Value {
    use crate::runtime::object::list_len;
    use crate::runtime::value::NIL;

    debug_assert_eq!(function_ref(func).compiled, CompileStage::Code);
    let count = list_len(function_ref(func).params);
    let mut argv = vec![NIL; count];

    let mut binding = car(call_scope);
    let mut i = count;
    while binding.is_cell() && i > 0 {
        i -= 1;
        argv[i] = cdr(car(binding));
        binding = cdr(binding);
    }

    let entry = function_ref(func).body.raw() as *const u8;
    // Safety: `body` holds the entry of an RX page produced by compile_one,
    // and argv has exactly the arity the code was generated for.
    unsafe {
        let f: JitEntry = core::mem::transmute(entry);
        f(argv.as_mut_ptr())
    }
}
