//! Kivi runtime
//!
//! The [`Runtime`] owns every piece of process-wide state the interpreter
//! needs: the semi-space heap, the root-frame chain, the interned symbol
//! list, the global environment, the tail-call slots, the error ring, and
//! the JIT page list. It is passed `&mut` to the evaluator and every
//! builtin; there are no globals.

pub mod builtins;
pub mod errors;
pub mod eval;
pub mod gc;
pub mod heap;
pub mod object;
pub mod print;
pub mod roots;
pub mod scope;
pub mod symbols;
pub mod value;

use errors::{ErrorRing, RuntimeError};
use heap::Heap;
use object::{Builtin, BuiltinFn, BuiltinKind, Cell, CompileStage, Function, Header};
use roots::{push_roots, RootSet};
use value::{Tag, Value, NIL, TRUE};

/// Tunables fixed at startup (except `debug`, which the `debug` builtin
/// toggles at run time).
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Total arena size in bytes (two semi-spaces).
    pub heap_size: usize,
    /// Live-set percentage of a semi-space above which the next collection
    /// grows the heap. Clamped to 1..=99.
    pub grow_threshold: u8,
    /// Log each collection to stderr.
    pub gc_verbose: bool,
    /// Debug logging.
    pub debug: bool,
    /// Print each evaluation with a depth marker (debug builds).
    pub stack_trace: bool,
    /// Echo parsed input (used by the REPL).
    pub echo: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            heap_size: 1024 * 1024,
            grow_threshold: 75,
            gc_verbose: false,
            debug: false,
            stack_trace: false,
            echo: false,
        }
    }
}

/// Statistics from past collections.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    /// Number of collections so far.
    pub collections: usize,
    /// Bytes freed by the last collection.
    pub last_freed: usize,
    /// Live bytes after the last collection.
    pub last_live: usize,
}

/// The interpreter state. Single-threaded by design: evaluation is a
/// straight-line loop and a collection is one atomic step between
/// allocations.
pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) roots: RootSet,
    /// Interned symbol list (a heap cons list; GC root).
    pub(crate) symbols: Value,
    /// The global environment (outermost scope; GC root).
    pub(crate) globals: Value,
    /// Pending tail-call expression, valid right after a builtin returns
    /// the tail-call marker (GC root).
    pub(crate) tail_expr: Value,
    /// Scope paired with `tail_expr` (GC root).
    pub(crate) tail_scope: Value,
    /// Recorded user-visible errors.
    pub errors: ErrorRing,
    /// Startup options and toggleable flags.
    pub options: RuntimeOptions,
    /// Cleared by the `exit` builtin.
    pub running: bool,
    pub(crate) eval_depth: usize,
    stats: GcStats,
    #[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
    pub(crate) jit_pages: Vec<crate::jit::exec::CodePage>,
}

impl Runtime {
    /// Create a runtime with its global environment and builtins installed.
    pub fn new(mut options: RuntimeOptions) -> Runtime {
        options.grow_threshold = options.grow_threshold.clamp(1, 99);
        let mut rt = Runtime {
            heap: Heap::new(options.heap_size),
            roots: RootSet::new(),
            symbols: NIL,
            globals: NIL,
            tail_expr: NIL,
            tail_scope: NIL,
            errors: ErrorRing::new(),
            options,
            running: true,
            eval_depth: 0,
            stats: GcStats::default(),
            #[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
            jit_pages: Vec::new(),
        };
        rt.globals = rt.cons(NIL, NIL);
        rt.bind_global("nil", NIL);
        rt.bind_global("t", TRUE);
        builtins::install(&mut rt);
        rt
    }

    /// The global environment.
    pub fn global_scope(&self) -> Value {
        self.globals
    }

    /// Evaluate a single expression in the global scope.
    pub fn eval(&mut self, expr: Value) -> Value {
        let scope = self.globals;
        eval::eval(self, scope, expr)
    }

    /// Read and evaluate every expression in `src`; returns the last value
    /// (`nil` when `src` holds none).
    pub fn eval_str(&mut self, src: &str) -> Value {
        let mut reader = crate::reader::Reader::new(src);
        let mut last = NIL;
        // Rooted: the next read allocates while the previous value is held.
        push_roots!(self, last);
        while let Some(expr) = reader.read(self) {
            last = self.eval(expr);
            if !self.running {
                break;
            }
        }
        last
    }

    /// Read and evaluate a file in the global scope. A failure to open the
    /// file is recorded as `FileOpenError` and yields `nil`.
    pub fn load_file(&mut self, path: &str) -> Value {
        match std::fs::read_to_string(path) {
            Ok(source) => self.eval_str(&source),
            Err(err) => {
                self.record(RuntimeError::FileOpenError {
                    code: err.raw_os_error().unwrap_or(-1),
                    message: err.to_string(),
                });
                NIL
            }
        }
    }

    /// Intern a symbol.
    pub fn intern(&mut self, name: &str) -> Value {
        symbols::intern(self, name)
    }

    /// Allocate a cons cell. The arguments are rooted across the
    /// allocation, so callers only root values they keep using afterwards.
    pub fn cons(&mut self, car: Value, cdr: Value) -> Value {
        let mut car = car;
        let mut cdr = cdr;
        push_roots!(self, car, cdr);
        let ptr = self.alloc(core::mem::size_of::<Cell>(), Tag::Cell);
        unsafe {
            let cell = ptr as *mut Cell;
            (*cell).car = car;
            (*cell).cdr = cdr;
        }
        Value::from_ptr(ptr, Tag::Cell)
    }

    /// Allocate a user function (or macro, per `tag`) capturing `env`.
    pub fn make_function(&mut self, params: Value, body: Value, env: Value, tag: Tag) -> Value {
        debug_assert!(matches!(tag, Tag::Function | Tag::Macro));
        let mut params = params;
        let mut body = body;
        let mut env = env;
        push_roots!(self, params, body, env);
        let ptr = self.alloc(core::mem::size_of::<Function>(), tag);
        unsafe {
            let func = ptr as *mut Function;
            (*func).params = params;
            (*func).body = body;
            (*func).env = env;
            (*func).jit_mem = core::ptr::null_mut();
            (*func).compiled = CompileStage::None;
        }
        Value::from_ptr(ptr, tag)
    }

    fn make_builtin(&mut self, kind: BuiltinKind, f: BuiltinFn) -> Value {
        let ptr = self.alloc(core::mem::size_of::<Builtin>(), Tag::Builtin);
        unsafe {
            let b = ptr as *mut Builtin;
            (*b).f = f;
            (*b).kind = kind;
        }
        Value::from_ptr(ptr, Tag::Builtin)
    }

    pub(crate) fn install_builtin(&mut self, name: &str, kind: BuiltinKind, f: BuiltinFn) {
        let b = self.make_builtin(kind, f);
        self.bind_global(name, b);
    }

    fn bind_global(&mut self, name: &str, value: Value) {
        let mut value = value;
        push_roots!(self, value);
        let sym = self.intern(name);
        let globals = self.globals;
        scope::bind_value(self, globals, sym, value);
    }

    /// Bump-allocate an object and stamp its header. Runs a collection on
    /// exhaustion, growing the arena once if the collection was not enough;
    /// a request that still does not fit afterwards is fatal.
    pub(crate) fn alloc(&mut self, size: usize, tag: Tag) -> *mut u8 {
        let ptr = match self.heap.try_alloc(size) {
            Some(ptr) => ptr,
            None => {
                self.collect();
                match self.heap.try_alloc(size) {
                    Some(ptr) => ptr,
                    None => {
                        self.heap.request_grow();
                        self.collect();
                        self.heap.try_alloc(size).unwrap_or_else(|| {
                            eprintln!("kivi: out of memory after growing the heap");
                            std::process::abort();
                        })
                    }
                }
            }
        };
        unsafe {
            core::ptr::write(ptr as *mut Header, Header::new(tag));
        }
        ptr
    }

    /// Run a stop-and-copy collection now.
    pub fn collect(&mut self) {
        let used_before = self.heap.used();
        let grew = self.heap.grow_pending();

        let old = self.heap.begin_collect();
        let scan_base = self.heap.bump_ptr();

        self.symbols = gc::evacuate(&mut self.heap, self.symbols);
        self.globals = gc::evacuate(&mut self.heap, self.globals);
        self.tail_expr = gc::evacuate(&mut self.heap, self.tail_expr);
        self.tail_scope = gc::evacuate(&mut self.heap, self.tail_scope);

        // The frame chain lists pointers to stack locals; rewrite them in
        // place so every rooted local observes the new location.
        let heap = &mut self.heap as *mut Heap;
        unsafe {
            self.roots
                .for_each_slot(|slot| *slot = gc::evacuate(&mut *heap, *slot));
        }

        gc::scan(&mut self.heap, scan_base);
        self.heap.finish_collect(old);

        let live = self.heap.used();
        if live * 100 > self.heap.semi_size() * self.options.grow_threshold as usize {
            self.heap.request_grow();
        }

        self.stats.collections += 1;
        self.stats.last_freed = used_before.saturating_sub(live);
        self.stats.last_live = live;

        if self.options.gc_verbose {
            eprintln!(
                "[gc] #{}: {} bytes before, {} live ({}%), {} freed{}",
                self.stats.collections,
                used_before,
                live,
                live * 100 / self.heap.semi_size(),
                self.stats.last_freed,
                if grew { ", grew" } else { "" }
            );
        }
    }

    /// Stash the pending tail call for the evaluator's dispatch loop.
    pub(crate) fn set_tail(&mut self, expr: Value, scope: Value) {
        self.tail_expr = expr;
        self.tail_scope = scope;
    }

    /// Record a user-visible error.
    pub fn record(&mut self, err: RuntimeError) {
        if self.options.debug {
            eprintln!("[debug] error recorded: {err}");
        }
        self.errors.record(err);
    }

    /// Take all accumulated errors.
    pub fn drain_errors(&mut self) -> Vec<RuntimeError> {
        self.errors.drain()
    }

    /// Bytes live in the active semi-space (observable for tests and the
    /// GC idempotence property).
    pub fn heap_used(&self) -> usize {
        self.heap.used()
    }

    /// Collection statistics.
    pub fn gc_stats(&self) -> GcStats {
        self.stats
    }

    /// Unmap all JIT pages. Also happens on drop.
    pub fn jit_free(&mut self) {
        #[cfg(all(feature = "jit", unix, target_arch = "x86_64"))]
        self.jit_pages.clear();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.jit_free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_boots_with_globals() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let nil_sym = rt.intern("nil");
        let t_sym = rt.intern("t");
        assert_eq!(scope::symbol_lookup(rt.global_scope(), nil_sym), NIL);
        assert_eq!(scope::symbol_lookup(rt.global_scope(), t_sym), TRUE);
    }

    #[test]
    fn test_cons_car_cdr() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let pair = rt.cons(Value::int(1), Value::int(2));
        assert_eq!(object::car(pair), Value::int(1));
        assert_eq!(object::cdr(pair), Value::int(2));
    }

    #[test]
    fn test_collection_preserves_rooted_structure() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let inner = rt.cons(Value::int(2), NIL);
        let mut list = rt.cons(Value::int(1), inner);
        push_roots!(rt, list);

        rt.collect();

        assert_eq!(object::car(list), Value::int(1));
        assert_eq!(object::car(object::cdr(list)), Value::int(2));
    }

    #[test]
    fn test_collection_is_idempotent() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let mut keep = rt.cons(Value::int(1), NIL);
        push_roots!(rt, keep);

        rt.collect();
        let used_once = rt.heap_used();
        rt.collect();
        assert_eq!(rt.heap_used(), used_once);
    }

    #[test]
    fn test_garbage_is_reclaimed() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let baseline = {
            rt.collect();
            rt.heap_used()
        };
        for i in 0..1000 {
            rt.cons(Value::int(i), NIL);
        }
        assert!(rt.heap_used() >= baseline + 1000 * 24);
        rt.collect();
        // All thousand cells were unreachable.
        assert!(rt.heap_used() <= baseline + 24);
    }

    #[test]
    fn test_heap_grows_under_pressure() {
        let mut rt = Runtime::new(RuntimeOptions {
            heap_size: heap::MIN_HEAP_SIZE,
            ..RuntimeOptions::default()
        });
        let semi_before = rt.heap.semi_size();

        // Keep a growing rooted list until the live set forces a doubling.
        let mut list = NIL;
        push_roots!(rt, list);
        for i in 0..400 {
            list = rt.cons(Value::int(i), list);
        }
        assert!(rt.heap.semi_size() > semi_before);

        // The whole list survived the moves.
        let mut n = 0;
        let mut v = list;
        while v != NIL {
            n += 1;
            v = object::cdr(v);
        }
        assert_eq!(n, 400);
    }
}
