//! Symbol interning
//!
//! Symbols are interned through a linear scan of a heap-resident cons list
//! rooted in the runtime, so symbol identity is pointer identity: two
//! symbols with equal names are the same object, and names are immutable.

use super::object::{car, cdr, symbol_name};
use super::value::{Tag, Value, NIL};
use super::Runtime;

/// Longest accepted symbol name in bytes (enforced by the reader).
pub const MAX_SYMBOL_LEN: usize = 1024;

/// Intern `name`, allocating a new symbol on first sight.
pub fn intern(rt: &mut Runtime, name: &str) -> Value {
    debug_assert!(!name.is_empty() && name.len() <= MAX_SYMBOL_LEN);

    let mut entry = rt.symbols;
    while entry != NIL {
        let sym = car(entry);
        if symbol_name(sym) == name {
            return sym;
        }
        entry = cdr(entry);
    }

    let sym = alloc_symbol(rt, name);
    rt.symbols = rt.cons(sym, rt.symbols);
    sym
}

fn alloc_symbol(rt: &mut Runtime, name: &str) -> Value {
    let size = core::mem::size_of::<super::object::Header>() + name.len() + 1;
    let ptr = rt.alloc(size, Tag::Symbol);
    unsafe {
        let dst = ptr.add(core::mem::size_of::<super::object::Header>());
        core::ptr::copy_nonoverlapping(name.as_ptr(), dst, name.len());
        *dst.add(name.len()) = 0;
    }
    Value::from_ptr(ptr, Tag::Symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeOptions;

    #[test]
    fn test_interning_is_identity() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let a = intern(&mut rt, "foo");
        let b = intern(&mut rt, "foo");
        let c = intern(&mut rt, "bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(symbol_name(a), "foo");
    }

    #[test]
    fn test_interning_survives_collection() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let before = intern(&mut rt, "stable");
        rt.collect();
        let after = intern(&mut rt, "stable");
        // The symbol moved, but interning still resolves to the one object.
        assert_eq!(symbol_name(after), "stable");
        assert_eq!(after, intern(&mut rt, "stable"));
        let _ = before; // the old word is stale after the collection
    }

    #[test]
    fn test_long_names() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let name = "x".repeat(MAX_SYMBOL_LEN);
        let sym = intern(&mut rt, &name);
        assert_eq!(symbol_name(sym), name);
    }
}
