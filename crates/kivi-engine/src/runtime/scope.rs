//! Lexical scope chain
//!
//! A scope is a cons cell whose `car` is the innermost bindings list (a list
//! of `(symbol . value)` pairs, most recent first) and whose `cdr` is the
//! parent scope. Binding always prepends; shadowing falls out of lookup
//! order, so a matching binding in the same frame is never overwritten.

use super::object::{car, cdr, set_car};
use super::roots::push_roots;
use super::value::{Value, NIL, UNDEFINED};
use super::Runtime;

/// Create a child scope of `parent`.
pub fn new_scope(rt: &mut Runtime, parent: Value) -> Value {
    rt.cons(NIL, parent)
}

/// Prepend a `(sym . value)` binding to the innermost frame of `scope`.
pub fn bind_value(rt: &mut Runtime, scope: Value, sym: Value, value: Value) {
    let mut scope = scope;
    let mut pair = NIL;
    push_roots!(rt, scope, pair);

    pair = rt.cons(sym, value);
    let bindings = rt.cons(pair, car(scope));
    set_car(scope, bindings);
}

/// Walk frames outward and bindings inward; the first match wins.
/// Returns `UNDEFINED` when the symbol is not bound.
pub fn symbol_lookup(scope: Value, sym: Value) -> Value {
    let mut frame = scope;
    while frame.is_cell() {
        let mut binding = car(frame);
        while binding.is_cell() {
            let pair = car(binding);
            if car(pair) == sym {
                return cdr(pair);
            }
            binding = cdr(binding);
        }
        frame = cdr(frame);
    }
    UNDEFINED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::symbols::intern;
    use crate::runtime::RuntimeOptions;

    #[test]
    fn test_bind_and_lookup() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let scope = new_scope(&mut rt, NIL);
        let x = intern(&mut rt, "x");

        assert_eq!(symbol_lookup(scope, x), UNDEFINED);
        bind_value(&mut rt, scope, x, Value::int(10));
        assert_eq!(symbol_lookup(scope, x), Value::int(10));
    }

    #[test]
    fn test_shadowing_is_lookup_order() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let scope = new_scope(&mut rt, NIL);
        let x = intern(&mut rt, "x");

        bind_value(&mut rt, scope, x, Value::int(1));
        bind_value(&mut rt, scope, x, Value::int(2));
        // Bindings are prepended, never overwritten; the latest wins.
        assert_eq!(symbol_lookup(scope, x), Value::int(2));
    }

    #[test]
    fn test_inner_scope_shadows_outer() {
        let mut rt = Runtime::new(RuntimeOptions::default());
        let outer = new_scope(&mut rt, NIL);
        let x = intern(&mut rt, "x");
        let y = intern(&mut rt, "y");
        bind_value(&mut rt, outer, x, Value::int(1));
        bind_value(&mut rt, outer, y, Value::int(9));

        let inner = new_scope(&mut rt, outer);
        bind_value(&mut rt, inner, x, Value::int(2));

        assert_eq!(symbol_lookup(inner, x), Value::int(2));
        assert_eq!(symbol_lookup(inner, y), Value::int(9));
        assert_eq!(symbol_lookup(outer, x), Value::int(1));
    }
}
