//! Value printing
//!
//! Renders proper lists as `(a b c)` and improper tails as `(a . b)`.
//! Compiled functions print opaquely: their `body` slot holds a native
//! entry point and must never be dereferenced as a value.

use super::object::{car, cdr, function_ref, symbol_name, CompileStage};
use super::value::{Tag, Value, NIL, TAIL_CALL, TRUE, UNDEFINED};

/// Render a value to a string.
pub fn format_value(v: Value) -> String {
    let mut out = String::new();
    write_value(&mut out, v);
    out
}

/// Print a value and a trailing newline to stdout.
pub fn print(v: Value) {
    println!("{}", format_value(v));
}

fn write_value(out: &mut String, v: Value) {
    match v.tag() {
        Tag::Int => out.push_str(&v.as_int().to_string()),
        Tag::Symbol => out.push_str(symbol_name(v)),
        Tag::Builtin => out.push_str("<builtin>"),
        Tag::Function => {
            if function_ref(v).compiled == CompileStage::Code {
                out.push_str("<compiled-function>");
            } else {
                out.push_str("<function>");
            }
        }
        Tag::Macro => out.push_str("<macro>"),
        Tag::Const => out.push_str(match v {
            NIL => "nil",
            TRUE => "t",
            UNDEFINED => "<undefined>",
            TAIL_CALL => "<tail-call>",
            _ => "<const>",
        }),
        Tag::Cell => {
            out.push('(');
            let mut item = v;
            loop {
                write_value(out, car(item));
                let rest = cdr(item);
                match rest.tag() {
                    Tag::Cell => {
                        out.push(' ');
                        item = rest;
                    }
                    _ if rest == NIL => break,
                    _ => {
                        out.push_str(" . ");
                        write_value(out, rest);
                        break;
                    }
                }
            }
            out.push(')');
        }
    }
}
