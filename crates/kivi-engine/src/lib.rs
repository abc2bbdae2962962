//! Kivi Language Engine
//!
//! This crate provides the complete Kivi language implementation:
//! - **Reader**: logos-based S-expression reader (`reader` module)
//! - **Runtime**: tagged values, semi-space copying GC, scopes, evaluator,
//!   and builtins (`runtime` module)
//! - **JIT**: typed "bite" IR, constant folding, register counting, and a
//!   pluggable native-code back end (`jit` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use kivi_engine::{Runtime, RuntimeOptions};
//!
//! let mut rt = Runtime::new(RuntimeOptions::default());
//! let result = rt.eval_str("(+ 1 2 3)");
//! assert_eq!(result.as_int(), 6);
//! ```

#![warn(rust_2018_idioms)]

/// Runtime module: value model, heap, GC, scopes, evaluator, builtins
pub mod runtime;

/// Reader module: lexer and S-expression reader
pub mod reader;

/// JIT compilation module: bite IR, optimizer, back end
pub mod jit;

pub use reader::Reader;
pub use runtime::errors::RuntimeError;
pub use runtime::value::Value;
pub use runtime::{Runtime, RuntimeOptions};
