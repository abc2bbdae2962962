//! Error taxonomy and the bounded error ring
//!
//! There is no unwinding: evaluation of an offending expression records the
//! error and produces `nil`. The REPL prints and drains the ring after each
//! top-level value.

use std::collections::VecDeque;

/// Which way an argument count was off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgDirection {
    TooFew,
    TooMany,
}

impl std::fmt::Display for ArgDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgDirection::TooFew => write!(f, "too few"),
            ArgDirection::TooMany => write!(f, "too many"),
        }
    }
}

/// The closed set of user-visible runtime errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("undefined symbol: {0}")]
    UndefinedSymbol(String),

    #[error("not a number")]
    NotANumber,

    #[error("not a list")]
    NotAList,

    #[error("not a symbol")]
    NotASymbol,

    #[error("not a function")]
    NotAFunction,

    #[error("not a macro")]
    NotAMacro,

    #[error("{callee}: {direction} arguments, expected {expected}, got {actual}")]
    ArgCountMismatch {
        callee: String,
        expected: usize,
        actual: usize,
        direction: ArgDirection,
    },

    /// Raised only by the reader for literals outside the 62-bit range.
    #[error("integer literal out of range")]
    IntegerOverflow,

    /// Raised only by the reader.
    #[error("symbol name too long")]
    SymbolNameTooLong,

    /// Raised only by the reader.
    #[error("malformed input")]
    MalformedInput,

    #[error("cannot open file: {message} (os error {code})")]
    FileOpenError { code: i32, message: String },
}

/// Capacity of the error ring.
pub const ERROR_RING_CAPACITY: usize = 16;

/// Bounded ring of recorded errors. When full, the oldest entry is dropped.
#[derive(Default)]
pub struct ErrorRing {
    entries: VecDeque<RuntimeError>,
}

impl ErrorRing {
    pub fn new() -> ErrorRing {
        ErrorRing {
            entries: VecDeque::with_capacity(ERROR_RING_CAPACITY),
        }
    }

    /// Record an error, evicting the oldest entry when full.
    pub fn record(&mut self, err: RuntimeError) {
        if self.entries.len() == ERROR_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(err);
    }

    /// Take all accumulated errors in recording order.
    pub fn drain(&mut self) -> Vec<RuntimeError> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
