//! UnitScript: the language generated units are written in.
//!
//! A program is a sequence of `define name(params) ... end` blocks. Units run
//! inside a tree-walking [`runtime::Evaluator`] whose only way out is the
//! [`runtime::Host`] it is given, so the set of reachable operations is exactly
//! what the host exposes plus the secure standard library.

pub mod ast;
#[cfg(feature = "pest")]
pub mod parser;
pub mod runtime;

pub use ast::{SourceSpan, UnitDef};
#[cfg(feature = "pest")]
pub use parser::{parse, parse_unit, split_units, ParseError};
pub use runtime::{Evaluator, Host, RuntimeError, RuntimeResult, Value};
