// Runtime system for UnitScript

pub mod error;
pub mod evaluator;
pub mod host;
pub mod stdlib;
pub mod values;

pub use error::{RuntimeError, RuntimeResult};
pub use evaluator::{Evaluator, MAX_VALUE_LENGTH};
pub use host::{Host, ProgramHost, PureHost, DEFAULT_MAX_CALL_DEPTH};
pub use stdlib::{secure_stdlib, Arity, BuiltinFunction, BuiltinTable, SecureStandardLibrary};
pub use values::Value;
