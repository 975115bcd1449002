// Error handling for the UnitScript runtime

use std::fmt;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime errors that can occur while executing a unit
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Type errors (wrong type for operation)
    TypeError {
        expected: String,
        actual: String,
        operation: String,
    },

    /// Undefined variable or unit
    UndefinedSymbol(String),

    /// Arity mismatch (wrong number of arguments)
    ArityMismatch {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Division by zero
    DivisionByZero,

    /// Index out of bounds
    IndexOutOfBounds { index: i64, length: usize },

    /// Key not found in map
    KeyNotFound { key: String },

    /// Integer arithmetic overflow
    ArithmeticOverflow { operation: String },

    /// Raised explicitly by unit code with `raise`
    Raised(String),

    /// A blocked host operation was reached from unit code
    SecurityViolation {
        operation: String,
        capability: String,
        context: String,
    },

    /// Call depth limit exceeded
    StackOverflow(String),

    /// `break` / `next` outside of a loop
    InvalidControlFlow(String),

    Generic(String),

    /// Invariant broken inside the host (poisoned locks and the like)
    InternalError(String),
}

impl RuntimeError {
    pub fn new(message: &str) -> RuntimeError {
        RuntimeError::Generic(message.to_string())
    }

    pub fn type_error(expected: &str, actual: &str, operation: &str) -> RuntimeError {
        RuntimeError::TypeError {
            expected: expected.to_string(),
            actual: actual.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Short machine-friendly name of the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::TypeError { .. } => "TypeError",
            RuntimeError::UndefinedSymbol(_) => "UndefinedSymbol",
            RuntimeError::ArityMismatch { .. } => "ArityMismatch",
            RuntimeError::DivisionByZero => "DivisionByZero",
            RuntimeError::IndexOutOfBounds { .. } => "IndexOutOfBounds",
            RuntimeError::KeyNotFound { .. } => "KeyNotFound",
            RuntimeError::ArithmeticOverflow { .. } => "ArithmeticOverflow",
            RuntimeError::Raised(_) => "RaisedError",
            RuntimeError::SecurityViolation { .. } => "SecurityViolation",
            RuntimeError::StackOverflow(_) => "StackOverflow",
            RuntimeError::InvalidControlFlow(_) => "InvalidControlFlow",
            RuntimeError::Generic(_) => "RuntimeError",
            RuntimeError::InternalError(_) => "InternalError",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeError {
                expected,
                actual,
                operation,
            } => write!(
                f,
                "Type error in {}: expected {}, got {}",
                operation, expected, actual
            ),
            RuntimeError::UndefinedSymbol(name) => write!(f, "Undefined symbol: {}", name),
            RuntimeError::ArityMismatch {
                function,
                expected,
                actual,
            } => write!(
                f,
                "Arity mismatch in {}: expected {}, got {}",
                function, expected, actual
            ),
            RuntimeError::DivisionByZero => write!(f, "Division by zero"),
            RuntimeError::IndexOutOfBounds { index, length } => write!(
                f,
                "Index out of bounds: {} (length: {})",
                index, length
            ),
            RuntimeError::KeyNotFound { key } => write!(f, "Key not found: {}", key),
            RuntimeError::ArithmeticOverflow { operation } => {
                write!(f, "Integer overflow in {}", operation)
            }
            RuntimeError::Raised(message) => write!(f, "{}", message),
            RuntimeError::SecurityViolation {
                operation,
                capability,
                context,
            } => write!(
                f,
                "Security violation in {}: capability '{}' is not available ({})",
                operation, capability, context
            ),
            RuntimeError::StackOverflow(name) => {
                write!(f, "Stack overflow: call depth exceeded in {}", name)
            }
            RuntimeError::InvalidControlFlow(msg) => write!(f, "Invalid control flow: {}", msg),
            RuntimeError::Generic(msg) => write!(f, "Runtime error: {}", msg),
            RuntimeError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}
