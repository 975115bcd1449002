use crate::trace::Fault;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type AgencyResult<T> = Result<T, AgencyError>;

/// Pipeline stage a `Generation` error was raised at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Shape,
    Generate,
    Install,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Shape => write!(f, "shape"),
            Stage::Generate => write!(f, "generate"),
            Stage::Install => write!(f, "install"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    Empty,
    MissingStructure,
    Syntax,
    UnknownScope,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationErrorKind::Empty => write!(f, "empty"),
            ValidationErrorKind::MissingStructure => write!(f, "missing structure"),
            ValidationErrorKind::Syntax => write!(f, "syntax"),
            ValidationErrorKind::UnknownScope => write!(f, "unknown scope"),
        }
    }
}

fn attempt_suffix(attempt: &Option<u32>) -> String {
    match attempt {
        Some(n) => format!(" (attempt {})", n),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Error)]
pub enum AgencyError {
    /// Raised before any pipeline work when no configuration is available.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("generation failed at {stage} stage{}: {message}", attempt_suffix(.attempt))]
    Generation {
        stage: Stage,
        attempt: Option<u32>,
        message: String,
    },

    #[error("validation failed ({kind}){}: {detail}", attempt_suffix(.attempt))]
    Validation {
        kind: ValidationErrorKind,
        detail: String,
        attempt: Option<u32>,
        generated_code: Option<String>,
    },

    #[error("security violation{}: generated code matched forbidden pattern '{matched_pattern}' ({rule})", attempt_suffix(.attempt))]
    Security {
        matched_pattern: String,
        rule: String,
        attempt: Option<u32>,
        generated_code: Option<String>,
    },

    /// Invoking an installed unit failed.
    #[error("unit invocation failed: {0}")]
    Runtime(Fault),
}

impl AgencyError {
    pub fn generation(stage: Stage, attempt: Option<u32>, message: impl Into<String>) -> Self {
        AgencyError::Generation {
            stage,
            attempt,
            message: message.into(),
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            AgencyError::Generation { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn attempt(&self) -> Option<u32> {
        match self {
            AgencyError::Generation { attempt, .. }
            | AgencyError::Validation { attempt, .. }
            | AgencyError::Security { attempt, .. } => *attempt,
            _ => None,
        }
    }

    /// The code that was rejected, for validation and security failures.
    pub fn generated_code(&self) -> Option<&str> {
        match self {
            AgencyError::Validation { generated_code, .. }
            | AgencyError::Security { generated_code, .. } => generated_code.as_deref(),
            _ => None,
        }
    }

    pub fn matched_pattern(&self) -> Option<&str> {
        match self {
            AgencyError::Security {
                matched_pattern, ..
            } => Some(matched_pattern),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AgencyError::Validation { .. })
    }

    pub fn is_security(&self) -> bool {
        matches!(self, AgencyError::Security { .. })
    }

    /// Validation and security failures are retried by the generation loop.
    pub fn is_retryable(&self) -> bool {
        self.is_validation() || self.is_security()
    }

    /// Short label for the error class, used in attempt records and logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AgencyError::Configuration(_) => "ConfigurationError",
            AgencyError::Generation { .. } => "GenerationError",
            AgencyError::Validation { .. } => "ValidationError",
            AgencyError::Security { .. } => "SecurityError",
            AgencyError::Runtime(_) => "RuntimeFault",
        }
    }

    /// Copy of this error carrying a different attempt number.
    pub(crate) fn with_attempt(mut self, n: u32) -> Self {
        match &mut self {
            AgencyError::Generation { attempt, .. }
            | AgencyError::Validation { attempt, .. }
            | AgencyError::Security { attempt, .. } => *attempt = Some(n),
            _ => {}
        }
        self
    }
}

impl From<Fault> for AgencyError {
    fn from(fault: Fault) -> Self {
        AgencyError::Runtime(fault)
    }
}
