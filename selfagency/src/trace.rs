//! Structured call traces for unit invocations.

use crate::registry::ScopeKind;
use serde::Serialize;
use std::fmt;
use unitscript::RuntimeError;

/// Where the code of a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameOrigin {
    Generated(ScopeKind),
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub symbol: String,
    pub origin: FrameOrigin,
    /// Line of the unit definition inside its own source.
    pub line: usize,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            FrameOrigin::Generated(scope) => {
                write!(f, "{} ({} unit, line {})", self.symbol, scope, self.line)
            }
            FrameOrigin::Static => write!(f, "{} (static, line {})", self.symbol, self.line),
        }
    }
}

/// A runtime failure raised while invoking a unit. `trace` lists the active
/// frames at the point of failure, innermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub error: RuntimeError,
    pub trace: Vec<Frame>,
}

impl Fault {
    pub fn new(error: RuntimeError, trace: Vec<Frame>) -> Self {
        Self { error, trace }
    }

    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn innermost(&self) -> Option<&Frame> {
        self.trace.first()
    }

    pub fn top_frames(&self, n: usize) -> &[Frame] {
        &self.trace[..self.trace.len().min(n)]
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.trace.iter().map(|frame| frame.symbol.as_str())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.error)?;
        if let Some(frame) = self.innermost() {
            write!(f, " in {}", frame.symbol)?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {}
