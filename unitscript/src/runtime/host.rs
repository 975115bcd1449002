//! Host boundary for the evaluator.
//!
//! The evaluator never resolves a call on its own: every `name(args)` and every
//! `self.field` access goes through a [`Host`]. Whatever the host does not
//! expose is unreachable from unit code.

use super::error::{RuntimeError, RuntimeResult};
use super::evaluator::Evaluator;
use super::stdlib::secure_stdlib;
use super::values::Value;
use crate::ast::UnitDef;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Default call depth before a unit call is rejected with `StackOverflow`.
/// Each unit call costs several evaluator frames on the native stack; this
/// depth fits a default 2 MiB thread stack in unoptimized builds.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

pub trait Host {
    /// Invoke a named callable. Returns `None` when the name is unknown.
    fn call(&mut self, name: &str, args: Vec<Value>) -> Option<RuntimeResult<Value>>;

    /// Read `self.<name>`.
    fn get_field(&self, name: &str) -> RuntimeResult<Value>;

    /// Write `self.<name> = value`.
    fn set_field(&mut self, name: &str, value: Value) -> RuntimeResult<()>;
}

/// Host exposing only the secure standard library and no state.
#[derive(Debug, Default)]
pub struct PureHost;

impl Host for PureHost {
    fn call(&mut self, name: &str, args: Vec<Value>) -> Option<RuntimeResult<Value>> {
        secure_stdlib().lookup(name).map(|f| f.call(&args))
    }

    fn get_field(&self, name: &str) -> RuntimeResult<Value> {
        Err(RuntimeError::UndefinedSymbol(format!("self.{}", name)))
    }

    fn set_field(&mut self, name: &str, _value: Value) -> RuntimeResult<()> {
        Err(RuntimeError::UndefinedSymbol(format!("self.{}", name)))
    }
}

/// Runs a parsed program on its own: units may call each other and the
/// secure standard library, and share one field map as `self`.
pub struct ProgramHost {
    units: HashMap<String, Arc<UnitDef>>,
    fields: IndexMap<String, Value>,
    evaluator: Evaluator,
    depth: usize,
    max_depth: usize,
}

impl ProgramHost {
    pub fn new(units: Vec<UnitDef>) -> Self {
        Self {
            units: units
                .into_iter()
                .map(|u| (u.name.clone(), Arc::new(u)))
                .collect(),
            fields: IndexMap::new(),
            evaluator: Evaluator::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    pub fn invoke(&mut self, name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        self.call(name, args)
            .unwrap_or_else(|| Err(RuntimeError::UndefinedSymbol(name.to_string())))
    }
}

impl Host for ProgramHost {
    fn call(&mut self, name: &str, args: Vec<Value>) -> Option<RuntimeResult<Value>> {
        let unit = match self.units.get(name) {
            Some(unit) => Arc::clone(unit),
            None => return secure_stdlib().lookup(name).map(|f| f.call(&args)),
        };

        if self.depth >= self.max_depth {
            return Some(Err(RuntimeError::StackOverflow(name.to_string())));
        }
        self.depth += 1;
        let evaluator = self.evaluator.clone();
        let result = evaluator.call_unit(&unit, args, self);
        self.depth -= 1;
        Some(result)
    }

    fn get_field(&self, name: &str) -> RuntimeResult<Value> {
        Ok(self.fields.get(name).cloned().unwrap_or_default())
    }

    fn set_field(&mut self, name: &str, value: Value) -> RuntimeResult<()> {
        self.fields.insert(name.to_string(), value);
        Ok(())
    }
}
