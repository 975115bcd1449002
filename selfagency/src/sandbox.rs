//! Isolated execution contexts and the installer that fills them.
//!
//! Generated units never touch an owner's static capabilities. They live in
//! an [`ExecutionContext`] that dispatch consults first, so a newer definition
//! wins over an older one of the same name without recompiling anything else.

use crate::error::{AgencyError, AgencyResult, Stage};
use crate::owner::Target;
use crate::registry::{GeneratedUnit, ScopeKind};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use unitscript::{RuntimeError, RuntimeResult, UnitDef};

/// Host operation names that unit code may never reach, whatever it defines.
pub const SHADOWED_OPERATIONS: &[&str] = &[
    "system",
    "exec",
    "spawn",
    "fork",
    "kill",
    "abort",
    "exit",
    "run_shell",
    "shell",
    "open",
    "eval",
    "send",
    "require",
    "load",
];

pub fn is_shadowed(name: &str) -> bool {
    SHADOWED_OPERATIONS.contains(&name)
}

pub(crate) fn shadow_violation(name: &str, context: &str) -> RuntimeError {
    RuntimeError::SecurityViolation {
        operation: name.to_string(),
        capability: "host operation".to_string(),
        context: context.to_string(),
    }
}

/// Named units installed for one scope of one owner (or owner type).
#[derive(Debug)]
pub struct ExecutionContext {
    label: String,
    scope: ScopeKind,
    units: RwLock<HashMap<String, Arc<UnitDef>>>,
}

impl ExecutionContext {
    pub fn new(label: impl Into<String>, scope: ScopeKind) -> Self {
        Self {
            label: label.into(),
            scope,
            units: RwLock::new(HashMap::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn scope(&self) -> ScopeKind {
        self.scope
    }

    /// Install `unit` under its name, returning the definition it replaced.
    pub fn install(&self, unit: UnitDef) -> RuntimeResult<Option<Arc<UnitDef>>> {
        let mut units = self
            .units
            .write()
            .map_err(|_| RuntimeError::InternalError(format!("RwLock poisoned: {}", self.label)))?;
        Ok(units.insert(unit.name.clone(), Arc::new(unit)))
    }

    pub fn resolve(&self, name: &str) -> RuntimeResult<Option<Arc<UnitDef>>> {
        let units = self
            .units
            .read()
            .map_err(|_| RuntimeError::InternalError(format!("RwLock poisoned: {}", self.label)))?;
        Ok(units.get(name).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        matches!(self.resolve(name), Ok(Some(_)))
    }

    pub fn names(&self) -> Vec<String> {
        match self.units.read() {
            Ok(units) => {
                let mut names: Vec<String> = units.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.units.read().map(|units| units.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct SandboxInstaller;

impl SandboxInstaller {
    /// Parse `code` into units and install each of them for `scope` on
    /// `target`, in order. Units installed before a failing one stay installed.
    pub fn install(
        target: Target<'_>,
        scope: ScopeKind,
        code: &str,
        description: &str,
    ) -> AgencyResult<Vec<GeneratedUnit>> {
        let units = unitscript::parse(code).map_err(|e| {
            AgencyError::generation(Stage::Install, None, format!("generated code no longer parses: {}", e))
        })?;

        let owner_type = target.owner_type();
        let _guard = match (scope, target) {
            (ScopeKind::Singleton, Target::Instance(owner)) => owner.install_guard(),
            (ScopeKind::Singleton, Target::Type(_)) => {
                return Err(AgencyError::generation(
                    Stage::Install,
                    None,
                    format!("singleton scope needs an instance of {}", owner_type.name()),
                ))
            }
            _ => owner_type.install_guard(),
        };

        let context = target.context(scope)?;
        let installed_at = target.owner_ref();
        let mut installed = Vec::with_capacity(units.len());
        for unit in units {
            if is_shadowed(&unit.name) {
                return Err(AgencyError::generation(
                    Stage::Install,
                    None,
                    format!("unit name '{}' shadows a blocked host operation", unit.name),
                ));
            }
            let record = GeneratedUnit {
                name: unit.name.clone(),
                scope,
                source: unit.source.clone(),
                description: description.to_string(),
                installed_at: installed_at.clone(),
                installed_on: Utc::now(),
            };
            let replaced = context
                .install(unit)
                .map_err(|e| AgencyError::generation(Stage::Install, None, e.to_string()))?;
            if replaced.is_some() {
                log::debug!("{}: replaced unit {}", context.label(), record.name);
            }
            target.record(record.clone())?;
            log::info!("installed {} unit {} on {}", scope, record.name, installed_at);
            installed.push(record);
        }
        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn context_replaces_by_name() {
        let context = ExecutionContext::new("Widget/instance", ScopeKind::Instance);
        let first = unitscript::parse_unit("define x() 1 end").unwrap();
        let second = unitscript::parse_unit("define x() 2 end").unwrap();
        assert!(context.install(first).unwrap().is_none());
        let replaced = context.install(second).unwrap().unwrap();
        assert_eq!(replaced.source, "define x() 1 end");
        assert_eq!(context.resolve("x").unwrap().unwrap().source, "define x() 2 end");
        assert_eq!(context.len(), 1);
    }

    #[test]
    fn shadowed_names() {
        assert!(is_shadowed("system"));
        assert!(is_shadowed("run_shell"));
        assert!(!is_shadowed("len"));
        match shadow_violation("exec", "Widget") {
            RuntimeError::SecurityViolation { operation, .. } => assert_eq!(operation, "exec"),
            other => panic!("Expected security violation, got {:?}", other),
        }
    }
}
