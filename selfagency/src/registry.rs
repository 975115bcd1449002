//! Installed-unit bookkeeping.
//!
//! An [`ExecutionRegistry`] records every unit a pipeline run installed, keyed
//! by `(scope, name)`. Installing a name twice in the same scope replaces the
//! earlier record. Each owner type keeps one registry for its Instance and
//! Type units; each owner instance keeps its own for Singleton units.

use crate::error::{AgencyError, AgencyResult, ValidationErrorKind};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// Shared by every instance of the owner type.
    Instance,
    /// Private to one owner instance.
    Singleton,
    /// Called on the owner type itself.
    Type,
}

impl ScopeKind {
    pub const ALL: [ScopeKind; 3] = [ScopeKind::Instance, ScopeKind::Singleton, ScopeKind::Type];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Instance => "instance",
            ScopeKind::Singleton => "singleton",
            ScopeKind::Type => "type",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ScopeKind {
    type Err = AgencyError;

    fn from_str(s: &str) -> AgencyResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instance" => Ok(ScopeKind::Instance),
            "singleton" => Ok(ScopeKind::Singleton),
            "type" | "class" => Ok(ScopeKind::Type),
            other => Err(AgencyError::Validation {
                kind: ValidationErrorKind::UnknownScope,
                detail: format!(
                    "unknown scope '{}'; expected instance, singleton or type",
                    other
                ),
                attempt: None,
                generated_code: None,
            }),
        }
    }
}

/// The object a unit was installed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum OwnerRef {
    Type(String),
    Instance { type_name: String, id: Uuid },
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerRef::Type(name) => write!(f, "{}", name),
            OwnerRef::Instance { type_name, id } => write!(f, "{}#{}", type_name, id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedUnit {
    pub name: String,
    pub scope: ScopeKind,
    pub source: String,
    pub description: String,
    pub installed_at: OwnerRef,
    pub installed_on: DateTime<Utc>,
}

impl GeneratedUnit {
    /// Source with the description prepended as `#` comment lines.
    pub fn annotated_source(&self) -> String {
        let header: String = self
            .description
            .lines()
            .map(|line| {
                if line.trim().is_empty() {
                    "#\n".to_string()
                } else {
                    format!("# {}\n", line)
                }
            })
            .collect();
        format!("{}{}", header, self.source)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ExecutionRegistry {
    units: IndexMap<(ScopeKind, String), GeneratedUnit>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `unit`, returning the entry it replaced.
    pub fn record(&mut self, unit: GeneratedUnit) -> Option<GeneratedUnit> {
        let key = (unit.scope, unit.name.clone());
        // Replacing keeps the original insertion position.
        self.units.insert(key, unit)
    }

    pub fn get(&self, scope: ScopeKind, name: &str) -> Option<&GeneratedUnit> {
        self.units.get(&(scope, name.to_string()))
    }

    pub fn contains(&self, scope: ScopeKind, name: &str) -> bool {
        self.get(scope, name).is_some()
    }

    pub fn names(&self, scope: ScopeKind) -> Vec<String> {
        self.units
            .keys()
            .filter(|(s, _)| *s == scope)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn units(&self) -> impl Iterator<Item = &GeneratedUnit> {
        self.units.values()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
