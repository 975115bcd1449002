//! Regenerates the unit a runtime fault is attributed to.

use crate::error::AgencyResult;
use crate::generator::GenerationController;
use crate::owner::Owner;
use crate::registry::ScopeKind;
use crate::trace::{Fault, FrameOrigin};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use unitscript::Value;

/// Frames quoted in a repair request.
const REPAIR_TRACE_FRAMES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairLogEntry {
    pub unit_name: String,
    pub error_summary: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Describe the shape of a task input for a repair prompt: its type, size,
/// keys and one sample element.
pub fn describe_input_shape(input: &Value) -> String {
    match input {
        Value::List(items) => match items.first() {
            Some(sample) => format!(
                "list of {} elements; sample element ({}): {}",
                items.len(),
                sample.type_name(),
                sample
            ),
            None => "empty list".to_string(),
        },
        Value::Map(entries) => match entries.first() {
            Some((key, sample)) => format!(
                "map with {} keys [{}]; sample value for {} ({}): {}",
                entries.len(),
                entries.keys().join(", "),
                key,
                sample.type_name(),
                sample
            ),
            None => "empty map".to_string(),
        },
        Value::String(s) => format!("string of length {}", s.chars().count()),
        Value::Nil => "no input (nil)".to_string(),
        other => format!("{} value {}", other.type_name(), other),
    }
}

pub struct RepairController {
    generator: Arc<GenerationController>,
    entry_point: String,
    log: Mutex<Vec<RepairLogEntry>>,
}

impl RepairController {
    pub fn new(generator: Arc<GenerationController>, entry_point: impl Into<String>) -> Self {
        Self {
            generator,
            entry_point: entry_point.into(),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// The innermost generated unit in the trace other than the entry point,
    /// or the entry point when no such frame exists.
    pub fn attribute_fault(&self, owner: &Owner, fault: &Fault) -> String {
        let installed: HashSet<String> = owner.installed_unit_names().into_iter().collect();
        fault
            .trace
            .iter()
            .find(|frame| {
                matches!(frame.origin, FrameOrigin::Generated(_))
                    && frame.symbol != self.entry_point
                    && installed.contains(&frame.symbol)
            })
            .map(|frame| frame.symbol.clone())
            .unwrap_or_else(|| self.entry_point.clone())
    }

    fn repair_description(&self, unit: &str, source: &str, fault: &Fault, input: &Value) -> String {
        let frames = fault
            .top_frames(REPAIR_TRACE_FRAMES)
            .iter()
            .map(|frame| format!("  at {}", frame))
            .join("\n");
        format!(
            "Fix the unit '{unit}'.\n\n\
             Current source of '{unit}':\n{source}\n\n\
             It failed with {kind}: {message}\n\
             Call trace (innermost first):\n{frames}\n\n\
             The task input was: {shape}.\n\n\
             Keep the same name and signature. Define only the unit '{unit}'.",
            unit = unit,
            source = source,
            kind = fault.kind(),
            message = fault.message(),
            frames = if frames.is_empty() { "  (none)".to_string() } else { frames },
            shape = describe_input_shape(input),
        )
    }

    /// Regenerate the unit `fault` is attributed to. Returns the unit name
    /// when the new code redefined it.
    pub fn repair(&self, owner: &Owner, fault: &Fault, input: &Value) -> AgencyResult<Option<String>> {
        let unit = self.attribute_fault(owner, fault);
        let source = owner
            .lookup_source(&unit)
            .unwrap_or_else(|| "(source unavailable)".to_string());
        let scope = owner
            .find_unit(&unit)
            .map(|record| record.scope)
            .unwrap_or(ScopeKind::Singleton);
        let error_summary = format!("{}: {}", fault.kind(), fault.message());
        log::info!("repairing {} on {} after {}", unit, owner.type_name(), error_summary);

        let description = self.repair_description(&unit, &source, fault, input);
        let result = self.generator.generate(owner, &description, scope);
        self.push_log(RepairLogEntry {
            unit_name: unit.clone(),
            error_summary,
            success: result.is_ok(),
            timestamp: Utc::now(),
        });

        let names = result?;
        if names.iter().any(|name| *name == unit) {
            log::info!("repaired {} on {}", unit, owner.type_name());
            Ok(Some(unit))
        } else {
            log::warn!(
                "repair of {} installed [{}] but did not redefine it",
                unit,
                names.join(", ")
            );
            Ok(None)
        }
    }

    fn push_log(&self, entry: RepairLogEntry) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }

    pub fn repair_log(&self) -> Vec<RepairLogEntry> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
