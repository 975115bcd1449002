//! Optional pre-pass that rewrites a user request into a technical
//! specification before code generation.

use crate::completion::{CompletionService, TemplateVars};
use crate::owner::Introspection;
use crate::prompt::SHAPE_TEMPLATE;
use crate::registry::ScopeKind;
use std::sync::Arc;

pub trait Shaper: Send + Sync {
    /// `None` means shaping produced nothing usable.
    fn shape(&self, context: &Introspection, description: &str, scope: ScopeKind) -> Option<String>;
}

/// Prompt wording that tells the model where its units will live.
pub fn scope_instruction(scope: ScopeKind) -> &'static str {
    match scope {
        ScopeKind::Instance => {
            "The units are shared by every instance of the type. Use self.<field> for instance state."
        }
        ScopeKind::Singleton => {
            "The units are attached to one specific instance only. Use self.<field> for that instance's state."
        }
        ScopeKind::Type => {
            "The units are called on the type itself, not on an instance. Declare them as `define self.name(...)`."
        }
    }
}

pub(crate) fn introspection_vars(context: &Introspection) -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.insert("class_name".to_string(), context.type_name.clone());
    vars.insert("ivars".to_string(), context.field_list());
    vars.insert("methods".to_string(), context.capability_list());
    vars
}

/// Shapes through the completion service's `shape` template.
pub struct TemplateShaper {
    service: Arc<dyn CompletionService>,
}

impl TemplateShaper {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }
}

impl Shaper for TemplateShaper {
    fn shape(&self, context: &Introspection, description: &str, scope: ScopeKind) -> Option<String> {
        let mut vars = introspection_vars(context);
        vars.insert("scope_instruction".to_string(), scope_instruction(scope).to_string());
        vars.insert("raw_prompt".to_string(), description.to_string());

        match self.service.complete(SHAPE_TEMPLATE, &vars) {
            Ok(spec) if !spec.trim().is_empty() => Some(spec.trim().to_string()),
            Ok(_) => {
                log::warn!("shaping for {} returned an empty specification", context.type_name);
                None
            }
            Err(e) => {
                log::warn!("shaping for {} failed: {}", context.type_name, e);
                None
            }
        }
    }
}

/// Uses the description as the specification.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughShaper;

impl Shaper for PassthroughShaper {
    fn shape(&self, _context: &Introspection, description: &str, _scope: ScopeKind) -> Option<String> {
        let trimmed = description.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::StubCompletionService;
    use pretty_assertions::assert_eq;

    fn context() -> Introspection {
        Introspection {
            type_name: "Calculator".to_string(),
            fields: vec!["total".to_string()],
            capabilities: vec!["reset".to_string(), "label".to_string()],
        }
    }

    #[test]
    fn template_shaper_sends_context_vars() {
        let stub = Arc::new(StubCompletionService::new().respond("shape", "  Define add(a, b).  "));
        let shaper = TemplateShaper::new(stub.clone());
        let spec = shaper.shape(&context(), "add two numbers", ScopeKind::Singleton);
        assert_eq!(spec.as_deref(), Some("Define add(a, b)."));

        let call = &stub.calls_for("shape")[0];
        assert_eq!(call.var("class_name"), Some("Calculator"));
        assert_eq!(call.var("ivars"), Some("total"));
        assert_eq!(call.var("methods"), Some("reset, label"));
        assert_eq!(call.var("raw_prompt"), Some("add two numbers"));
        assert_eq!(call.var("scope_instruction"), Some(scope_instruction(ScopeKind::Singleton)));
    }

    #[test]
    fn failures_and_blank_answers_give_none() {
        let stub = Arc::new(StubCompletionService::new().fail("shape", "timeout").respond("shape", "   "));
        let shaper = TemplateShaper::new(stub);
        assert_eq!(shaper.shape(&context(), "x", ScopeKind::Instance), None);
        assert_eq!(shaper.shape(&context(), "x", ScopeKind::Instance), None);
    }

    #[test]
    fn passthrough_keeps_the_description() {
        assert_eq!(
            PassthroughShaper.shape(&context(), " add numbers ", ScopeKind::Type).as_deref(),
            Some("add numbers")
        );
        assert_eq!(PassthroughShaper.shape(&context(), "  ", ScopeKind::Type), None);
    }
}
