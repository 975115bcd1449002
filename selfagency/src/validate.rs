//! Pre-install gate for generated code.
//!
//! [`validate`] runs four checks in order and stops at the first failure:
//! non-empty, structural shape, security denylist, syntax. It is a pure
//! function of the code text.

use crate::error::{AgencyError, AgencyResult, ValidationErrorKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyCategory {
    ProcessControl,
    ShellExecution,
    RawIo,
    HostModule,
    CodeLoading,
    DynamicEvaluation,
    ReflectiveDispatch,
    StateReflection,
    DynamicDefinition,
    LowLevelObject,
}

impl fmt::Display for DenyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DenyCategory::ProcessControl => "process control",
            DenyCategory::ShellExecution => "shell execution",
            DenyCategory::RawIo => "raw file/IO access",
            DenyCategory::HostModule => "host module access",
            DenyCategory::CodeLoading => "code loading",
            DenyCategory::DynamicEvaluation => "dynamic code evaluation",
            DenyCategory::ReflectiveDispatch => "reflective dispatch",
            DenyCategory::StateReflection => "state reflection",
            DenyCategory::DynamicDefinition => "dynamic definition",
            DenyCategory::LowLevelObject => "low-level object access",
        };
        write!(f, "{}", label)
    }
}

/// One entry of the denylist.
#[derive(Debug)]
pub struct DenyRule {
    pub category: DenyCategory,
    pattern: Regex,
}

impl DenyRule {
    fn new(category: DenyCategory, pattern: &str) -> Self {
        Self {
            category,
            pattern: Regex::new(pattern).expect("denylist pattern is valid"),
        }
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

static DENYLIST: Lazy<Vec<DenyRule>> = Lazy::new(|| {
    use DenyCategory::*;
    vec![
        DenyRule::new(ProcessControl, r"\b(?:system|exec|spawn|fork|kill|abort|exit)\b"),
        DenyRule::new(ShellExecution, r"\b(?:run_shell|shell)\b"),
        DenyRule::new(ShellExecution, r"`"),
        DenyRule::new(ShellExecution, r"%x[\(\[\{]"),
        DenyRule::new(RawIo, r"\b(?:File|IO|Dir|Socket)\s*\."),
        DenyRule::new(RawIo, r"\bopen\s*\("),
        DenyRule::new(HostModule, r"\b(?:Process|Kernel|Open3)\s*\."),
        DenyRule::new(CodeLoading, r"\b(?:require|require_relative|load|import)\b"),
        DenyRule::new(
            DynamicEvaluation,
            r"\b(?:eval|instance_eval|class_eval|module_eval|scope_eval|compile)\b",
        ),
        DenyRule::new(ReflectiveDispatch, r"\b(?:send|public_send|__send__)\b"),
        DenyRule::new(ReflectiveDispatch, r"\bmethod\s*\("),
        DenyRule::new(
            StateReflection,
            r"\b(?:instance_variable_get|instance_variable_set|get_field|set_field|const_get)\b",
        ),
        DenyRule::new(
            DynamicDefinition,
            r"\b(?:define_method|remove_method|undef_method)\b",
        ),
        DenyRule::new(LowLevelObject, r"\b(?:Binding|BasicObject|ObjectSpace)\b"),
    ]
});

static STRUCTURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\bdefine\s+\S+.*?\bend\b").expect("structure regex is valid")
});

/// The fixed denylist, in evaluation order.
pub fn denylist() -> &'static [DenyRule] {
    &DENYLIST
}

/// A denylist hit: the exact offending text and the rule it matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenMatch {
    pub matched: String,
    pub category: DenyCategory,
    pub offset: usize,
}

/// Earliest denylist hit in `code`. On equal offsets the earlier rule wins.
pub fn find_forbidden(code: &str) -> Option<ForbiddenMatch> {
    DENYLIST
        .iter()
        .filter_map(|rule| {
            rule.pattern.find(code).map(|m| ForbiddenMatch {
                matched: m.as_str().to_string(),
                category: rule.category,
                offset: m.start(),
            })
        })
        .min_by_key(|hit| hit.offset)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Ok,
    Empty,
    MissingStructure,
    SecurityViolation {
        pattern: String,
        category: DenyCategory,
    },
    SyntaxError(String),
}

impl ValidationOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ValidationOutcome::Ok)
    }

    /// Turn a failing outcome into the matching error kind.
    pub fn into_result(self, code: &str, attempt: Option<u32>) -> AgencyResult<()> {
        let generated_code = Some(code.to_string());
        let validation = |kind, detail: String| AgencyError::Validation {
            kind,
            detail,
            attempt,
            generated_code: generated_code.clone(),
        };
        match self {
            ValidationOutcome::Ok => Ok(()),
            ValidationOutcome::Empty => Err(validation(
                ValidationErrorKind::Empty,
                "generated code is empty".to_string(),
            )),
            ValidationOutcome::MissingStructure => Err(validation(
                ValidationErrorKind::MissingStructure,
                "generated code does not contain a 'define ... end' block".to_string(),
            )),
            ValidationOutcome::SyntaxError(detail) => {
                Err(validation(ValidationErrorKind::Syntax, detail))
            }
            ValidationOutcome::SecurityViolation { pattern, category } => {
                Err(AgencyError::Security {
                    matched_pattern: pattern,
                    rule: category.to_string(),
                    attempt,
                    generated_code,
                })
            }
        }
    }
}

pub fn validate(code: &str) -> ValidationOutcome {
    if code.trim().is_empty() {
        return ValidationOutcome::Empty;
    }
    if !STRUCTURE_RE.is_match(code) {
        return ValidationOutcome::MissingStructure;
    }
    if let Some(hit) = find_forbidden(code) {
        return ValidationOutcome::SecurityViolation {
            pattern: hit.matched,
            category: hit.category,
        };
    }
    match unitscript::parse(code) {
        Ok(_) => ValidationOutcome::Ok,
        Err(e) => ValidationOutcome::SyntaxError(e.to_string()),
    }
}

/// [`validate`], raising the matching error on failure.
pub fn validate_or_raise(code: &str, attempt: Option<u32>) -> AgencyResult<()> {
    validate(code).into_result(code, attempt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_well_formed_units() {
        assert_eq!(validate("define add(a,b) return a+b end"), ValidationOutcome::Ok);
        assert_eq!(
            validate("define execute_task(data)\n  send_report(data)\nend\ndefine send_report(d) len(d) end"),
            ValidationOutcome::Ok
        );
    }

    #[test]
    fn checks_run_in_order() {
        assert_eq!(validate("  \n"), ValidationOutcome::Empty);
        assert_eq!(validate("system('ls')"), ValidationOutcome::MissingStructure);
        assert!(matches!(
            validate("define f() system('ls') end"),
            ValidationOutcome::SecurityViolation { .. }
        ));
        assert!(matches!(
            validate("define f() 1 +  end"),
            ValidationOutcome::SyntaxError(_)
        ));
    }

    #[test]
    fn shell_execution_is_reported_with_exact_text() {
        match validate("define hack() run_shell('ls') end") {
            ValidationOutcome::SecurityViolation { pattern, category } => {
                assert_eq!(pattern, "run_shell");
                assert_eq!(category, DenyCategory::ShellExecution);
            }
            other => panic!("Expected security violation, got {:?}", other),
        }
    }

    #[test]
    fn earliest_match_wins() {
        let hit = find_forbidden("define f() eval(x) system('ls') end").unwrap();
        assert_eq!(hit.matched, "eval");
        assert_eq!(hit.category, DenyCategory::DynamicEvaluation);
    }

    #[test]
    fn no_context_sensitive_exemptions() {
        for code in [
            "define f() x = 'please do not exec' end",
            "define f() (send)(1) end",
            "define f() open ('file') end",
            "define f() File.read('x') end",
        ] {
            assert!(
                matches!(validate(code), ValidationOutcome::SecurityViolation { .. }),
                "{} should be rejected",
                code
            );
        }
    }

    #[test]
    fn word_boundaries_avoid_false_positives() {
        for code in [
            "define execute_task(d) d end",
            "define send_report(d) d end",
            "define reopen_count() 1 end",
            "define loader() 1 end",
        ] {
            assert_eq!(validate(code), ValidationOutcome::Ok, "{} should pass", code);
        }
    }

    #[test]
    fn outcomes_convert_to_error_kinds() {
        let err = validate_or_raise("define f() exec('x') end", Some(2)).unwrap_err();
        assert!(err.is_security());
        assert_eq!(err.matched_pattern(), Some("exec"));
        assert_eq!(err.attempt(), Some(2));
        assert_eq!(err.generated_code(), Some("define f() exec('x') end"));

        let err = validate_or_raise("", None).unwrap_err();
        assert!(err.is_validation());
    }
}
