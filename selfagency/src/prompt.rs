use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::completion::{CompletionError, TemplateVars};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const SHAPE_TEMPLATE: &str = "shape";
pub const GENERATE_TEMPLATE: &str = "generate";

#[derive(Clone, Debug, PartialEq)]
pub struct PromptTemplate {
    pub id: String,
    pub sections: Vec<(String, String)>, // (name, content)
}

pub trait PromptStore: Send + Sync {
    fn get_template(&self, id: &str) -> Result<PromptTemplate, CompletionError>;
}

const SHAPE_ROLE: &str = "\
You turn feature requests into precise technical specifications for UnitScript units.
Answer with the specification only. Do not write code.";

const SHAPE_CONTEXT: &str = "\
Target type: {class_name}
State fields (read with self.<field>, write with self.<field> = value): {ivars}
Existing capabilities: {methods}
{scope_instruction}";

const SHAPE_TASK: &str = "\
Request:
{raw_prompt}

Describe each unit to define: its name, its parameters, what it returns, which
state fields it reads or writes and which existing capabilities it calls.";

const GENERATE_GRAMMAR: &str = "\
UnitScript reference:
- A program is one or more blocks of the form `define name(param, ...) ... end`.
  `define self.name(...)` declares a type-level unit.
- Statements: `let x = e`, `x = e`, `x += e`, `self.field = e`, `xs[i] = e`,
  `if c ... elsif c ... else ... end`, `while c ... end`, `for x in xs ... end`,
  `return e`, `break`, `next`, `raise \"message\"`.
- Expressions: numbers, 'strings', true, false, nil, [lists], {key: maps},
  + - * / %, == != < <= > >=, and, or, not, calls f(a, b), indexing xs[i].
- A line may not start with a binary `-`, a call's `(` or an index `[`: keep
  them on the line of the operand they apply to.
- Builtins: abs min max sum round floor ceil sqrt str int float type_of is_nil
  len push first last slice range sort reverse contains keys values get has_key
  merge put join split upper lower trim starts_with ends_with replace.
- There is no file, network, process or reflection access.";

const GENERATE_TASK: &str = "\
You are adding behavior to the type {class_name}.
State fields: {ivars}
Existing capabilities: {methods}

Specification:
{shaped_spec}";

const GENERATE_FEEDBACK: &str = "\
Your previous answer was rejected.
Previous code:
{previous_code}

Error:
{previous_error}

Fix the problem and answer again.";

const GENERATE_OUTPUT: &str = "\
Answer with UnitScript code only: one or more `define ... end` blocks, no prose
and no explanations.";

fn section(name: &str, content: &str) -> (String, String) {
    (name.to_string(), content.to_string())
}

/// Templates compiled into the crate.
#[derive(Clone, Debug, Default)]
pub struct BuiltinPromptStore;

impl PromptStore for BuiltinPromptStore {
    fn get_template(&self, id: &str) -> Result<PromptTemplate, CompletionError> {
        let sections = match id {
            SHAPE_TEMPLATE => vec![
                section("role", SHAPE_ROLE),
                section("context", SHAPE_CONTEXT),
                section("task", SHAPE_TASK),
            ],
            GENERATE_TEMPLATE => vec![
                section("grammar", GENERATE_GRAMMAR),
                section("task", GENERATE_TASK),
                section("feedback", GENERATE_FEEDBACK),
                section("output", GENERATE_OUTPUT),
            ],
            other => {
                return Err(CompletionError::Template(format!(
                    "no built-in prompt template named '{}'",
                    other
                )))
            }
        };
        Ok(PromptTemplate {
            id: id.to_string(),
            sections,
        })
    }
}

/// Reads `<base_dir>/<id>/<section>.md` overrides. Sections without a file
/// come from the built-in template.
#[derive(Clone, Debug)]
pub struct FilePromptStore {
    base_dir: PathBuf,
}

impl FilePromptStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn read_section(&self, id: &str, name: &str) -> Result<Option<String>, CompletionError> {
        let path = self.base_dir.join(id).join(format!("{}.md", name));
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CompletionError::Template(format!(
                "Failed to read prompt section {} for {}: {}",
                name, id, e
            ))),
        }
    }
}

impl PromptStore for FilePromptStore {
    fn get_template(&self, id: &str) -> Result<PromptTemplate, CompletionError> {
        let mut template = BuiltinPromptStore.get_template(id)?;
        for (name, content) in template.sections.iter_mut() {
            if let Some(custom) = self.read_section(id, name)? {
                log::debug!("prompt section {}/{} loaded from {}", id, name, self.base_dir.display());
                *content = custom;
            }
        }
        Ok(template)
    }
}

pub struct PromptManager {
    store: Box<dyn PromptStore>,
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new(BuiltinPromptStore)
    }
}

impl PromptManager {
    pub fn new<S: PromptStore + 'static>(store: S) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Built-in templates, overridden from `template_directory` when given.
    pub fn for_directory(template_directory: Option<&Path>) -> Self {
        match template_directory {
            Some(dir) => Self::new(FilePromptStore::new(dir)),
            None => Self::default(),
        }
    }

    /// Render template `id` with `{var}` substitution. A section that uses a
    /// placeholder with no value in `vars` is left out.
    pub fn render(&self, id: &str, vars: &TemplateVars) -> Result<String, CompletionError> {
        let template = self.store.get_template(id)?;
        let mut buf = String::new();
        for (_name, content) in template.sections {
            if placeholders(&content).any(|var| !vars.contains_key(var)) {
                continue;
            }
            buf.push_str(&substitute(&content, vars));
            if !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push('\n');
        }
        if buf.trim().is_empty() {
            return Err(CompletionError::Template(format!(
                "prompt template '{}' rendered empty",
                id
            )));
        }
        Ok(buf)
    }
}

/// `{name}` placeholders in `content`, where name is a plain identifier.
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid"));

fn placeholders(content: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER_RE
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// Replaces the placeholders of `content` in one pass, so braces inside the
/// substituted values are never expanded.
fn substitute(content: &str, vars: &TemplateVars) -> String {
    PLACEHOLDER_RE
        .replace_all(content, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> TemplateVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn feedback_section_needs_previous_error() {
        let manager = PromptManager::default();
        let base = vars(&[
            ("class_name", "Calculator"),
            ("ivars", "total"),
            ("methods", "reset"),
            ("shaped_spec", "define add(a, b)"),
        ]);
        let first = manager.render(GENERATE_TEMPLATE, &base).unwrap();
        assert!(first.contains("Calculator"));
        assert!(!first.contains("Previous code"));

        let mut retry = base.clone();
        retry.insert("previous_code".to_string(), "define add(a b) end".to_string());
        retry.insert("previous_error".to_string(), "syntax error".to_string());
        let second = manager.render(GENERATE_TEMPLATE, &retry).unwrap();
        assert!(second.contains("Previous code:\ndefine add(a b) end"));
        assert!(second.contains("syntax error"));
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let rendered = substitute(
            "{previous_code}\n---\n{previous_error}",
            &vars(&[
                ("previous_code", "define f() raise '{previous_error}' end"),
                ("previous_error", "SyntaxError: {shaped_spec}"),
                ("shaped_spec", "unused"),
            ]),
        );
        assert_eq!(
            rendered,
            "define f() raise '{previous_error}' end\n---\nSyntaxError: {shaped_spec}"
        );
        assert_eq!(substitute("{missing} {x}", &vars(&[("x", "1")])), "{missing} 1");
    }

    #[test]
    fn map_literal_braces_are_not_placeholders() {
        let found: Vec<&str> = placeholders("{key: maps} and {name} and {1x}").collect();
        assert_eq!(found, vec!["name"]);
    }

    #[test]
    fn unknown_template_is_an_error() {
        let err = PromptManager::default()
            .render("missing", &TemplateVars::new())
            .unwrap_err();
        assert!(matches!(err, CompletionError::Template(_)));
    }

    #[test]
    fn file_store_overrides_single_sections() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("shape")).unwrap();
        fs::write(dir.path().join("shape").join("role.md"), "CUSTOM ROLE for {class_name}").unwrap();

        let manager = PromptManager::for_directory(Some(dir.path()));
        let rendered = manager
            .render(
                SHAPE_TEMPLATE,
                &vars(&[
                    ("class_name", "Widget"),
                    ("ivars", ""),
                    ("methods", ""),
                    ("scope_instruction", ""),
                    ("raw_prompt", "count things"),
                ]),
            )
            .unwrap();
        assert!(rendered.starts_with("CUSTOM ROLE for Widget"));
        assert!(rendered.contains("count things"));
    }
}
