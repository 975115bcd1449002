//! Boundary to the code-writing completion service.
//!
//! The pipeline only ever asks for "template X rendered with these vars" and
//! treats any error as "no result". [`StubCompletionService`] scripts the
//! answers for tests; [`OpenAiCompatibleService`] talks to any server that
//! speaks the OpenAI chat completions protocol (Ollama, OpenAI, OpenRouter,
//! local servers).

use crate::config::{Configuration, ProviderKind};
use crate::prompt::PromptManager;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Template variables, in insertion order.
pub type TemplateVars = IndexMap<String, String>;

#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Transport(String),
    #[error("completion service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
    #[error("completion service returned no content")]
    EmptyResponse,
    #[error("prompt template error: {0}")]
    Template(String),
    #[error("no scripted response left for template '{0}'")]
    Exhausted(String),
    #[error("{0}")]
    Scripted(String),
}

impl CompletionError {
    /// Transport failures and 5xx/429 responses are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            CompletionError::Transport(_) => true,
            CompletionError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub trait CompletionService: Send + Sync {
    fn complete(&self, template: &str, vars: &TemplateVars) -> Result<String, CompletionError>;
}

impl<T: CompletionService + ?Sized> CompletionService for Arc<T> {
    fn complete(&self, template: &str, vars: &TemplateVars) -> Result<String, CompletionError> {
        (**self).complete(template, vars)
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Text(String),
    Failure(String),
}

#[derive(Debug, Default)]
struct Script {
    queue: VecDeque<Scripted>,
    repeat_last: bool,
}

/// One recorded request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionCall {
    pub template: String,
    pub vars: TemplateVars,
}

impl CompletionCall {
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Deterministic completion service: answers each template from its own
/// script, in order, and records every call.
#[derive(Debug, Default)]
pub struct StubCompletionService {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<CompletionCall>>,
}

impl StubCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, template: &str, entry: Scripted, repeat_last: bool) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
            let script = scripts.entry(template.to_string()).or_default();
            script.queue.push_back(entry);
            script.repeat_last = repeat_last;
        }
        self
    }

    /// Queue one answer for `template`.
    pub fn respond(self, template: &str, text: impl Into<String>) -> Self {
        self.push(template, Scripted::Text(text.into()), false)
    }

    /// Queue one failure for `template`.
    pub fn fail(self, template: &str, message: impl Into<String>) -> Self {
        self.push(template, Scripted::Failure(message.into()), false)
    }

    /// Queue `text` and keep answering with it once the rest of the script is used up.
    pub fn always(self, template: &str, text: impl Into<String>) -> Self {
        self.push(template, Scripted::Text(text.into()), true)
    }

    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_for(&self, template: &str) -> Vec<CompletionCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.template == template)
            .collect()
    }

    pub fn call_count(&self, template: &str) -> usize {
        self.calls_for(template).len()
    }
}

impl CompletionService for StubCompletionService {
    fn complete(&self, template: &str, vars: &TemplateVars) -> Result<String, CompletionError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CompletionCall {
                template: template.to_string(),
                vars: vars.clone(),
            });

        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        let script = scripts
            .get_mut(template)
            .ok_or_else(|| CompletionError::Exhausted(template.to_string()))?;
        let next = if script.repeat_last && script.queue.len() == 1 {
            script.queue.front().cloned()
        } else {
            script.queue.pop_front()
        };
        match next {
            Some(Scripted::Text(text)) => Ok(text),
            Some(Scripted::Failure(message)) => Err(CompletionError::Scripted(message)),
            None => Err(CompletionError::Exhausted(template.to_string())),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Blocking client for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompatibleService {
    client: reqwest::blocking::Client,
    model: String,
    api_base: String,
    api_key: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
    prompts: PromptManager,
}

impl OpenAiCompatibleService {
    pub fn from_config(config: &Configuration) -> Result<Self, CompletionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CompletionError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            prompts: PromptManager::for_directory(config.template_directory.as_deref()),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn send_once(&self, prompt: &str) -> Result<String, CompletionError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|e| CompletionError::Transport(format!("failed to read response body: {}", e)))?;
        if !status.is_success() {
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_chat_response(&text)
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_chat_response(body: &str) -> Result<String, CompletionError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or(CompletionError::EmptyResponse)?;
    if content.trim().is_empty() {
        return Err(CompletionError::EmptyResponse);
    }
    Ok(content)
}

impl CompletionService for OpenAiCompatibleService {
    fn complete(&self, template: &str, vars: &TemplateVars) -> Result<String, CompletionError> {
        let prompt = self.prompts.render(template, vars)?;
        let mut attempt = 0;
        loop {
            match self.send_once(&prompt) {
                Ok(content) => return Ok(content),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "completion request to {} failed ({}), retry {}/{}",
                        self.endpoint(),
                        e,
                        attempt,
                        self.max_retries
                    );
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Build the completion service named by `config.provider`. The stub provider
/// has no script and answers nothing.
pub fn service_from_config(
    config: &Configuration,
) -> Result<Arc<dyn CompletionService>, CompletionError> {
    match config.provider {
        ProviderKind::Stub => Ok(Arc::new(StubCompletionService::new())),
        ProviderKind::Ollama | ProviderKind::OpenAI | ProviderKind::Local => {
            Ok(Arc::new(OpenAiCompatibleService::from_config(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stub_answers_in_order_and_records_calls() {
        let stub = StubCompletionService::new()
            .respond("generate", "first")
            .fail("generate", "boom")
            .respond("shape", "spec");
        let mut vars = TemplateVars::new();
        vars.insert("class_name".to_string(), "Widget".to_string());

        assert_eq!(stub.complete("generate", &vars).unwrap(), "first");
        assert!(matches!(
            stub.complete("generate", &vars),
            Err(CompletionError::Scripted(msg)) if msg == "boom"
        ));
        assert!(matches!(
            stub.complete("generate", &vars),
            Err(CompletionError::Exhausted(_))
        ));
        assert_eq!(stub.complete("shape", &vars).unwrap(), "spec");

        assert_eq!(stub.call_count("generate"), 3);
        assert_eq!(stub.calls_for("shape")[0].var("class_name"), Some("Widget"));
    }

    #[test]
    fn always_repeats_after_the_queue() {
        let stub = StubCompletionService::new()
            .respond("generate", "one")
            .always("generate", "again");
        let vars = TemplateVars::new();
        let answers: Vec<String> = (0..4)
            .map(|_| stub.complete("generate", &vars).unwrap())
            .collect();
        assert_eq!(answers, vec!["one", "again", "again", "again"]);
    }

    #[test]
    fn chat_response_content_is_extracted() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"define f() 1 end"}}]}"#;
        assert_eq!(parse_chat_response(body).unwrap(), "define f() 1 end");
        assert!(matches!(
            parse_chat_response(r#"{"choices":[]}"#),
            Err(CompletionError::EmptyResponse)
        ));
        assert!(matches!(
            parse_chat_response("not json"),
            Err(CompletionError::MalformedResponse(_))
        ));
    }

    #[test]
    fn transient_errors() {
        assert!(CompletionError::Transport("reset".into()).is_transient());
        assert!(CompletionError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!CompletionError::Http { status: 401, body: String::new() }.is_transient());
        assert!(!CompletionError::EmptyResponse.is_transient());
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = Configuration {
            api_base: "http://localhost:11434/v1/".to_string(),
            ..Configuration::default()
        };
        let service = OpenAiCompatibleService::from_config(&config).unwrap();
        assert_eq!(service.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
