//! The generate → sanitize → validate → install pipeline.

use crate::completion::{service_from_config, CompletionService};
use crate::config::{ensure_configured, Configuration};
use crate::error::{AgencyError, AgencyResult, Stage, ValidationErrorKind};
use crate::owner::Target;
use crate::prompt::GENERATE_TEMPLATE;
use crate::registry::{OwnerRef, ScopeKind};
use crate::sandbox::SandboxInstaller;
use crate::sanitize::sanitize;
use crate::shaping::{introspection_vars, Shaper, TemplateShaper};
use crate::validate::validate_or_raise;
use itertools::Itertools;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Shaping,
    Generating,
    Sanitizing,
    Validating,
    Retrying,
    Installing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Shaping => "shaping",
            PipelineState::Generating => "generating",
            PipelineState::Sanitizing => "sanitizing",
            PipelineState::Validating => "validating",
            PipelineState::Retrying => "retrying",
            PipelineState::Installing => "installing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// What one pipeline run was asked to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub description: String,
    pub scope: ScopeKind,
    pub owner: OwnerRef,
}

/// One rejected generation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub error_kind: String,
    pub error_detail: String,
    pub rejected_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub request: GenerationRequest,
    /// Installed unit names, each once, in order of first appearance.
    pub units: Vec<String>,
    pub attempts: Vec<AttemptRecord>,
    pub shaped_spec: String,
}

/// Notified once for every unit the pipeline installs.
pub trait InstallHook: Send + Sync {
    fn unit_installed(&self, name: &str, scope: ScopeKind, source: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl InstallHook for NoopHook {
    fn unit_installed(&self, _name: &str, _scope: ScopeKind, _source: &str) {}
}

struct Pipeline {
    state: PipelineState,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            state: PipelineState::Idle,
        }
    }

    fn enter(&mut self, next: PipelineState) {
        log::debug!("pipeline: {} -> {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: AgencyError) -> AgencyError {
        self.enter(PipelineState::Failed);
        err
    }
}

pub struct GenerationController {
    service: Arc<dyn CompletionService>,
    shaper: Arc<dyn Shaper>,
    hook: Arc<dyn InstallHook>,
    /// Used instead of the global configuration when set.
    config: Option<Configuration>,
}

impl GenerationController {
    /// Controller that shapes and generates through `service`.
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self {
            shaper: Arc::new(TemplateShaper::new(Arc::clone(&service))),
            service,
            hook: Arc::new(NoopHook),
            config: None,
        }
    }

    /// Controller for the provider named in `config`, bound to that configuration.
    pub fn from_config(config: Configuration) -> AgencyResult<Self> {
        config.validate()?;
        let service = service_from_config(&config)
            .map_err(|e| AgencyError::Configuration(e.to_string()))?;
        Ok(Self::new(service).with_config(config))
    }

    pub fn with_shaper<S: Shaper + 'static>(mut self, shaper: S) -> Self {
        self.shaper = Arc::new(shaper);
        self
    }

    pub fn with_hook<H: InstallHook + 'static>(mut self, hook: H) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    pub fn with_config(mut self, config: Configuration) -> Self {
        self.config = Some(config);
        self
    }

    fn configuration(&self) -> AgencyResult<Configuration> {
        match &self.config {
            Some(config) => {
                config.validate()?;
                Ok(config.clone())
            }
            None => ensure_configured(),
        }
    }

    /// Generate units from `description` and install them for `scope` on
    /// `target`. Returns the installed unit names.
    pub fn generate<'a>(
        &self,
        target: impl Into<Target<'a>>,
        description: &str,
        scope: ScopeKind,
    ) -> AgencyResult<Vec<String>> {
        self.generate_with_report(target, description, scope)
            .map(|report| report.units)
    }

    pub fn generate_with_report<'a>(
        &self,
        target: impl Into<Target<'a>>,
        description: &str,
        scope: ScopeKind,
    ) -> AgencyResult<GenerationReport> {
        let config = self.configuration()?;
        let target = target.into();
        if !target.supports(scope) {
            return Err(AgencyError::Validation {
                kind: ValidationErrorKind::UnknownScope,
                detail: format!(
                    "{} scope needs an instance of {}",
                    scope,
                    target.owner_type().name()
                ),
                attempt: None,
                generated_code: None,
            });
        }

        let request = GenerationRequest {
            description: description.to_string(),
            scope,
            owner: target.owner_ref(),
        };
        let context = target.introspect();
        let _span = tracing::info_span!("generate", owner = %request.owner, scope = %scope).entered();
        let mut pipeline = Pipeline::new();

        pipeline.enter(PipelineState::Shaping);
        let shaped_spec = match self.shaper.shape(&context, description, scope) {
            Some(spec) => spec,
            None => {
                return Err(pipeline.fail(AgencyError::generation(
                    Stage::Shape,
                    None,
                    "shaping produced no specification",
                )))
            }
        };

        let max_attempts = config.generation_retries;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut accepted = None;
        for attempt in 1..=max_attempts {
            pipeline.enter(PipelineState::Generating);
            let mut vars = introspection_vars(&context);
            vars.insert("shaped_spec".to_string(), shaped_spec.clone());
            if let Some(last) = attempts.last() {
                vars.insert("previous_code".to_string(), last.rejected_code.clone());
                vars.insert("previous_error".to_string(), last.error_detail.clone());
            }

            let raw = self
                .service
                .complete(GENERATE_TEMPLATE, &vars)
                .map_err(|e| {
                    pipeline.fail(AgencyError::generation(Stage::Generate, Some(attempt), e.to_string()))
                })?;

            pipeline.enter(PipelineState::Sanitizing);
            let code = sanitize(&raw);

            pipeline.enter(PipelineState::Validating);
            match validate_or_raise(&code, Some(attempt)) {
                Ok(()) => {
                    accepted = Some(code);
                    break;
                }
                Err(err) if attempt < max_attempts => {
                    log::warn!(
                        "attempt {}/{} for {} rejected: {}",
                        attempt,
                        max_attempts,
                        context.type_name,
                        err
                    );
                    attempts.push(AttemptRecord {
                        attempt_number: attempt,
                        error_kind: err.kind_name().to_string(),
                        error_detail: err.to_string(),
                        rejected_code: code,
                    });
                    pipeline.enter(PipelineState::Retrying);
                }
                Err(err) => {
                    log::error!(
                        "giving up on {} after {} attempts: {}",
                        context.type_name,
                        max_attempts,
                        err
                    );
                    return Err(pipeline.fail(err.with_attempt(max_attempts)));
                }
            }
        }
        let code = accepted.ok_or_else(|| {
            AgencyError::generation(Stage::Generate, Some(max_attempts), "no attempt produced code")
        })?;

        pipeline.enter(PipelineState::Installing);
        let installed = SandboxInstaller::install(target, scope, &code, description)
            .map_err(|e| pipeline.fail(e))?;
        for unit in &installed {
            self.hook.unit_installed(&unit.name, scope, &unit.source);
        }
        pipeline.enter(PipelineState::Done);

        Ok(GenerationReport {
            request,
            units: installed.into_iter().map(|unit| unit.name).unique().collect(),
            attempts,
            shaped_spec,
        })
    }
}
