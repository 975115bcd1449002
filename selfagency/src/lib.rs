//! Self-Agency: runtime generation, validation, installation and repair of
//! executable units.
//!
//! A caller describes new behavior in plain language. The
//! [`GenerationController`] asks a completion service for UnitScript code,
//! sanitizes and validates it, then installs the units into an isolated
//! execution context attached to an [`Owner`] or [`OwnerType`]. When an
//! installed unit later fails, the [`RepairController`] regenerates the unit
//! the fault is attributed to, and a [`TaskRunner`] drives that loop for a
//! task entry point.
//!
//! ```no_run
//! use selfagency::{configure, GenerationController, OwnerType, ScopeKind};
//! use selfagency::completion::service_from_config;
//!
//! let config = configure(|c| c.model = "qwen3-coder:30b".to_string())?;
//! let generator = GenerationController::new(service_from_config(&config).unwrap());
//! let calculator = OwnerType::builder("Calculator").build()?;
//! let owner = calculator.instantiate();
//! let names = generator.generate(&owner, "add two numbers", ScopeKind::Instance)?;
//! assert_eq!(names, vec!["add"]);
//! # Ok::<(), selfagency::AgencyError>(())
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod owner;
pub mod prompt;
pub mod registry;
pub mod repair;
pub mod sandbox;
pub mod sanitize;
pub mod shaping;
pub mod task;
pub mod trace;
pub mod validate;

pub use completion::{CompletionError, CompletionService, OpenAiCompatibleService, StubCompletionService, TemplateVars};
pub use config::{configure, configure_with, ensure_configured, is_configured, reset, Configuration, ProviderKind};
pub use error::{AgencyError, AgencyResult, Stage, ValidationErrorKind};
pub use generator::{AttemptRecord, GenerationController, GenerationReport, GenerationRequest, InstallHook, NoopHook, PipelineState};
pub use owner::{Introspection, Owner, OwnerType, OwnerTypeBuilder, Target};
pub use registry::{ExecutionRegistry, GeneratedUnit, OwnerRef, ScopeKind};
pub use repair::{RepairController, RepairLogEntry};
pub use sanitize::sanitize;
pub use task::{TaskOutcome, TaskRunner, MAX_REPAIR_ATTEMPTS};
pub use trace::{Fault, Frame, FrameOrigin};
pub use unitscript::Value;
pub use validate::{validate, validate_or_raise, ValidationOutcome};
