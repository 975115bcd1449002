mod common;

use common::{controller, passthrough_controller, RecordingHook};
use pretty_assertions::assert_eq;
use selfagency::{
    AgencyError, Configuration, GenerationController, OwnerType, ScopeKind, Stage,
    StubCompletionService, Value,
};
use std::sync::{Arc, Mutex};

const ADD_UNIT: &str = "define add(a,b) return a+b end";

fn calculator() -> Arc<OwnerType> {
    OwnerType::builder("Calculator")
        .field("total", Value::Integer(0))
        .build()
        .expect("Calculator should build")
}

#[test]
fn generated_add_unit_is_callable() {
    let stub = Arc::new(
        StubCompletionService::new()
            .respond("shape", "Define add(a, b) returning the sum of a and b.")
            .respond("generate", ADD_UNIT),
    );
    let owner = calculator().instantiate();

    let names = controller(&stub)
        .generate(&owner, "add two numbers", ScopeKind::Singleton)
        .expect("generation should succeed");

    assert_eq!(names, vec!["add"]);
    assert_eq!(
        owner.invoke("add", vec![Value::Integer(3), Value::Integer(7)]).unwrap(),
        Value::Integer(10)
    );
    assert_eq!(owner.lookup_source("add").as_deref(), Some(ADD_UNIT));

    let generate_call = &stub.calls_for("generate")[0];
    assert_eq!(generate_call.var("class_name"), Some("Calculator"));
    assert_eq!(generate_call.var("ivars"), Some("total"));
    assert_eq!(
        generate_call.var("shaped_spec"),
        Some("Define add(a, b) returning the sum of a and b.")
    );
    assert_eq!(generate_call.var("previous_code"), None);
}

#[test]
fn response_artifacts_are_stripped_before_install() {
    let stub = Arc::new(StubCompletionService::new().respond(
        "generate",
        "<think>\nThe user wants doubling.\n</think>\n```unitscript\ndefine double(x)\n  x * 2\nend\n```\n",
    ));
    let owner = calculator().instantiate();
    passthrough_controller(&stub)
        .generate(&owner, "double a number", ScopeKind::Instance)
        .unwrap();
    assert_eq!(
        owner.lookup_source("double").as_deref(),
        Some("define double(x)\n  x * 2\nend")
    );
}

#[test]
fn always_invalid_output_exhausts_the_retry_bound() {
    let stub = Arc::new(StubCompletionService::new().always("generate", "Sorry, I cannot help with that."));
    let owner = calculator().instantiate();

    let err = passthrough_controller(&stub)
        .generate(&owner, "add two numbers", ScopeKind::Instance)
        .unwrap_err();

    assert!(err.is_validation(), "unexpected error: {}", err);
    assert_eq!(err.attempt(), Some(3));
    assert_eq!(err.generated_code(), Some("Sorry, I cannot help with that."));
    assert_eq!(stub.call_count("generate"), 3);
    assert!(owner.installed_unit_names().is_empty());
}

#[test]
fn retry_bound_follows_configuration() {
    let stub = Arc::new(StubCompletionService::new().always("generate", ""));
    let owner = calculator().instantiate();
    let config = Configuration {
        generation_retries: 5,
        ..Configuration::default()
    };

    let err = passthrough_controller(&stub)
        .with_config(config)
        .generate(&owner, "anything", ScopeKind::Instance)
        .unwrap_err();

    assert_eq!(err.attempt(), Some(5));
    assert_eq!(stub.call_count("generate"), 5);
}

#[test]
fn security_violations_are_retried_then_reported() {
    let stub = Arc::new(
        StubCompletionService::new().always("generate", "define hack()\n  run_shell('ls')\nend"),
    );
    let owner = calculator().instantiate();

    let err = passthrough_controller(&stub)
        .generate(&owner, "list files", ScopeKind::Singleton)
        .unwrap_err();

    match &err {
        AgencyError::Security {
            matched_pattern,
            rule,
            attempt,
            ..
        } => {
            assert_eq!(matched_pattern, "run_shell");
            assert_eq!(rule, "shell execution");
            assert_eq!(*attempt, Some(3));
        }
        other => panic!("Expected security error, got {:?}", other),
    }
    assert_eq!(stub.call_count("generate"), 3);
    assert!(!owner.responds_to("hack"));
}

#[test]
fn second_attempt_receives_feedback() {
    let stub = Arc::new(
        StubCompletionService::new()
            .respond("generate", "```\ndefine add(a, b)\n  return a +\nend\n```")
            .respond("generate", ADD_UNIT),
    );
    let owner = calculator().instantiate();

    let report = passthrough_controller(&stub)
        .generate_with_report(&owner, "add two numbers", ScopeKind::Instance)
        .unwrap();

    assert_eq!(report.units, vec!["add"]);
    let calls = stub.calls_for("generate");
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].var("previous_code"), None);
    assert_eq!(
        calls[1].var("previous_code"),
        Some("define add(a, b)\n  return a +\nend")
    );
    let previous_error = calls[1].var("previous_error").unwrap_or_default();
    assert!(previous_error.contains("syntax"), "feedback was: {}", previous_error);
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].error_kind, "ValidationError");
}

#[test]
fn shaping_failure_stops_before_generation() {
    let stub = Arc::new(
        StubCompletionService::new()
            .fail("shape", "model unavailable")
            .respond("generate", ADD_UNIT),
    );
    let owner = calculator().instantiate();

    let err = controller(&stub)
        .generate(&owner, "add two numbers", ScopeKind::Instance)
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Shape));
    assert_eq!(stub.call_count("generate"), 0);
}

#[test]
fn completion_failure_surfaces_immediately() {
    let stub = Arc::new(StubCompletionService::new().fail("generate", "connection refused"));
    let owner = calculator().instantiate();

    let err = passthrough_controller(&stub)
        .generate(&owner, "add two numbers", ScopeKind::Instance)
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::Generate));
    assert_eq!(err.attempt(), Some(1));
    assert!(err.to_string().contains("connection refused"));
    assert_eq!(stub.call_count("generate"), 1);
}

static GLOBAL_CONFIG: Mutex<()> = Mutex::new(());

#[test]
fn missing_configuration_is_reported_before_any_work() {
    let _guard = GLOBAL_CONFIG.lock().unwrap_or_else(|e| e.into_inner());
    selfagency::reset();
    let stub = Arc::new(StubCompletionService::new().respond("generate", ADD_UNIT));
    let owner = calculator().instantiate();

    let err = GenerationController::new(stub.clone())
        .generate(&owner, "add two numbers", ScopeKind::Instance)
        .unwrap_err();
    assert!(matches!(err, AgencyError::Configuration(_)));
    assert!(stub.calls().is_empty());

    selfagency::configure(|c| c.generation_retries = 2).unwrap();
    let names = GenerationController::new(stub.clone())
        .with_shaper(selfagency::shaping::PassthroughShaper)
        .generate(&owner, "add two numbers", ScopeKind::Instance)
        .unwrap();
    assert_eq!(names, vec!["add"]);
    selfagency::reset();
}

#[test]
fn install_hook_sees_every_unit() {
    let stub = Arc::new(StubCompletionService::new().respond(
        "generate",
        "define area(w, h)\n  w * h\nend\n\ndefine perimeter(w, h)\n  2 * (w + h)\nend",
    ));
    let hook = RecordingHook::default();
    let owner = calculator().instantiate();

    let names = passthrough_controller(&stub)
        .with_hook(hook.clone())
        .generate(&owner, "rectangle helpers", ScopeKind::Instance)
        .unwrap();

    assert_eq!(names, vec!["area", "perimeter"]);
    assert_eq!(hook.names(), vec!["area", "perimeter"]);
    let installed = hook.installed.lock().unwrap();
    assert_eq!(installed[1].1, ScopeKind::Instance);
    assert_eq!(installed[1].2, "define perimeter(w, h)\n  2 * (w + h)\nend");
}

#[test]
fn duplicate_names_in_one_response_keep_the_last_definition() {
    let stub = Arc::new(StubCompletionService::new().respond(
        "generate",
        "define f() 1 end\ndefine g() f() + 10 end\ndefine f() 3 end",
    ));
    let owner = calculator().instantiate();

    let names = passthrough_controller(&stub)
        .generate(&owner, "numbers", ScopeKind::Instance)
        .unwrap();

    assert_eq!(names, vec!["f", "g"]);
    assert_eq!(owner.invoke("f", vec![]).unwrap(), Value::Integer(3));
    assert_eq!(owner.invoke("g", vec![]).unwrap(), Value::Integer(13));
}

#[test]
fn type_scope_units_are_called_on_the_type() {
    let stub = Arc::new(
        StubCompletionService::new().respond("generate", "define self.unit_name()\n  'calculator'\nend"),
    );
    let ty = calculator();

    let names = passthrough_controller(&stub)
        .generate(&ty, "name of the type", ScopeKind::Type)
        .unwrap();

    assert_eq!(names, vec!["unit_name"]);
    assert_eq!(ty.invoke("unit_name", vec![]).unwrap(), Value::from("calculator"));
    assert!(!ty.instantiate().responds_to("unit_name"));
}

#[test]
fn generated_units_call_static_capabilities_and_state() {
    let ty = OwnerType::builder("Counter")
        .field("count", Value::Integer(0))
        .script("define bump(n)\n  self.count += n\nend")
        .build()
        .unwrap();
    let owner = ty.instantiate();
    let stub = Arc::new(StubCompletionService::new().respond(
        "generate",
        "define bump_twice(n)\n  bump(n)\n  bump(n)\n  self.count\nend",
    ));

    passthrough_controller(&stub)
        .generate(&owner, "bump twice", ScopeKind::Instance)
        .unwrap();

    assert_eq!(owner.invoke("bump_twice", vec![Value::Integer(4)]).unwrap(), Value::Integer(8));
    assert_eq!(owner.get_field("count"), Some(Value::Integer(8)));
}
