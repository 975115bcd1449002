mod common;

use common::passthrough_controller;
use pretty_assertions::assert_eq;
use selfagency::{validate, OwnerType, ScopeKind, StubCompletionService, ValidationOutcome, Value};
use std::sync::Arc;
use std::thread;

fn robot() -> Arc<OwnerType> {
    OwnerType::builder("Robot")
        .field("name", Value::from("unnamed"))
        .script("define greet()\n  'hello from ' + self.name\nend")
        .build()
        .expect("Robot should build")
}

#[test]
fn reinstalling_a_name_overrides_it_in_place() {
    let stub = Arc::new(
        StubCompletionService::new()
            .respond("generate", "define speed() 1 end")
            .respond("generate", "define speed() 2 end"),
    );
    let ty = robot();
    let owner = ty.instantiate();
    let generator = passthrough_controller(&stub);

    generator.generate(&owner, "speed one", ScopeKind::Instance).unwrap();
    generator.generate(&owner, "speed two", ScopeKind::Instance).unwrap();

    let units = ty.generated_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].source, "define speed() 2 end");
    assert_eq!(units[0].description, "speed two");
    assert_eq!(owner.invoke("speed", vec![]).unwrap(), Value::Integer(2));
}

#[test]
fn singleton_units_are_private_to_one_instance() {
    let stub = Arc::new(StubCompletionService::new().respond("generate", "define secret() 42 end"));
    let ty = robot();
    let a = ty.instantiate();
    let b = ty.instantiate();

    passthrough_controller(&stub)
        .generate(&a, "a secret", ScopeKind::Singleton)
        .unwrap();

    assert_eq!(a.invoke("secret", vec![]).unwrap(), Value::Integer(42));
    assert!(!b.responds_to("secret"));
    assert!(b.lookup_source("secret").is_none());
    assert_eq!(b.invoke("secret", vec![]).unwrap_err().kind(), "UndefinedSymbol");
    assert!(ty.generated_units().is_empty());
    assert!(!ty.instantiate().introspect().capabilities.contains(&"secret".to_string()));
}

#[test]
fn instance_units_are_shared_by_every_instance() {
    let stub = Arc::new(StubCompletionService::new().respond(
        "generate",
        "define introduce()\n  greet() + '!'\nend",
    ));
    let ty = robot();
    let a = ty.instantiate();
    let b = ty.instantiate();
    b.set_field("name", "Bolt").unwrap();

    passthrough_controller(&stub)
        .generate(&a, "introduce yourself", ScopeKind::Instance)
        .unwrap();

    assert_eq!(a.invoke("introduce", vec![]).unwrap(), Value::from("hello from unnamed!"));
    assert_eq!(b.invoke("introduce", vec![]).unwrap(), Value::from("hello from Bolt!"));
}

#[test]
fn installed_sources_revalidate() {
    let stub = Arc::new(StubCompletionService::new().respond(
        "generate",
        "```\n# helpers\ndefine clamp(x, lo, hi)\n  if x < lo then return lo end\n  if x > hi then return hi end\n  x\nend\n\ndefine clamp_all(xs)\n  let out = []\n  for x in xs do\n    out = push(out, clamp(x, 0, 10))\n  end\n  out\nend\n```",
    ));
    let owner = robot().instantiate();

    let names = passthrough_controller(&stub)
        .generate(&owner, "clamp values", ScopeKind::Singleton)
        .unwrap();

    assert_eq!(names, vec!["clamp", "clamp_all"]);
    for name in &names {
        let source = owner.lookup_source(name).unwrap();
        assert_eq!(validate(&source), ValidationOutcome::Ok, "{}", source);
    }
    assert_eq!(
        owner
            .invoke("clamp_all", vec![Value::from(serde_json::json!([-3, 4, 12]))])
            .unwrap(),
        Value::from(serde_json::json!([0, 4, 10]))
    );
}

#[test]
fn lookup_prefers_generated_over_static_source() {
    let stub = Arc::new(StubCompletionService::new().respond("generate", "define greet()\n  'hi'\nend"));
    let owner = robot().instantiate();
    assert_eq!(
        owner.lookup_source("greet").as_deref(),
        Some("define greet()\n  'hello from ' + self.name\nend")
    );

    passthrough_controller(&stub)
        .generate(&owner, "Greet briefly.\nKeep it short.", ScopeKind::Singleton)
        .unwrap();

    assert_eq!(owner.invoke("greet", vec![]).unwrap(), Value::from("hi"));
    assert_eq!(
        owner.annotated_source("greet").as_deref(),
        Some("# Greet briefly.\n# Keep it short.\ndefine greet()\n  'hi'\nend")
    );
}

#[test]
fn installs_from_many_threads_on_one_type() {
    let stub = Arc::new(
        StubCompletionService::new()
            .always("generate", "define shared_step(x)\n  x + 1\nend\ndefine own_step(x)\n  x * 2\nend"),
    );
    let ty = robot();
    let generator = passthrough_controller(&stub);
    let owners: Vec<_> = (0..8).map(|_| ty.instantiate()).collect();

    thread::scope(|s| {
        for (i, owner) in owners.iter().enumerate() {
            let generator = &generator;
            s.spawn(move || {
                let scope = if i % 2 == 0 {
                    ScopeKind::Instance
                } else {
                    ScopeKind::Singleton
                };
                generator
                    .generate(owner, "steps", scope)
                    .expect("concurrent generation should succeed");
                assert_eq!(owner.invoke("own_step", vec![Value::Integer(5)]).unwrap(), Value::Integer(10));
            });
        }
    });

    assert_eq!(stub.call_count("generate"), 8);
    let mut names: Vec<String> = ty.generated_units().into_iter().map(|u| u.name).collect();
    names.sort();
    assert_eq!(names, vec!["own_step", "shared_step"]);
    for owner in &owners {
        assert_eq!(owner.invoke("shared_step", vec![Value::Integer(1)]).unwrap(), Value::Integer(2));
    }
}

#[test]
fn unknown_scope_names_are_validation_errors() {
    let err = "global".parse::<ScopeKind>().unwrap_err();
    assert!(err.is_validation());
    assert_eq!("instance".parse::<ScopeKind>().unwrap(), ScopeKind::Instance);
}
