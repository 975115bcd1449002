use pretty_assertions::assert_eq;
use proptest::prelude::*;
use selfagency::validate::{denylist, find_forbidden, DenyCategory};
use selfagency::{sanitize, validate, validate_or_raise, ValidationOutcome};

const FORBIDDEN_SNIPPETS: &[&str] = &[
    "system('ls')",
    "exec('ls')",
    "spawn('worker')",
    "fork()",
    "kill(1)",
    "abort()",
    "exit(0)",
    "run_shell('ls')",
    "shell('ls')",
    "`ls -la`",
    "%x(ls)",
    "File.read('/etc/passwd')",
    "IO.popen('ls')",
    "Dir.glob('*')",
    "Socket.new('h', 1)",
    "open('notes.txt')",
    "Process.pid",
    "Kernel.exit",
    "Open3.capture2('ls')",
    "require('net/http')",
    "load('x')",
    "import('os')",
    "eval('1 + 1')",
    "instance_eval('x')",
    "compile('x')",
    "send('delete')",
    "public_send('x')",
    "method('x')",
    "instance_variable_get('@secret')",
    "set_field('x', 1)",
    "const_get('X')",
    "define_method('x')",
    "remove_method('x')",
    "ObjectSpace",
    "BasicObject",
    "Binding",
];

fn forbidden_snippet() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(FORBIDDEN_SNIPPETS)
}

fn binary_op() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(&["+", "-", "*", "%", "==", "<", ">="][..])
}

proptest! {
    #[test]
    fn denylisted_code_never_validates(
        name in "[a-z]{1,8}",
        value in 0i64..1000,
        snippet in forbidden_snippet(),
        before in proptest::bool::ANY,
    ) {
        let body = if before {
            format!("{}\n  let v = {}", snippet, value)
        } else {
            format!("let v = {}\n  {}", value, snippet)
        };
        let code = format!("define unit_{}(x)\n  {}\nend", name, body);
        let outcome = validate(&code);
        prop_assert!(
            matches!(outcome, ValidationOutcome::SecurityViolation { .. }),
            "{:?} for code:\n{}",
            outcome,
            code
        );
    }

    #[test]
    fn clean_units_validate(
        name in "[a-z]{1,8}",
        op in binary_op(),
        constant in -1000i64..1000,
        factor in 1i64..50,
    ) {
        let code = format!(
            "define calc_{name}(a, b)\n  let total = a {op} b\n  if total == {constant}\n    return nil\n  end\n  [total, b * {factor}]\nend",
            name = name,
            op = op,
            constant = constant,
            factor = factor
        );
        prop_assert_eq!(validate(&code), ValidationOutcome::Ok, "code:\n{}", code);
    }

    #[test]
    fn sanitize_is_idempotent(body in "[a-z ()+\n]{0,40}") {
        let raw = format!("```unitscript\n{}\n```", body);
        let once = sanitize(&raw);
        prop_assert_eq!(sanitize(&once), once.clone());
    }
}

#[test]
fn run_shell_is_flagged_as_shell_execution() {
    let err = validate_or_raise("define hack() run_shell('ls') end", None).unwrap_err();
    assert!(err.is_security());
    assert_eq!(err.matched_pattern(), Some("run_shell"));
    assert!(err.to_string().contains("shell execution"));
}

#[test]
fn reported_pattern_is_the_earliest_exact_substring() {
    let hit = find_forbidden("define f()\n  x = `date`\n  system('ls')\nend").unwrap();
    assert_eq!(hit.matched, "`");
    assert_eq!(hit.category, DenyCategory::ShellExecution);

    let hit = find_forbidden("define f() File .write('x') end").unwrap();
    assert_eq!(hit.matched, "File .");
    assert_eq!(hit.category, DenyCategory::RawIo);
}

#[test]
fn every_rule_is_anchored_on_some_snippet() {
    for rule in denylist() {
        assert!(
            FORBIDDEN_SNIPPETS
                .iter()
                .any(|snippet| regex::Regex::new(rule.pattern()).unwrap().is_match(snippet)),
            "no test snippet for rule {} ({})",
            rule.pattern(),
            rule.category
        );
    }
}

#[test]
fn structural_and_syntax_failures() {
    assert_eq!(validate(""), ValidationOutcome::Empty);
    assert_eq!(validate("return 1 + 2"), ValidationOutcome::MissingStructure);
    assert!(matches!(
        validate("define broken(a, b\n  a + b\nend"),
        ValidationOutcome::SyntaxError(_)
    ));
}
