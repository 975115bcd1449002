// UnitScript Runtime Error Handling Tests
// Tests for runtime error detection and handling

use unitscript::parser::parse;
use unitscript::runtime::{ProgramHost, RuntimeError, Value, MAX_VALUE_LENGTH};

/// Test runner for runtime error tests
struct RuntimeErrorTestRunner;

impl RuntimeErrorTestRunner {
    fn run(&self, body: &str) -> Result<Value, RuntimeError> {
        let source = format!("define main()\n{}\nend", body);
        let units = parse(&source).expect("Should parse successfully");
        ProgramHost::new(units).invoke("main", vec![])
    }

    fn run_error_test(&self, body: &str, expected_error_contains: &str) -> Result<(), String> {
        match self.run(body) {
            Ok(result) => Err(format!(
                "Expected error containing '{}', but got success: {:?}",
                expected_error_contains, result
            )),
            Err(error) => {
                let error_string = format!("{:?}", error);
                if error_string.contains(expected_error_contains) {
                    Ok(())
                } else {
                    Err(format!(
                        "Expected error containing '{}', but got: {}",
                        expected_error_contains, error_string
                    ))
                }
            }
        }
    }
}

#[test]
fn test_type_errors() {
    let runner = RuntimeErrorTestRunner;
    let cases = [
        ("1 + 'a'", "TypeError"),
        ("'a' - 1", "TypeError"),
        ("-'a'", "TypeError"),
        ("len(5)", "TypeError"),
        ("1 < 'b'", "TypeError"),
    ];
    for (body, expected) in cases {
        runner.run_error_test(body, expected).unwrap_or_else(|e| panic!("{}: {}", body, e));
    }
}

#[test]
fn test_arithmetic_errors() {
    let runner = RuntimeErrorTestRunner;
    runner.run_error_test("10 / 0", "DivisionByZero").unwrap();
    runner.run_error_test("10 % 0", "DivisionByZero").unwrap();
    runner.run_error_test("1.5 / 0", "DivisionByZero").unwrap();
    runner
        .run_error_test("9223372036854775807 + 1", "ArithmeticOverflow")
        .unwrap();
}

#[test]
fn test_lookup_errors() {
    let runner = RuntimeErrorTestRunner;
    runner.run_error_test("missing_unit(1)", "UndefinedSymbol").unwrap();
    runner.run_error_test("undefined_name", "UndefinedSymbol").unwrap();
    runner.run_error_test("[1, 2][5]", "IndexOutOfBounds").unwrap();
    runner.run_error_test("let m = {a: 1}\nm['b'] += 1", "KeyNotFound").unwrap();
    runner.run_error_test("len(1, 2)", "ArityMismatch").unwrap();
}

#[test]
fn test_raise_and_control_flow() {
    let runner = RuntimeErrorTestRunner;
    match runner.run("raise 'bad input: ' + str(42)") {
        Err(RuntimeError::Raised(message)) => assert_eq!(message, "bad input: 42"),
        other => panic!("Expected raised error, got {:?}", other),
    }
    runner.run_error_test("break", "InvalidControlFlow").unwrap();
}

#[test]
fn test_missing_map_keys_read_as_nil() {
    let runner = RuntimeErrorTestRunner;
    assert_eq!(runner.run("{a: 1}['b']").unwrap(), Value::Nil);
}

#[test]
fn test_oversized_values_are_errors() {
    let runner = RuntimeErrorTestRunner;
    runner
        .run_error_test("'ab' * 9223372036854775807", "exceeds")
        .unwrap();
    runner
        .run_error_test(&format!("'x' * {}", MAX_VALUE_LENGTH + 1), "exceeds")
        .unwrap();
    runner
        .run_error_test("let s = 'ab'\nwhile true do\n  s = s + s\nend", "exceeds")
        .unwrap();
    runner
        .run_error_test("let xs = [1]\nwhile true do\n  xs = xs + xs\nend", "exceeds")
        .unwrap();
    runner.run_error_test("'ab' * -1", "negative repeat count").unwrap();
    assert_eq!(runner.run("'ab' * 3").unwrap(), Value::from("ababab"));
}

#[test]
fn test_deep_recursion_is_a_stack_overflow_error() {
    let result = std::thread::spawn(|| {
        let units = parse("define r(n)\n  if n == 0 then return 0 end\n  return 1 + r(n - 1)\nend")
            .expect("Should parse successfully");
        ProgramHost::new(units).invoke("r", vec![Value::Integer(1000)])
    })
    .join()
    .expect("recursion should stop before the thread stack overflows");

    match result {
        Err(RuntimeError::StackOverflow(name)) => assert_eq!(name, "r"),
        other => panic!("Expected stack overflow, got {:?}", other),
    }
}
