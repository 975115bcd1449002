//! Secure standard library
//!
//! Only pure functions over data are defined here. Nothing in this table can
//! reach the file system, the network, processes or the interpreter itself;
//! a name that is not listed simply does not exist for unit code.

use super::error::{RuntimeError, RuntimeResult};
use super::values::Value;
use indexmap::IndexMap;
use itertools::Itertools;
use lazy_static::lazy_static;
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic(usize), // Minimum number of arguments
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(&self, arg_count: usize) -> bool {
        match self {
            Arity::Fixed(n) => arg_count == *n,
            Arity::Variadic(min) => arg_count >= *min,
            Arity::Range(min, max) => arg_count >= *min && arg_count <= *max,
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Fixed(n) => write!(f, "{}", n),
            Arity::Variadic(min) => write!(f, "at least {}", min),
            Arity::Range(min, max) => write!(f, "{}-{}", min, max),
        }
    }
}

pub type BuiltinFn = fn(&[Value]) -> RuntimeResult<Value>;

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub arity: Arity,
    pub func: BuiltinFn,
}

impl std::fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#<builtin {}/{}>", self.name, self.arity)
    }
}

impl BuiltinFunction {
    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        if !self.arity.accepts(args.len()) {
            return Err(RuntimeError::ArityMismatch {
                function: self.name.to_string(),
                expected: self.arity.to_string(),
                actual: args.len(),
            });
        }
        (self.func)(args)
    }
}

/// Name-indexed table of builtins.
#[derive(Debug, Default, Clone)]
pub struct BuiltinTable {
    functions: HashMap<&'static str, BuiltinFunction>,
}

impl BuiltinTable {
    pub fn define(&mut self, name: &'static str, arity: Arity, func: BuiltinFn) {
        self.functions
            .insert(name, BuiltinFunction { name, arity, func });
    }

    pub fn lookup(&self, name: &str) -> Option<&BuiltinFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.functions.keys().copied().sorted().collect()
    }
}

lazy_static! {
    static ref SECURE_STDLIB: BuiltinTable = SecureStandardLibrary::create_secure_environment();
}

/// Shared, immutable secure standard library.
pub fn secure_stdlib() -> &'static BuiltinTable {
    &SECURE_STDLIB
}

pub struct SecureStandardLibrary;

impl SecureStandardLibrary {
    pub fn create_secure_environment() -> BuiltinTable {
        let mut env = BuiltinTable::default();
        Self::load_math_functions(&mut env);
        Self::load_conversion_functions(&mut env);
        Self::load_collection_functions(&mut env);
        Self::load_string_functions(&mut env);
        env
    }

    pub(crate) fn load_math_functions(env: &mut BuiltinTable) {
        env.define("abs", Arity::Fixed(1), |args| match &args[0] {
            Value::Integer(i) => i
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| RuntimeError::ArithmeticOverflow {
                    operation: "abs".to_string(),
                }),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Err(RuntimeError::type_error("number", other.type_name(), "abs")),
        });
        env.define("min", Arity::Variadic(1), |args| extremum(args, "min", Ordering::Less));
        env.define("max", Arity::Variadic(1), |args| extremum(args, "max", Ordering::Greater));
        env.define("sum", Arity::Fixed(1), |args| {
            let items = expect_list(&args[0], "sum")?;
            items.iter().try_fold(Value::Integer(0), |acc, item| {
                super::evaluator::arithmetic(crate::ast::BinaryOp::Add, &acc, item)
            })
        });
        env.define("round", Arity::Range(1, 2), |args| {
            let n = expect_number(&args[0], "round")?;
            match args.get(1) {
                None => Ok(float_to_integer(n.round(), "round")?),
                Some(Value::Integer(digits)) => {
                    let factor = 10f64.powi(*digits as i32);
                    Ok(Value::Float((n * factor).round() / factor))
                }
                Some(other) => Err(RuntimeError::type_error("integer", other.type_name(), "round")),
            }
        });
        env.define("floor", Arity::Fixed(1), |args| {
            float_to_integer(expect_number(&args[0], "floor")?.floor(), "floor")
        });
        env.define("ceil", Arity::Fixed(1), |args| {
            float_to_integer(expect_number(&args[0], "ceil")?.ceil(), "ceil")
        });
        env.define("sqrt", Arity::Fixed(1), |args| {
            let n = expect_number(&args[0], "sqrt")?;
            if n < 0.0 {
                return Err(RuntimeError::new("sqrt of a negative number"));
            }
            Ok(Value::Float(n.sqrt()))
        });
    }

    pub(crate) fn load_conversion_functions(env: &mut BuiltinTable) {
        env.define("str", Arity::Fixed(1), |args| {
            Ok(Value::String(args[0].to_plain_string()))
        });
        env.define("int", Arity::Fixed(1), |args| match &args[0] {
            Value::Integer(i) => Ok(Value::Integer(*i)),
            Value::Float(f) => float_to_integer(f.trunc(), "int"),
            Value::Boolean(b) => Ok(Value::Integer(*b as i64)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| RuntimeError::new(&format!("cannot convert {:?} to integer", s))),
            other => Err(RuntimeError::type_error("number or string", other.type_name(), "int")),
        });
        env.define("float", Arity::Fixed(1), |args| match &args[0] {
            Value::Integer(i) => Ok(Value::Float(*i as f64)),
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| RuntimeError::new(&format!("cannot convert {:?} to float", s))),
            other => Err(RuntimeError::type_error("number or string", other.type_name(), "float")),
        });
        env.define("type_of", Arity::Fixed(1), |args| {
            Ok(Value::String(args[0].type_name().to_string()))
        });
        env.define("is_nil", Arity::Fixed(1), |args| {
            Ok(Value::Boolean(matches!(args[0], Value::Nil)))
        });
    }

    pub(crate) fn load_collection_functions(env: &mut BuiltinTable) {
        env.define("len", Arity::Fixed(1), |args| {
            args[0]
                .len()
                .map(|n| Value::Integer(n as i64))
                .ok_or_else(|| RuntimeError::type_error("collection or string", args[0].type_name(), "len"))
        });
        env.define("push", Arity::Fixed(2), |args| {
            let mut items = expect_list(&args[0], "push")?.clone();
            items.push(args[1].clone());
            Ok(Value::List(items))
        });
        env.define("first", Arity::Fixed(1), |args| {
            Ok(expect_list(&args[0], "first")?.first().cloned().unwrap_or_default())
        });
        env.define("last", Arity::Fixed(1), |args| {
            Ok(expect_list(&args[0], "last")?.last().cloned().unwrap_or_default())
        });
        env.define("slice", Arity::Range(2, 3), |args| {
            let items = expect_list(&args[0], "slice")?;
            let start = expect_index(&args[1], "slice")?.min(items.len());
            let end = match args.get(2) {
                Some(count) => start.saturating_add(expect_index(count, "slice")?).min(items.len()),
                None => items.len(),
            };
            Ok(Value::List(items[start..end].to_vec()))
        });
        env.define("range", Arity::Range(1, 2), |args| {
            let (start, end) = match args {
                [end] => (0, expect_integer(end, "range")?),
                [start, end, ..] => (expect_integer(start, "range")?, expect_integer(end, "range")?),
                [] => (0, 0),
            };
            if end.saturating_sub(start) > 1_000_000 {
                return Err(RuntimeError::new("range too large"));
            }
            Ok(Value::List((start..end).map(Value::Integer).collect()))
        });
        env.define("sort", Arity::Fixed(1), |args| {
            let mut items = expect_list(&args[0], "sort")?.clone();
            let mut failure = None;
            items.sort_by(|a, b| {
                compare_values(a, b, "sort").unwrap_or_else(|e| {
                    failure.get_or_insert(e);
                    Ordering::Equal
                })
            });
            match failure {
                Some(e) => Err(e),
                None => Ok(Value::List(items)),
            }
        });
        env.define("reverse", Arity::Fixed(1), |args| match &args[0] {
            Value::List(items) => Ok(Value::List(items.iter().rev().cloned().collect())),
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            other => Err(RuntimeError::type_error("list or string", other.type_name(), "reverse")),
        });
        env.define("contains", Arity::Fixed(2), |args| match &args[0] {
            Value::List(items) => Ok(Value::Boolean(items.iter().any(|v| v.loose_eq(&args[1])))),
            Value::String(s) => Ok(Value::Boolean(s.contains(&args[1].to_plain_string()))),
            Value::Map(m) => Ok(Value::Boolean(m.contains_key(&args[1].to_plain_string()))),
            other => Err(RuntimeError::type_error("collection", other.type_name(), "contains")),
        });
        env.define("keys", Arity::Fixed(1), |args| {
            let map = expect_map(&args[0], "keys")?;
            Ok(Value::List(map.keys().cloned().map(Value::String).collect()))
        });
        env.define("values", Arity::Fixed(1), |args| {
            let map = expect_map(&args[0], "values")?;
            Ok(Value::List(map.values().cloned().collect()))
        });
        env.define("get", Arity::Range(2, 3), |args| {
            let fallback = args.get(2).cloned().unwrap_or_default();
            match &args[0] {
                Value::Map(m) => Ok(m.get(&args[1].to_plain_string()).cloned().unwrap_or(fallback)),
                Value::List(items) => {
                    let idx = expect_integer(&args[1], "get")?;
                    Ok(usize::try_from(idx)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .unwrap_or(fallback))
                }
                Value::Nil => Ok(fallback),
                other => Err(RuntimeError::type_error("map or list", other.type_name(), "get")),
            }
        });
        env.define("has_key", Arity::Fixed(2), |args| {
            let map = expect_map(&args[0], "has_key")?;
            Ok(Value::Boolean(map.contains_key(&args[1].to_plain_string())))
        });
        env.define("merge", Arity::Variadic(1), |args| {
            let mut merged = IndexMap::new();
            for arg in args {
                for (k, v) in expect_map(arg, "merge")? {
                    merged.insert(k.clone(), v.clone());
                }
            }
            Ok(Value::Map(merged))
        });
        env.define("put", Arity::Fixed(3), |args| {
            let mut map = expect_map(&args[0], "put")?.clone();
            map.insert(args[1].to_plain_string(), args[2].clone());
            Ok(Value::Map(map))
        });
    }

    pub(crate) fn load_string_functions(env: &mut BuiltinTable) {
        env.define("join", Arity::Range(1, 2), |args| {
            let items = expect_list(&args[0], "join")?;
            let sep = match args.get(1) {
                Some(sep) => expect_string(sep, "join")?.to_string(),
                None => String::new(),
            };
            Ok(Value::String(items.iter().map(Value::to_plain_string).join(&sep)))
        });
        env.define("split", Arity::Range(1, 2), |args| {
            let s = expect_string(&args[0], "split")?;
            let parts: Vec<Value> = match args.get(1) {
                Some(sep) => s
                    .split(expect_string(sep, "split")?)
                    .map(Value::from)
                    .collect(),
                None => s.split_whitespace().map(Value::from).collect(),
            };
            Ok(Value::List(parts))
        });
        env.define("upper", Arity::Fixed(1), |args| {
            Ok(Value::String(expect_string(&args[0], "upper")?.to_uppercase()))
        });
        env.define("lower", Arity::Fixed(1), |args| {
            Ok(Value::String(expect_string(&args[0], "lower")?.to_lowercase()))
        });
        env.define("trim", Arity::Fixed(1), |args| {
            Ok(Value::String(expect_string(&args[0], "trim")?.trim().to_string()))
        });
        env.define("starts_with", Arity::Fixed(2), |args| {
            let s = expect_string(&args[0], "starts_with")?;
            Ok(Value::Boolean(s.starts_with(expect_string(&args[1], "starts_with")?)))
        });
        env.define("ends_with", Arity::Fixed(2), |args| {
            let s = expect_string(&args[0], "ends_with")?;
            Ok(Value::Boolean(s.ends_with(expect_string(&args[1], "ends_with")?)))
        });
        env.define("replace", Arity::Fixed(3), |args| {
            let s = expect_string(&args[0], "replace")?;
            let from = expect_string(&args[1], "replace")?;
            let to = expect_string(&args[2], "replace")?;
            Ok(Value::String(s.replace(from, to)))
        });
    }
}

// --- argument helpers -------------------------------------------------------

fn expect_list<'a>(value: &'a Value, operation: &str) -> RuntimeResult<&'a Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(RuntimeError::type_error("list", other.type_name(), operation)),
    }
}

fn expect_map<'a>(value: &'a Value, operation: &str) -> RuntimeResult<&'a IndexMap<String, Value>> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(RuntimeError::type_error("map", other.type_name(), operation)),
    }
}

fn expect_string<'a>(value: &'a Value, operation: &str) -> RuntimeResult<&'a str> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(RuntimeError::type_error("string", other.type_name(), operation)),
    }
}

fn expect_integer(value: &Value, operation: &str) -> RuntimeResult<i64> {
    match value {
        Value::Integer(i) => Ok(*i),
        other => Err(RuntimeError::type_error("integer", other.type_name(), operation)),
    }
}

fn expect_index(value: &Value, operation: &str) -> RuntimeResult<usize> {
    let i = expect_integer(value, operation)?;
    usize::try_from(i).map_err(|_| RuntimeError::IndexOutOfBounds {
        index: i,
        length: 0,
    })
}

fn expect_number(value: &Value, operation: &str) -> RuntimeResult<f64> {
    value
        .as_number()
        .ok_or_else(|| RuntimeError::type_error("number", value.type_name(), operation))
}

fn float_to_integer(f: f64, operation: &str) -> RuntimeResult<Value> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Ok(Value::Integer(f as i64))
    } else {
        Err(RuntimeError::ArithmeticOverflow {
            operation: operation.to_string(),
        })
    }
}

/// Ordering for numbers and strings; anything else is a type error.
pub(crate) fn compare_values(a: &Value, b: &Value, operation: &str) -> RuntimeResult<Ordering> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| RuntimeError::new("cannot compare NaN")),
            _ => Err(RuntimeError::type_error(
                a.type_name(),
                b.type_name(),
                operation,
            )),
        },
    }
}

fn extremum(args: &[Value], operation: &str, wanted: Ordering) -> RuntimeResult<Value> {
    // A single list argument means "extremum of the list".
    let items: &[Value] = match args {
        [Value::List(items)] => items,
        _ => args,
    };
    let mut best: Option<&Value> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) if compare_values(item, current, operation)? == wanted => Some(item),
            keep => keep,
        };
    }
    Ok(best.cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        secure_stdlib()
            .lookup(name)
            .unwrap_or_else(|| panic!("builtin {} should exist", name))
            .call(&args)
    }

    #[test]
    fn no_host_access_is_exposed() {
        for name in ["system", "exec", "open", "eval", "send", "require", "run_shell"] {
            assert!(!secure_stdlib().contains(name), "{} must not be a builtin", name);
        }
    }

    #[test]
    fn arity_is_checked_before_the_call() {
        match call("len", vec![]) {
            Err(RuntimeError::ArityMismatch { function, actual, .. }) => {
                assert_eq!(function, "len");
                assert_eq!(actual, 0);
            }
            other => panic!("Expected arity mismatch, got {:?}", other),
        }
    }

    #[test]
    fn collection_helpers() {
        let ints = |xs: &[i64]| Value::List(xs.iter().copied().map(Value::Integer).collect());
        assert_eq!(call("sort", vec![ints(&[3, 1, 2])]).unwrap(), ints(&[1, 2, 3]));
        assert_eq!(call("max", vec![ints(&[3, 1, 2])]).unwrap(), Value::Integer(3));
        assert_eq!(call("sum", vec![ints(&[3, 1, 2])]).unwrap(), Value::Integer(6));
        assert_eq!(
            call(
                "join",
                vec![Value::List(vec!["a".into(), Value::Integer(1)]), "-".into()]
            )
            .unwrap(),
            Value::String("a-1".to_string())
        );
    }

    #[test]
    fn sort_rejects_mixed_types() {
        let mixed = Value::List(vec![Value::Integer(1), "a".into()]);
        assert!(matches!(call("sort", vec![mixed]), Err(RuntimeError::TypeError { .. })));
    }
}
