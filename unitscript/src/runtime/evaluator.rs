// UnitScript evaluator

use super::error::{RuntimeError, RuntimeResult};
use super::host::Host;
use super::stdlib::compare_values;
use super::values::Value;
use crate::ast::{AssignOp, AssignTarget, BinaryOp, Expr, Literal, Statement, UnaryOp, UnitDef};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Upper bound on iterations of a single loop before it is treated as runaway.
pub const DEFAULT_MAX_LOOP_ITERATIONS: usize = 1_000_000;

/// Largest string or list an operator may build.
pub const MAX_VALUE_LENGTH: usize = 1_000_000;

/// Outcome of executing a statement or block.
enum Flow {
    Normal(Value),
    Return(Value),
    Break,
    Next,
}

type Locals = HashMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Evaluator {
    max_loop_iterations: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
        }
    }

    pub fn with_max_loop_iterations(mut self, limit: usize) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    /// Bind `args` to the unit's parameters and run its body. Every call made
    /// by the body is resolved through `host`.
    pub fn call_unit(
        &self,
        unit: &UnitDef,
        args: Vec<Value>,
        host: &mut dyn Host,
    ) -> RuntimeResult<Value> {
        if args.len() != unit.params.len() {
            return Err(RuntimeError::ArityMismatch {
                function: unit.name.clone(),
                expected: unit.params.len().to_string(),
                actual: args.len(),
            });
        }

        let mut locals: Locals = unit.params.iter().cloned().zip(args).collect();
        match self.exec_block(&unit.body, &mut locals, host)? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
            Flow::Break => Err(RuntimeError::InvalidControlFlow(format!(
                "break outside of a loop in {}",
                unit.name
            ))),
            Flow::Next => Err(RuntimeError::InvalidControlFlow(format!(
                "next outside of a loop in {}",
                unit.name
            ))),
        }
    }

    fn exec_block(
        &self,
        statements: &[Statement],
        locals: &mut Locals,
        host: &mut dyn Host,
    ) -> RuntimeResult<Flow> {
        let mut last = Value::Nil;
        for statement in statements {
            match self.exec_statement(statement, locals, host)? {
                Flow::Normal(value) => last = value,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn exec_statement(
        &self,
        statement: &Statement,
        locals: &mut Locals,
        host: &mut dyn Host,
    ) -> RuntimeResult<Flow> {
        match statement {
            Statement::Let { name, value } => {
                let value = self.eval_expr(value, locals, host)?;
                locals.insert(name.clone(), value.clone());
                Ok(Flow::Normal(value))
            }
            Statement::Assign { target, op, value } => {
                let value = self.eval_expr(value, locals, host)?;
                let assigned = self.assign(target, *op, value, locals, host)?;
                Ok(Flow::Normal(assigned))
            }
            Statement::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, locals, host)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
            Statement::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval_expr(condition, locals, host)?.is_truthy() {
                        return self.exec_block(body, locals, host);
                    }
                }
                match otherwise {
                    Some(body) => self.exec_block(body, locals, host),
                    None => Ok(Flow::Normal(Value::Nil)),
                }
            }
            Statement::While { condition, body } => {
                let mut iterations = 0usize;
                while self.eval_expr(condition, locals, host)?.is_truthy() {
                    iterations += 1;
                    self.check_iterations(iterations)?;
                    match self.exec_block(body, locals, host)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal(_) | Flow::Next => {}
                    }
                }
                Ok(Flow::Normal(Value::Nil))
            }
            Statement::For {
                variable,
                iterable,
                body,
            } => {
                let items = match self.eval_expr(iterable, locals, host)? {
                    Value::List(items) => items,
                    Value::Map(map) => map.into_keys().map(Value::String).collect(),
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    Value::Nil => Vec::new(),
                    other => {
                        return Err(RuntimeError::type_error(
                            "list, map or string",
                            other.type_name(),
                            "for",
                        ))
                    }
                };
                for (iterations, item) in items.into_iter().enumerate() {
                    self.check_iterations(iterations + 1)?;
                    locals.insert(variable.clone(), item);
                    match self.exec_block(body, locals, host)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal(_) | Flow::Next => {}
                    }
                }
                Ok(Flow::Normal(Value::Nil))
            }
            Statement::Raise(message) => {
                let message = self.eval_expr(message, locals, host)?;
                Err(RuntimeError::Raised(message.to_plain_string()))
            }
            Statement::Break => Ok(Flow::Break),
            Statement::Next => Ok(Flow::Next),
            Statement::Expr(expr) => Ok(Flow::Normal(self.eval_expr(expr, locals, host)?)),
        }
    }

    fn check_iterations(&self, iterations: usize) -> RuntimeResult<()> {
        if iterations > self.max_loop_iterations {
            return Err(RuntimeError::Generic(format!(
                "loop exceeded {} iterations",
                self.max_loop_iterations
            )));
        }
        Ok(())
    }

    fn assign(
        &self,
        target: &AssignTarget,
        op: AssignOp,
        value: Value,
        locals: &mut Locals,
        host: &mut dyn Host,
    ) -> RuntimeResult<Value> {
        match target {
            AssignTarget::Variable(name) => {
                let value = match op {
                    AssignOp::Set => value,
                    _ => {
                        let current = locals
                            .get(name)
                            .ok_or_else(|| RuntimeError::UndefinedSymbol(name.clone()))?;
                        compound(op, current, &value)?
                    }
                };
                locals.insert(name.clone(), value.clone());
                Ok(value)
            }
            AssignTarget::Field(field) => {
                let value = match op {
                    AssignOp::Set => value,
                    _ => compound(op, &host.get_field(field)?, &value)?,
                };
                host.set_field(field, value.clone())?;
                Ok(value)
            }
            AssignTarget::Index { name, index } => {
                let index = self.eval_expr(index, locals, host)?;
                let container = locals
                    .get_mut(name)
                    .ok_or_else(|| RuntimeError::UndefinedSymbol(name.clone()))?;
                match container {
                    Value::List(items) => {
                        let slot = resolve_list_index(&index, items.len())?;
                        let value = match op {
                            AssignOp::Set => value,
                            _ => compound(op, &items[slot], &value)?,
                        };
                        items[slot] = value.clone();
                        Ok(value)
                    }
                    Value::Map(map) => {
                        let key = index.to_plain_string();
                        let value = match op {
                            AssignOp::Set => value,
                            _ => {
                                let current = map
                                    .get(&key)
                                    .ok_or_else(|| RuntimeError::KeyNotFound { key: key.clone() })?;
                                compound(op, current, &value)?
                            }
                        };
                        map.insert(key, value.clone());
                        Ok(value)
                    }
                    other => Err(RuntimeError::type_error(
                        "list or map",
                        other.type_name(),
                        "index assignment",
                    )),
                }
            }
        }
    }

    pub fn eval_expr(
        &self,
        expr: &Expr,
        locals: &mut Locals,
        host: &mut dyn Host,
    ) -> RuntimeResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Integer(i) => Value::Integer(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Nil => Value::Nil,
            }),
            Expr::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.eval_expr(item, locals, host))
                    .collect::<RuntimeResult<Vec<_>>>()?,
            )),
            Expr::Map(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval_expr(value, locals, host)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Variable(name) => {
                if let Some(value) = locals.get(name) {
                    return Ok(value.clone());
                }
                // A bare name that is not a local is a zero-argument call.
                host.call(name, Vec::new())
                    .unwrap_or_else(|| Err(RuntimeError::UndefinedSymbol(name.clone())))
            }
            Expr::Field(field) => host.get_field(field),
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg, locals, host))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                host.call(name, args)
                    .unwrap_or_else(|| Err(RuntimeError::UndefinedSymbol(name.clone())))
            }
            Expr::Index { target, index } => {
                let target = self.eval_expr(target, locals, host)?;
                let index = self.eval_expr(index, locals, host)?;
                index_value(&target, &index)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval_expr(operand, locals, host)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Integer(i) => i.checked_neg().map(Value::Integer).ok_or_else(|| {
                            RuntimeError::ArithmeticOverflow {
                                operation: "negation".to_string(),
                            }
                        }),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(RuntimeError::type_error("number", other.type_name(), "-")),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = self.eval_expr(lhs, locals, host)?;
                match op {
                    BinaryOp::And if !left.is_truthy() => return Ok(left),
                    BinaryOp::Or if left.is_truthy() => return Ok(left),
                    BinaryOp::And | BinaryOp::Or => return self.eval_expr(rhs, locals, host),
                    _ => {}
                }
                let right = self.eval_expr(rhs, locals, host)?;
                binary(*op, &left, &right)
            }
        }
    }
}

fn compound(op: AssignOp, current: &Value, value: &Value) -> RuntimeResult<Value> {
    let op = match op {
        AssignOp::Add => BinaryOp::Add,
        AssignOp::Sub => BinaryOp::Sub,
        AssignOp::Mul => BinaryOp::Mul,
        AssignOp::Set => return Ok(value.clone()),
    };
    arithmetic(op, current, value)
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    let symbol = op.to_string();
    match op {
        BinaryOp::Eq => Ok(Value::Boolean(left.loose_eq(right))),
        BinaryOp::Ne => Ok(Value::Boolean(!left.loose_eq(right))),
        BinaryOp::Lt => Ok(Value::Boolean(compare_values(left, right, &symbol)?.is_lt())),
        BinaryOp::Le => Ok(Value::Boolean(compare_values(left, right, &symbol)?.is_le())),
        BinaryOp::Gt => Ok(Value::Boolean(compare_values(left, right, &symbol)?.is_gt())),
        BinaryOp::Ge => Ok(Value::Boolean(compare_values(left, right, &symbol)?.is_ge())),
        _ => arithmetic(op, left, right),
    }
}

fn check_length(length: Option<usize>, op: BinaryOp) -> RuntimeResult<()> {
    match length {
        Some(length) if length <= MAX_VALUE_LENGTH => Ok(()),
        _ => Err(RuntimeError::Generic(format!(
            "result of {} exceeds {} elements",
            op, MAX_VALUE_LENGTH
        ))),
    }
}

/// Arithmetic on values. Integer math is checked; mixing integers and floats
/// yields a float.
pub(crate) fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    let overflow = || RuntimeError::ArithmeticOverflow {
        operation: op.to_string(),
    };

    match (op, left, right) {
        (BinaryOp::Add, Value::String(a), Value::String(b)) => {
            check_length(a.len().checked_add(b.len()), op)?;
            Ok(Value::String(format!("{}{}", a, b)))
        }
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            check_length(a.len().checked_add(b.len()), op)?;
            Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
        }
        (BinaryOp::Mul, Value::String(s), Value::Integer(n)) => {
            let n = usize::try_from(*n).map_err(|_| RuntimeError::new("negative repeat count"))?;
            check_length(s.len().checked_mul(n), op)?;
            Ok(Value::String(s.repeat(n)))
        }
        (_, Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Add => a.checked_add(b).map(Value::Integer).ok_or_else(overflow),
                BinaryOp::Sub => a.checked_sub(b).map(Value::Integer).ok_or_else(overflow),
                BinaryOp::Mul => a.checked_mul(b).map(Value::Integer).ok_or_else(overflow),
                BinaryOp::Div if b == 0 => Err(RuntimeError::DivisionByZero),
                BinaryOp::Div => a.checked_div(b).map(Value::Integer).ok_or_else(overflow),
                BinaryOp::Rem if b == 0 => Err(RuntimeError::DivisionByZero),
                BinaryOp::Rem => a.checked_rem_euclid(b).map(Value::Integer).ok_or_else(overflow),
                _ => Err(RuntimeError::InternalError(format!("{} is not arithmetic", op))),
            }
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => match op {
                BinaryOp::Add => Ok(Value::Float(a + b)),
                BinaryOp::Sub => Ok(Value::Float(a - b)),
                BinaryOp::Mul => Ok(Value::Float(a * b)),
                BinaryOp::Div if b == 0.0 => Err(RuntimeError::DivisionByZero),
                BinaryOp::Div => Ok(Value::Float(a / b)),
                BinaryOp::Rem if b == 0.0 => Err(RuntimeError::DivisionByZero),
                BinaryOp::Rem => Ok(Value::Float(a.rem_euclid(b))),
                _ => Err(RuntimeError::InternalError(format!("{} is not arithmetic", op))),
            },
            _ => Err(RuntimeError::TypeError {
                expected: left.type_name().to_string(),
                actual: right.type_name().to_string(),
                operation: op.to_string(),
            }),
        },
    }
}

fn resolve_list_index(index: &Value, length: usize) -> RuntimeResult<usize> {
    let i = match index {
        Value::Integer(i) => *i,
        other => return Err(RuntimeError::type_error("integer", other.type_name(), "index")),
    };
    // Negative indices count from the end.
    let resolved = if i < 0 { length as i64 + i } else { i };
    if resolved < 0 || resolved as usize >= length {
        return Err(RuntimeError::IndexOutOfBounds { index: i, length });
    }
    Ok(resolved as usize)
}

fn index_value(target: &Value, index: &Value) -> RuntimeResult<Value> {
    match target {
        Value::List(items) => {
            let slot = resolve_list_index(index, items.len())?;
            Ok(items[slot].clone())
        }
        // Missing keys read as nil.
        Value::Map(map) => Ok(map.get(&index.to_plain_string()).cloned().unwrap_or_default()),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let slot = resolve_list_index(index, chars.len())?;
            Ok(Value::String(chars[slot].to_string()))
        }
        Value::Nil => Err(RuntimeError::type_error("list, map or string", "nil", "index")),
        other => Err(RuntimeError::type_error(
            "list, map or string",
            other.type_name(),
            "index",
        )),
    }
}
