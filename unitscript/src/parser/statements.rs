use super::errors::{invalid_input_error, unexpected_rule_error, ParseError};
use super::expressions::build_expression;
use super::Rule;
use crate::ast::{AssignOp, AssignTarget, Expr, Statement};
use pest::iterators::Pair;

pub(super) fn build_block(pair: Pair<Rule>) -> Result<Vec<Statement>, ParseError> {
    pair.into_inner().map(build_statement).collect()
}

fn build_statement(pair: Pair<Rule>) -> Result<Statement, ParseError> {
    match pair.as_rule() {
        Rule::let_stmt => {
            let mut name = None;
            let mut value = None;
            for inner in pair.clone().into_inner() {
                match inner.as_rule() {
                    Rule::ident => name = Some(inner.as_str().to_string()),
                    Rule::expr => value = Some(build_expression(inner)?),
                    _ => {}
                }
            }
            match (name, value) {
                (Some(name), Some(value)) => Ok(Statement::Let { name, value }),
                _ => Err(invalid_input_error("incomplete let binding", &pair)),
            }
        }
        Rule::return_stmt => {
            let value = first_expr(pair)?;
            Ok(Statement::Return(value))
        }
        Rule::raise_stmt => match first_expr(pair.clone())? {
            Some(value) => Ok(Statement::Raise(value)),
            None => Err(invalid_input_error("raise requires a message", &pair)),
        },
        Rule::break_stmt => Ok(Statement::Break),
        Rule::next_stmt => Ok(Statement::Next),
        Rule::if_stmt => build_if(pair),
        Rule::while_stmt => {
            let mut condition = None;
            let mut body = Vec::new();
            for inner in pair.clone().into_inner() {
                match inner.as_rule() {
                    Rule::expr => condition = Some(build_expression(inner)?),
                    Rule::block => body = build_block(inner)?,
                    _ => {}
                }
            }
            let condition =
                condition.ok_or_else(|| invalid_input_error("while without condition", &pair))?;
            Ok(Statement::While { condition, body })
        }
        Rule::for_stmt => {
            let mut variable = None;
            let mut iterable = None;
            let mut body = Vec::new();
            for inner in pair.clone().into_inner() {
                match inner.as_rule() {
                    Rule::ident => variable = Some(inner.as_str().to_string()),
                    Rule::expr => iterable = Some(build_expression(inner)?),
                    Rule::block => body = build_block(inner)?,
                    _ => {}
                }
            }
            match (variable, iterable) {
                (Some(variable), Some(iterable)) => Ok(Statement::For {
                    variable,
                    iterable,
                    body,
                }),
                _ => Err(invalid_input_error("incomplete for loop", &pair)),
            }
        }
        Rule::assign_stmt => build_assignment(pair),
        Rule::expr_stmt => match first_expr(pair.clone())? {
            Some(expr) => Ok(Statement::Expr(expr)),
            None => Err(invalid_input_error("empty expression statement", &pair)),
        },
        _ => Err(unexpected_rule_error("statement", &pair)),
    }
}

fn first_expr(pair: Pair<Rule>) -> Result<Option<Expr>, ParseError> {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .map(build_expression)
        .transpose()
}

fn build_if(pair: Pair<Rule>) -> Result<Statement, ParseError> {
    let mut branches = Vec::new();
    let mut otherwise = None;
    let mut condition = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expr => condition = Some(build_expression(inner)?),
            Rule::block => {
                if let Some(cond) = condition.take() {
                    branches.push((cond, build_block(inner)?));
                }
            }
            Rule::elsif_clause => {
                let mut cond = None;
                let mut body = Vec::new();
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::expr => cond = Some(build_expression(part)?),
                        Rule::block => body = build_block(part)?,
                        _ => {}
                    }
                }
                if let Some(cond) = cond {
                    branches.push((cond, body));
                }
            }
            Rule::else_clause => {
                if let Some(block) = inner.into_inner().find(|p| p.as_rule() == Rule::block) {
                    otherwise = Some(build_block(block)?);
                }
            }
            _ => {}
        }
    }

    Ok(Statement::If {
        branches,
        otherwise,
    })
}

fn build_assignment(pair: Pair<Rule>) -> Result<Statement, ParseError> {
    let mut target = None;
    let mut op = AssignOp::Set;
    let mut value = None;

    for inner in pair.clone().into_inner() {
        match inner.as_rule() {
            Rule::ident => target = Some(AssignTarget::Variable(inner.as_str().to_string())),
            Rule::field_ref => {
                let field = inner
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::ident)
                    .map(|p| p.as_str().to_string());
                target = field.map(AssignTarget::Field);
            }
            Rule::index_target => {
                let mut name = None;
                let mut index = None;
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::ident => name = Some(part.as_str().to_string()),
                        Rule::expr => index = Some(build_expression(part)?),
                        _ => {}
                    }
                }
                if let (Some(name), Some(index)) = (name, index) {
                    target = Some(AssignTarget::Index { name, index });
                }
            }
            Rule::assign_op => {
                op = match inner.as_str() {
                    "+=" => AssignOp::Add,
                    "-=" => AssignOp::Sub,
                    "*=" => AssignOp::Mul,
                    _ => AssignOp::Set,
                }
            }
            Rule::expr => value = Some(build_expression(inner)?),
            _ => {}
        }
    }

    match (target, value) {
        (Some(target), Some(value)) => Ok(Statement::Assign { target, op, value }),
        _ => Err(invalid_input_error("incomplete assignment", &pair)),
    }
}
