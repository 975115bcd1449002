use super::errors::{invalid_input_error, invalid_literal_error, unexpected_rule_error, ParseError};
use super::Rule;
use crate::ast::{BinaryOp, Expr, Literal, UnaryOp};
use lazy_static::lazy_static;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};

lazy_static! {
    // Lowest binding power first.
    static ref PRATT: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left) | Op::infix(Rule::ne, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::neg) | Op::prefix(Rule::not_op))
        .op(Op::postfix(Rule::call_args) | Op::postfix(Rule::index));
}

pub(super) fn build_expression(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    if pair.as_rule() != Rule::expr {
        return build_primary(pair);
    }
    reject_leading_continuations(&pair)?;

    PRATT
        .map_primary(build_primary)
        .map_prefix(|op, operand| {
            let op = match op.as_rule() {
                Rule::neg => UnaryOp::Neg,
                Rule::not_op => UnaryOp::Not,
                _ => return Err(unexpected_rule_error("prefix operator", &op)),
            };
            Ok(Expr::Unary {
                op,
                operand: Box::new(operand?),
            })
        })
        .map_postfix(|target, op| {
            let target = target?;
            match op.as_rule() {
                Rule::call_args => {
                    let name = match target {
                        Expr::Variable(name) => name,
                        _ => return Err(invalid_input_error("only named units can be called", &op)),
                    };
                    let args = op
                        .into_inner()
                        .map(build_expression)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Expr::Call { name, args })
                }
                Rule::index => {
                    let index = op
                        .clone()
                        .into_inner()
                        .next()
                        .ok_or_else(|| invalid_input_error("empty index", &op))
                        .and_then(build_expression)?;
                    Ok(Expr::Index {
                        target: Box::new(target),
                        index: Box::new(index),
                    })
                }
                _ => Err(unexpected_rule_error("postfix operator", &op)),
            }
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::or_op => BinaryOp::Or,
                Rule::and_op => BinaryOp::And,
                Rule::eq => BinaryOp::Eq,
                Rule::ne => BinaryOp::Ne,
                Rule::lt => BinaryOp::Lt,
                Rule::le => BinaryOp::Le,
                Rule::gt => BinaryOp::Gt,
                Rule::ge => BinaryOp::Ge,
                Rule::add => BinaryOp::Add,
                Rule::sub => BinaryOp::Sub,
                Rule::mul => BinaryOp::Mul,
                Rule::div => BinaryOp::Div,
                Rule::rem => BinaryOp::Rem,
                _ => return Err(unexpected_rule_error("infix operator", &op)),
            };
            Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs?),
                rhs: Box::new(rhs?),
            })
        })
        .parse(pair.into_inner())
}

/// Newlines are whitespace to the grammar, so `a` followed by a line starting
/// with `-1`, `(y)` or `[0]` would silently join the two lines into one
/// expression. Those tokens must stay on the line of the operand they extend.
fn reject_leading_continuations(pair: &Pair<Rule>) -> Result<(), ParseError> {
    let mut previous_end_line = None;
    for part in pair.clone().into_inner() {
        let start_line = part.as_span().start_pos().line_col().0;
        if let (Some(end_line), Rule::sub | Rule::call_args | Rule::index) =
            (previous_end_line, part.as_rule())
        {
            if start_line > end_line {
                let token = part.as_str().chars().next().unwrap_or('-');
                return Err(invalid_input_error(
                    &format!(
                        "'{}' at the start of a line continues the previous expression; keep it on the previous line",
                        token
                    ),
                    &part,
                ));
            }
        }
        previous_end_line = Some(part.as_span().end_pos().line_col().0);
    }
    Ok(())
}

fn build_primary(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::expr => build_expression(pair),
        Rule::integer => pair
            .as_str()
            .parse::<i64>()
            .map(|n| Expr::Literal(Literal::Integer(n)))
            .map_err(|e| invalid_literal_error(&format!("integer: {}", e), &pair)),
        Rule::float => pair
            .as_str()
            .parse::<f64>()
            .map(|n| Expr::Literal(Literal::Float(n)))
            .map_err(|e| invalid_literal_error(&format!("float: {}", e), &pair)),
        Rule::string => Ok(Expr::Literal(Literal::String(unescape_string(&pair)?))),
        Rule::boolean => Ok(Expr::Literal(Literal::Boolean(pair.as_str() == "true"))),
        Rule::nil_lit => Ok(Expr::Literal(Literal::Nil)),
        Rule::ident => Ok(Expr::Variable(pair.as_str().to_string())),
        Rule::field_ref => {
            let field = pair
                .clone()
                .into_inner()
                .find(|p| p.as_rule() == Rule::ident)
                .ok_or_else(|| invalid_input_error("field reference without a name", &pair))?;
            Ok(Expr::Field(field.as_str().to_string()))
        }
        Rule::list_lit => Ok(Expr::List(
            pair.into_inner()
                .map(build_expression)
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Rule::map_lit => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let mut parts = entry.clone().into_inner();
                let key = match parts.next() {
                    Some(k) if k.as_rule() == Rule::string => unescape_string(&k)?,
                    Some(k) => k.as_str().to_string(),
                    None => return Err(invalid_input_error("map entry without key", &entry)),
                };
                let value = parts
                    .next()
                    .ok_or_else(|| invalid_input_error("map entry without value", &entry))
                    .and_then(build_expression)?;
                entries.push((key, value));
            }
            Ok(Expr::Map(entries))
        }
        _ => Err(unexpected_rule_error("expression", &pair)),
    }
}

fn unescape_string(pair: &Pair<Rule>) -> Result<String, ParseError> {
    let raw = pair
        .clone()
        .into_inner()
        .next()
        .map(|inner| inner.as_str())
        .unwrap_or("");

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(c @ ('\\' | '"' | '\'')) => out.push(c),
            Some(other) => {
                return Err(invalid_literal_error(
                    &format!("unknown escape sequence '\\{}'", other),
                    pair,
                ))
            }
            None => return Err(invalid_literal_error("dangling escape", pair)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::ast::{BinaryOp, Expr, Literal, Statement};
    use crate::parser::{parse_unit, ParseError};
    use pretty_assertions::assert_eq;

    fn body_expr(src: &str) -> Expr {
        let unit = parse_unit(&format!("define t() {} end", src)).expect("Should parse successfully");
        match unit.body.into_iter().next() {
            Some(Statement::Expr(e)) => e,
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = body_expr("1 + 2 * 3");
        match expr {
            Expr::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }))
            }
            other => panic!("Expected addition at the root, got {:?}", other),
        }
    }

    #[test]
    fn calls_and_indexing_chain() {
        let expr = body_expr("items(x)[0]");
        match expr {
            Expr::Index { target, index } => {
                assert!(matches!(*target, Expr::Call { ref name, .. } if name == "items"));
                assert_eq!(*index, Expr::Literal(Literal::Integer(0)));
            }
            other => panic!("Expected index expression, got {:?}", other),
        }
    }

    #[test]
    fn line_leading_minus_call_or_index_is_rejected() {
        for src in ["define t(a)\n  a\n  -1\nend", "define t(x, y)\n  x\n  (y)\nend", "define t(x)\n  x\n  [0]\nend"] {
            match parse_unit(src) {
                Err(ParseError::InvalidInput { message, span }) => {
                    assert!(message.contains("start of a line"), "{}", message);
                    assert_eq!(span.start_line, 3);
                }
                other => panic!("Expected invalid input for {:?}, got {:?}", src, other),
            }
        }
        assert!(parse_unit("define t(a)\n  a -\n    1\nend").is_ok());
        assert!(parse_unit("define t(a)\n  let b = a\n  -b\nend").is_err());
        assert!(parse_unit("define t(a)\n  let b = a\n  return -b\nend").is_ok());
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(
            body_expr(r#""a\nb\"c""#),
            Expr::Literal(Literal::String("a\nb\"c".to_string()))
        );
    }

    #[test]
    fn map_literal_with_bare_keys() {
        let expr = body_expr("{name: 'x', \"count\": 2}");
        match expr {
            Expr::Map(entries) => {
                let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["name", "count"]);
            }
            other => panic!("Expected map literal, got {:?}", other),
        }
    }
}
