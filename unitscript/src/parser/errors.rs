use crate::ast::SourceSpan;
use pest::error::{Error as PestError, LineColLocation};
use pest::iterators::Pair;
use thiserror::Error;

use super::Rule;

// Helper function to convert pest span to our SourceSpan
pub fn pest_span_to_source_span(span: pest::Span) -> SourceSpan {
    let (start_line, start_column) = span.start_pos().line_col();
    let (end_line, end_column) = span.end_pos().line_col();
    SourceSpan::new(start_line, start_column, end_line, end_column)
        .with_offsets(span.start(), span.end())
}

// Helper function to create SourceSpan from a Pair
pub fn pair_to_source_span(pair: &Pair<Rule>) -> SourceSpan {
    pest_span_to_source_span(pair.as_span())
}

pub fn invalid_input_error(message: &str, pair: &Pair<Rule>) -> ParseError {
    ParseError::InvalidInput {
        message: message.to_string(),
        span: pair_to_source_span(pair),
    }
}

pub fn invalid_literal_error(message: &str, pair: &Pair<Rule>) -> ParseError {
    ParseError::InvalidLiteral {
        message: message.to_string(),
        span: pair_to_source_span(pair),
    }
}

pub fn unexpected_rule_error(expected: &str, pair: &Pair<Rule>) -> ParseError {
    ParseError::UnexpectedRule {
        expected: expected.to_string(),
        found: format!("{:?}", pair.as_rule()),
        span: pair_to_source_span(pair),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("expected {expected}, found {found} at {span}")]
    UnexpectedRule {
        expected: String,
        found: String,
        span: SourceSpan,
    },

    #[error("invalid literal at {span}: {message}")]
    InvalidLiteral { message: String, span: SourceSpan },

    #[error("invalid input at {span}: {message}")]
    InvalidInput { message: String, span: SourceSpan },
}

impl ParseError {
    /// Line the error points at, when known.
    pub fn line(&self) -> usize {
        match self {
            ParseError::Syntax { line, .. } => *line,
            ParseError::UnexpectedRule { span, .. }
            | ParseError::InvalidLiteral { span, .. }
            | ParseError::InvalidInput { span, .. } => span.start_line,
        }
    }
}

impl From<PestError<Rule>> for ParseError {
    fn from(err: PestError<Rule>) -> Self {
        let err = err.renamed_rules(describe_rule);
        let (line, column) = match err.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        ParseError::Syntax {
            message: err.variant.message().into_owned(),
            line,
            column,
        }
    }
}

fn describe_rule(rule: &Rule) -> String {
    match rule {
        Rule::EOI => "end of input".to_string(),
        Rule::unit_def | Rule::kw_define => "`define`".to_string(),
        Rule::kw_end => "`end`".to_string(),
        Rule::unit_name | Rule::ident => "identifier".to_string(),
        Rule::param_list => "parameter list".to_string(),
        Rule::expr | Rule::expr_stmt => "expression".to_string(),
        Rule::call_args => "argument list".to_string(),
        Rule::assign_op => "assignment".to_string(),
        other => format!("{:?}", other),
    }
}
