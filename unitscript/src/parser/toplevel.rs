use super::errors::{invalid_input_error, pair_to_source_span, unexpected_rule_error, ParseError};
use super::statements::build_block;
use super::Rule;
use crate::ast::UnitDef;
use pest::iterators::Pair;

pub(super) fn build_unit(pair: Pair<Rule>) -> Result<UnitDef, ParseError> {
    if pair.as_rule() != Rule::unit_def {
        return Err(unexpected_rule_error("unit definition", &pair));
    }

    let span = pair_to_source_span(&pair);
    let source = pair.as_str().to_string();

    let mut name = None;
    let mut type_level = false;
    let mut params = Vec::new();
    let mut body = Vec::new();

    for inner in pair.clone().into_inner() {
        match inner.as_rule() {
            Rule::unit_name => {
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::type_marker => type_level = true,
                        Rule::ident => name = Some(part.as_str().to_string()),
                        _ => {}
                    }
                }
            }
            Rule::param_list => {
                params = inner
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::ident)
                    .map(|p| p.as_str().to_string())
                    .collect();
            }
            Rule::block => body = build_block(inner)?,
            // define / end keywords
            _ => {}
        }
    }

    let name = name.ok_or_else(|| invalid_input_error("unit definition without a name", &pair))?;

    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = params.iter().find(|p| !seen.insert(p.as_str())) {
        return Err(invalid_input_error(
            &format!("duplicate parameter '{}' in unit '{}'", dup, name),
            &pair,
        ));
    }

    Ok(UnitDef {
        name,
        type_level,
        params,
        body,
        source,
        span,
    })
}
