use crate::ast::UnitDef;
use pest::Parser;

// Declare submodules
pub mod errors;
pub mod expressions;
pub mod statements;
pub mod toplevel;

pub use errors::ParseError;
use toplevel::build_unit;

// Define the parser struct using the grammar file
#[derive(pest_derive::Parser)]
#[grammar = "unit.pest"] // Path relative to src/
pub struct UnitScriptParser;

// --- Main Parsing Functions ---

/// Parse a full program: every `define ... end` block in order of appearance.
pub fn parse(input: &str) -> Result<Vec<UnitDef>, ParseError> {
    let mut pairs = UnitScriptParser::parse(Rule::program, input)?;
    let program = match pairs.next() {
        Some(pair) => pair,
        None => return Ok(Vec::new()),
    };

    program
        .into_inner()
        .filter(|p| p.as_rule() == Rule::unit_def)
        .map(build_unit)
        .collect()
}

/// Parse input that must contain exactly one unit definition.
pub fn parse_unit(input: &str) -> Result<UnitDef, ParseError> {
    let mut units = parse(input)?;
    match units.len() {
        1 => Ok(units.remove(0)),
        n => Err(ParseError::Syntax {
            message: format!("expected exactly one unit definition, found {}", n),
            line: 1,
            column: 1,
        }),
    }
}

/// Split a program into `(name, source)` pairs, keeping each unit's exact text.
pub fn split_units(input: &str) -> Result<Vec<(String, String)>, ParseError> {
    Ok(parse(input)?
        .into_iter()
        .map(|unit| (unit.name, unit.source))
        .collect())
}
