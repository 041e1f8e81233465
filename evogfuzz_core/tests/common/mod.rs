//! Calculator fixture shared by the integration tests.

#![allow(dead_code)]

use evogfuzz_core::Grammar;

#[derive(Debug, Clone, PartialEq)]
pub enum CalcError {
    /// Math domain error, e.g. the square root of a negative number.
    Domain,
    Syntax(String),
}

pub fn calculator_grammar() -> Grammar {
    Grammar::new(
        "<start>",
        vec![
            ("<start>", vec!["<arith_expr>"]),
            ("<arith_expr>", vec!["<function>(<number>)"]),
            ("<function>", vec!["sqrt", "sin", "cos", "tan"]),
            ("<number>", vec!["<maybe_minus><onenine><maybe_digits>"]),
            ("<maybe_minus>", vec!["", "-"]),
            ("<onenine>", vec!["1", "2", "3", "4", "5", "6", "7", "8", "9"]),
            ("<digit>", vec!["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]),
            ("<maybe_digits>", vec!["", "<digits>"]),
            ("<digits>", vec!["<digit>", "<digit><digits>"]),
        ],
    )
    .expect("calculator grammar is valid")
}

/// Evaluates `fn(number)`.
pub fn calculator(input: &str) -> Result<f64, CalcError> {
    let syntax = || CalcError::Syntax(input.to_string());
    let (function, rest) = input.split_once('(').ok_or_else(syntax)?;
    let argument = rest.strip_suffix(')').ok_or_else(syntax)?;
    let x: f64 = argument.parse().map_err(|_| syntax())?;
    match function {
        "sqrt" if x < 0.0 => Err(CalcError::Domain),
        "sqrt" => Ok(x.sqrt()),
        "sin" => Ok(x.sin()),
        "cos" => Ok(x.cos()),
        "tan" => Ok(x.tan()),
        _ => Err(syntax()),
    }
}

pub fn is_domain_error(error: &CalcError) -> bool {
    *error == CalcError::Domain
}
