//! The rule expression language: grammar, AST, and a `winnow`-based
//! recursive-descent parser (spec §6).

pub mod ast;
mod error;
mod expr;
mod parse_utils;

pub use ast::{BinOp, CmpOp, Expr, Literal, Path, PathSegment};
pub use error::ParseError;

use winnow::prelude::*;

/// Parses one rule expression (a single-line boolean expression in the
/// language of spec §6) into its AST.
pub fn parse_expression(text: &str) -> Result<Expr, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut input = trimmed;
    let result = expr::parse_expr
        .parse(&mut input)
        .map_err(|e| ParseError::Syntax(e.to_string()))?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comparison() {
        let e = parse_expression("user.age >= 21").unwrap();
        assert!(matches!(e, Expr::BinOp { op: BinOp::Cmp(CmpOp::Ge), .. }));
    }

    #[test]
    fn parses_logical_precedence() {
        // && binds tighter than ||
        let e = parse_expression("a == 1 || b == 2 && c == 3").unwrap();
        match e {
            Expr::BinOp { op: BinOp::Or, right, .. } => {
                assert!(matches!(*right, Expr::BinOp { op: BinOp::And, .. }));
            }
            other => panic!("expected top-level Or, got {other:?}"),
        }
    }

    #[test]
    fn parses_array_index_and_path() {
        let e = parse_expression("items[0].value > 10").unwrap();
        assert!(matches!(e, Expr::BinOp { op: BinOp::Cmp(CmpOp::Gt), .. }));
    }

    #[test]
    fn parses_quantifier() {
        let e = parse_expression(r#"forAll("items", "el", el.value > 0)"#).unwrap();
        match e {
            Expr::Quantifier { is_for_all, path, element, .. } => {
                assert!(is_for_all);
                assert_eq!(path, "items");
                assert_eq!(element, "el");
            }
            other => panic!("expected Quantifier, got {other:?}"),
        }
    }

    #[test]
    fn parses_negation_and_builtin_call() {
        let e = parse_expression(r#"!hasValue(user.email)"#).unwrap();
        assert!(matches!(e, Expr::Not(_)));
    }

    #[test]
    fn rejects_empty_expression() {
        assert!(matches!(parse_expression("   "), Err(ParseError::Empty)));
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(parse_expression("a && ").is_err());
    }
}
