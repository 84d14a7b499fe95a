//! Lexical primitives shared across precedence levels.

use winnow::ascii::multispace0;
use winnow::combinator::opt;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{literal, take_while};

pub fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    if !input.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_').parse_next(input)
}

pub fn ws_skip(input: &mut &str) -> ModalResult<()> {
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

/// Matches `keyword` only when not immediately followed by an identifier
/// character, so `nullable` does not get chewed up as `null` + `able`.
pub fn kw<'a>(keyword: &'static str) -> impl FnMut(&mut &'a str) -> ModalResult<()> {
    move |input: &mut &'a str| {
        let saved = *input;
        literal(keyword).parse_next(input)?;
        if input.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            *input = saved;
            return Err(ErrMode::Backtrack(ContextError::new()));
        }
        Ok(())
    }
}

pub fn quoted_string(input: &mut &str) -> ModalResult<String> {
    literal("\"").parse_next(input)?;
    let mut out = String::new();
    loop {
        let chunk = take_while(0.., |c: char| c != '"' && c != '\\').parse_next(input)?;
        out.push_str(chunk);
        if opt(literal("\\")).parse_next(input)?.is_some() {
            let escaped = winnow::token::any.parse_next(input)?;
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                other => out.push(other),
            }
            continue;
        }
        break;
    }
    winnow::combinator::cut_err(literal("\"")).parse_next(input)?;
    Ok(out)
}

/// Integer or float literal; returns `(text, is_float)` so the caller can
/// pick the right `Literal` variant without re-parsing.
pub fn number_literal(input: &mut &str) -> ModalResult<(String, bool)> {
    let integer_part = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let has_dot = opt(literal(".")).parse_next(input)?.is_some();
    if has_dot {
        let frac_part = winnow::combinator::cut_err(take_while(1.., |c: char| c.is_ascii_digit()))
            .parse_next(input)?;
        Ok((format!("{integer_part}.{frac_part}"), true))
    } else {
        Ok((integer_part.to_string(), false))
    }
}
