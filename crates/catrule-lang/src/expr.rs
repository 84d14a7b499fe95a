use winnow::combinator::{alt, cut_err, opt, separated};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::literal;

use crate::ast::{BinOp, CmpOp, Expr, Literal, Path, PathSegment};
use crate::parse_utils::{ident, kw, number_literal, quoted_string, ws_skip};

pub(crate) fn parse_expr(input: &mut &str) -> ModalResult<Expr> {
    or_expr.parse_next(input)
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = and_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        if opt(literal("||")).parse_next(input)?.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(and_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = unary_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        if opt(literal("&&")).parse_next(input)?.is_some() {
            ws_skip.parse_next(input)?;
            let right = cut_err(unary_expr).parse_next(input)?;
            left = Expr::BinOp {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `unary := "!" unary | cmp`
fn unary_expr(input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    if opt(literal("!")).parse_next(input)?.is_some() {
        ws_skip.parse_next(input)?;
        let inner = cut_err(unary_expr).parse_next(input)?;
        Ok(Expr::Not(Box::new(inner)))
    } else {
        cmp_expr.parse_next(input)
    }
}

fn cmp_op(input: &mut &str) -> ModalResult<CmpOp> {
    alt((
        literal("==").value(CmpOp::Eq),
        literal("!=").value(CmpOp::Ne),
        literal("<=").value(CmpOp::Le),
        literal(">=").value(CmpOp::Ge),
        literal("<").value(CmpOp::Lt),
        literal(">").value(CmpOp::Gt),
    ))
    .parse_next(input)
}

/// `cmp := arith ( cmpop arith )?`
fn cmp_expr(input: &mut &str) -> ModalResult<Expr> {
    let left = arith_expr.parse_next(input)?;
    ws_skip.parse_next(input)?;
    if let Some(op) = opt(cmp_op).parse_next(input)? {
        ws_skip.parse_next(input)?;
        let right = cut_err(arith_expr).parse_next(input)?;
        return Ok(Expr::BinOp {
            op: BinOp::Cmp(op),
            left: Box::new(left),
            right: Box::new(right),
        });
    }
    Ok(left)
}

/// `arith := term (("+"|"-") term)*`
fn arith_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = term_expr.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("+").value(BinOp::Add),
            literal("-").value(BinOp::Sub),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(term_expr).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `term := factor (("*"|"/") factor)*`
fn term_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut left = factor.parse_next(input)?;
    loop {
        ws_skip.parse_next(input)?;
        let op = opt(alt((
            literal("*").value(BinOp::Mul),
            literal("/").value(BinOp::Div),
        )))
        .parse_next(input)?;
        if let Some(op) = op {
            ws_skip.parse_next(input)?;
            let right = cut_err(factor).parse_next(input)?;
            left = Expr::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        } else {
            break;
        }
    }
    Ok(left)
}

/// `factor := literal | path | call | "(" expr ")"`
fn factor(input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    alt((
        literal_expr,
        paren_expr,
        ident_led, // path or call — both start with an identifier
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn literal_expr(input: &mut &str) -> ModalResult<Expr> {
    alt((
        number_literal.map(|(text, is_float)| {
            if is_float {
                Expr::Literal(Literal::Float(text.parse().unwrap_or(0.0)))
            } else {
                Expr::Literal(Literal::Int(text.parse().unwrap_or(0)))
            }
        }),
        quoted_string.map(|s| Expr::Literal(Literal::Str(s))),
        kw("true").map(|_| Expr::Literal(Literal::Bool(true))),
        kw("false").map(|_| Expr::Literal(Literal::Bool(false))),
        kw("null").map(|_| Expr::Literal(Literal::Null)),
    ))
    .parse_next(input)
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    literal("(").parse_next(input)?;
    ws_skip.parse_next(input)?;
    let inner = cut_err(parse_expr).parse_next(input)?;
    ws_skip.parse_next(input)?;
    cut_err(literal(")")).parse_next(input)?;
    Ok(inner)
}

/// Disambiguates `path` from `call`: both start with an identifier, which
/// diverges into a call only when immediately followed by `(`.
fn ident_led(input: &mut &str) -> ModalResult<Expr> {
    let first = ident.parse_next(input)?.to_string();
    ws_skip.parse_next(input)?;
    if opt(literal("(")).parse_next(input)?.is_some() {
        return call_args(first, input);
    }
    let mut segments = Vec::new();
    loop {
        if opt(literal(".")).parse_next(input)?.is_some() {
            let name = cut_err(ident).parse_next(input)?.to_string();
            segments.push(PathSegment::Field(name));
            continue;
        }
        if opt(literal("[")).parse_next(input)?.is_some() {
            ws_skip.parse_next(input)?;
            let idx = cut_err(arith_expr).parse_next(input)?;
            ws_skip.parse_next(input)?;
            cut_err(literal("]")).parse_next(input)?;
            segments.push(PathSegment::Index(Box::new(idx)));
            continue;
        }
        break;
    }
    Ok(Expr::Path(Path { root: first, segments }))
}

fn call_args(name: String, input: &mut &str) -> ModalResult<Expr> {
    ws_skip.parse_next(input)?;
    let args: Vec<Expr> = if opt(literal(")")).parse_next(input)?.is_some() {
        Vec::new()
    } else {
        let args: Vec<Expr> =
            separated(1.., (ws_skip, parse_expr).map(|(_, e)| e), literal(",")).parse_next(input)?;
        ws_skip.parse_next(input)?;
        cut_err(literal(")")).parse_next(input)?;
        args
    };

    if name == "forAll" || name == "forSome" {
        return build_quantifier(name == "forAll", args);
    }
    Ok(Expr::Call { name, args })
}

fn build_quantifier(is_for_all: bool, mut args: Vec<Expr>) -> ModalResult<Expr> {
    if args.len() != 3 {
        return Err(cut_err_context("forAll/forSome takes exactly 3 arguments"));
    }
    let predicate = Box::new(args.pop().unwrap());
    let element_expr = args.pop().unwrap();
    let path_expr = args.pop().unwrap();
    let (Expr::Literal(Literal::Str(path)), Expr::Literal(Literal::Str(element))) =
        (path_expr, element_expr)
    else {
        return Err(cut_err_context(
            "forAll/forSome's first two arguments must be string literals",
        ));
    };
    Ok(Expr::Quantifier {
        is_for_all,
        path,
        element,
        predicate,
    })
}

fn cut_err_context(msg: &'static str) -> winnow::error::ErrMode<winnow::error::ContextError> {
    let mut err = winnow::error::ContextError::new();
    err.push(StrContext::Label(msg));
    winnow::error::ErrMode::Cut(err)
}
