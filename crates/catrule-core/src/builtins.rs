//! Evaluation of the closed builtin-function set (spec §6) and the
//! arithmetic operators, both represented as `Operand::Expr`.

use crate::frame::Frames;
use crate::operand::{const_bool, const_float, const_int, const_string, error, evaluate};
use crate::operand::{Builtin, Operand, OperandKind, ValueKind};
use chrono::{DateTime, NaiveDate, Utc};

pub fn eval_builtin(builtin: Builtin, args: &[Operand], frames: &Frames<'_>) -> Operand {
    match builtin {
        Builtin::Add | Builtin::Sub | Builtin::Mul | Builtin::Div => {
            eval_arith(builtin, args, frames)
        }
        Builtin::Sqrt => {
            let v = evaluate(&args[0], frames);
            match as_f64(&v) {
                Some(f) if f >= 0.0 => const_float(f.sqrt()),
                Some(_) => error("sqrt of negative number"),
                None => error("sqrt expects a number"),
            }
        }
        Builtin::DateFn => {
            let v = evaluate(&args[0], frames);
            parse_date(&v)
        }
        Builtin::StringFn => {
            let v = evaluate(&args[0], frames);
            to_string_operand(&v)
        }
        Builtin::IntFn => {
            let v = evaluate(&args[0], frames);
            v.convert_to(ValueKind::Int)
        }
        Builtin::FloatFn => {
            let v = evaluate(&args[0], frames);
            v.convert_to(ValueKind::Float)
        }
        Builtin::HasValue => {
            let v = evaluate(&args[0], frames);
            const_bool(!matches!(v.kind, OperandKind::Null | OperandKind::Undefined))
        }
        Builtin::RegexpMatch => {
            let pattern = evaluate(&args[0], frames);
            let subject = evaluate(&args[1], frames);
            match (&pattern.kind, &subject.kind) {
                (OperandKind::String(pat), OperandKind::String(s)) => {
                    match regex::Regex::new(pat) {
                        Ok(re) => const_bool(re.is_match(s)),
                        Err(e) => error(format!("invalid regex: {e}")),
                    }
                }
                _ => const_bool(false),
            }
        }
        Builtin::IsEqualToAny => {
            let v = evaluate(&args[0], frames);
            let mut found = false;
            for cand in &args[1..] {
                let c = evaluate(cand, frames);
                if v.equals(&c) == Some(true) {
                    found = true;
                    break;
                }
            }
            const_bool(found)
        }
        Builtin::ContainsAny => {
            let v = evaluate(&args[0], frames);
            let OperandKind::String(s) = &v.kind else {
                return const_bool(false);
            };
            let mut found = false;
            for cand in &args[1..] {
                let c = evaluate(cand, frames);
                if let OperandKind::String(needle) = &c.kind {
                    if s.contains(needle.as_ref()) {
                        found = true;
                        break;
                    }
                }
            }
            const_bool(found)
        }
        Builtin::IsEqualToAnyWithDate => {
            let value = evaluate(&args[0], frames);
            let date = evaluate(&args[1], frames);
            let date = match as_date(&date) {
                Some(d) => d,
                None => return error("isEqualToAnyWithDate: invalid date argument"),
            };
            let mut matched = false;
            for triple in args[2..].chunks(3) {
                if triple.len() != 3 {
                    continue;
                }
                let v = evaluate(&triple[0], frames);
                let start = as_date(&evaluate(&triple[1], frames));
                let end = as_date(&evaluate(&triple[2], frames));
                if let (Some(start), Some(end)) = (start, end) {
                    if value.equals(&v) == Some(true) && date >= start && date <= end {
                        matched = true;
                        break;
                    }
                }
            }
            const_bool(matched)
        }
        Builtin::ForAll | Builtin::ForSome => {
            eval_quantifier(builtin, args, frames)
        }
    }
}

fn eval_quantifier(builtin: Builtin, args: &[Operand], frames: &Frames<'_>) -> Operand {
    // args = [Address(array), predicate, Int(nesting_level)]
    let OperandKind::Address(addr, _) = &args[0].kind else {
        return error("forAll/forSome: first argument must resolve to an array address");
    };
    let predicate = &args[1];
    let OperandKind::Int(nesting_level) = &args[2].kind else {
        return error("forAll/forSome: missing nesting level");
    };
    let nesting_level = *nesting_level as u32;

    match crate::frame::read_array(frames, addr) {
        // The base array itself is absent from the event — neither
        // quantifier has anything to range over, so neither fires. This is
        // distinct from an array that is *present* but empty, where vacuous
        // truth applies (see below).
        crate::frame::ArrayLookup::Missing => const_bool(false),
        crate::frame::ArrayLookup::Present(rows) => {
            if rows.is_empty() {
                return match builtin {
                    Builtin::ForAll => const_bool(true),
                    Builtin::ForSome => const_bool(false),
                    _ => unreachable!(),
                };
            }
            // Frames are borrowed immutably elsewhere in this evaluation
            // tree, so build a scratch copy to set the element frame on.
            let mut local = frames.clone_shallow();
            for row in rows {
                local.set(nesting_level, row);
                let result = evaluate(predicate, &local);
                let truthy = matches!(result.kind, OperandKind::Bool(true))
                    || matches!(result.kind, OperandKind::Int(n) if n != 0);
                match builtin {
                    Builtin::ForAll if !truthy => return const_bool(false),
                    Builtin::ForSome if truthy => return const_bool(true),
                    _ => {}
                }
            }
            match builtin {
                Builtin::ForAll => const_bool(true),
                Builtin::ForSome => const_bool(false),
                _ => unreachable!(),
            }
        }
    }
}

fn eval_arith(builtin: Builtin, args: &[Operand], frames: &Frames<'_>) -> Operand {
    let left = evaluate(&args[0], frames);
    let right = evaluate(&args[1], frames);
    let (Some(l), Some(r)) = (as_f64(&left), as_f64(&right)) else {
        return error("arithmetic on non-numeric operand");
    };
    let is_int = matches!(left.kind, OperandKind::Int(_)) && matches!(right.kind, OperandKind::Int(_));
    let result = match builtin {
        Builtin::Add => l + r,
        Builtin::Sub => l - r,
        Builtin::Mul => l * r,
        Builtin::Div => {
            if r == 0.0 {
                return error("division by zero");
            }
            l / r
        }
        _ => unreachable!(),
    };
    if is_int && builtin != Builtin::Div {
        const_int(result as i64)
    } else {
        const_float(result)
    }
}

fn as_f64(op: &Operand) -> Option<f64> {
    match &op.kind {
        OperandKind::Int(n) => Some(*n as f64),
        OperandKind::Float(n) => Some(*n),
        _ => None,
    }
}

fn as_date(op: &Operand) -> Option<DateTime<Utc>> {
    match &op.kind {
        OperandKind::Time(t) => Some(*t),
        OperandKind::String(s) => parse_date_str(s),
        _ => None,
    }
}

fn parse_date(op: &Operand) -> Operand {
    match &op.kind {
        OperandKind::String(s) => match parse_date_str(s) {
            Some(t) => std::sync::Arc::new(crate::operand::make_operand(OperandKind::Time(t))),
            None => error(format!("invalid date literal: {s}")),
        },
        OperandKind::Time(_) => op.clone(),
        _ => error("date() expects a string"),
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn to_string_operand(op: &Operand) -> Operand {
    match &op.kind {
        OperandKind::String(_) => op.clone(),
        OperandKind::Int(n) => const_string(n.to_string()),
        OperandKind::Float(n) => const_string(n.to_string()),
        OperandKind::Bool(b) => const_string(b.to_string()),
        OperandKind::Time(t) => const_string(t.to_rfc3339()),
        OperandKind::Null => const_string("null"),
        _ => error("cannot convert to string"),
    }
}
