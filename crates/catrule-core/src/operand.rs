//! The operand value graph: an immutable, content-addressed tree of
//! arithmetic/scalar values and the expressions that combine them.

use crate::dictionary::AttributeAddress;
use crate::frame::Frames;
use crate::hash::{ContentHash, Hasher256};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub type Operand = Arc<OperandNode>;

/// The value-kind lattice used for type reconciliation. Ordered per the
/// spec's fixed promotion order `Int < Float < Bool < Time < String`; the
/// lower kind is converted toward the higher one when two operands of
/// different orderable kinds are compared or combined arithmetically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    Time,
    String,
    Null,
    Undefined,
    List,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Add,
    Sub,
    Mul,
    Div,
    RegexpMatch,
    HasValue,
    IsEqualToAny,
    IsEqualToAnyWithDate,
    ContainsAny,
    ForAll,
    ForSome,
    DateFn,
    StringFn,
    IntFn,
    FloatFn,
    Sqrt,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Add => "+",
            Builtin::Sub => "-",
            Builtin::Mul => "*",
            Builtin::Div => "/",
            Builtin::RegexpMatch => "regexpMatch",
            Builtin::HasValue => "hasValue",
            Builtin::IsEqualToAny => "isEqualToAny",
            Builtin::IsEqualToAnyWithDate => "isEqualToAnyWithDate",
            Builtin::ContainsAny => "containsAny",
            Builtin::ForAll => "forAll",
            Builtin::ForSome => "forSome",
            Builtin::DateFn => "date",
            Builtin::StringFn => "string",
            Builtin::IntFn => "int",
            Builtin::FloatFn => "float",
            Builtin::Sqrt => "sqrt",
        }
    }
}

#[derive(Clone)]
pub enum OperandKind {
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Bool(bool),
    Time(DateTime<Utc>),
    Null,
    /// Only produced/consumed when the engine runs in
    /// [`crate::logic::LogicMode::ThreeValued`] — see spec §9.
    Undefined,
    List(Vec<Operand>),
    /// An attribute reference prior to address resolution.
    Attribute(String),
    /// A resolved attribute reference. The optional operand is a
    /// compile-time-computed index expression (e.g. `items[i]` where `i`
    /// is not a literal).
    Address(AttributeAddress, Option<Operand>),
    Selector(Operand, String),
    Index(Operand, Operand),
    Expr(Builtin, Vec<Operand>),
    Error(String),
}

pub struct OperandNode {
    pub kind: OperandKind,
    hash: ContentHash,
}

impl OperandNode {
    pub fn hash(&self) -> ContentHash {
        self.hash
    }
}

impl std::fmt::Debug for OperandNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            OperandKind::Int(n) => write!(f, "Int({n})"),
            OperandKind::Float(n) => write!(f, "Float({n})"),
            OperandKind::String(s) => write!(f, "String({s:?})"),
            OperandKind::Bool(b) => write!(f, "Bool({b})"),
            OperandKind::Time(t) => write!(f, "Time({t})"),
            OperandKind::Null => write!(f, "Null"),
            OperandKind::Undefined => write!(f, "Undefined"),
            OperandKind::List(items) => write!(f, "List({items:?})"),
            OperandKind::Attribute(p) => write!(f, "Attribute({p})"),
            OperandKind::Address(a, _) => write!(f, "Address({})", a.path),
            OperandKind::Selector(base, name) => write!(f, "Selector({base:?}, {name})"),
            OperandKind::Index(base, idx) => write!(f, "Index({base:?}, {idx:?})"),
            OperandKind::Expr(b, args) => write!(f, "Expr({}, {args:?})", b.name()),
            OperandKind::Error(msg) => write!(f, "Error({msg})"),
        }
    }
}

fn hash_of(kind: &OperandKind) -> ContentHash {
    let mut h = Hasher256::new();
    match kind {
        OperandKind::Int(n) => h.tag(0).i64(*n),
        OperandKind::Float(n) => h.tag(1).f64(*n),
        OperandKind::String(s) => h.tag(2).str(s),
        OperandKind::Bool(b) => h.tag(3).tag(*b as u8),
        OperandKind::Time(t) => h.tag(4).i64(t.timestamp_nanos_opt().unwrap_or(0)),
        OperandKind::Null => h.tag(5),
        OperandKind::Undefined => h.tag(6),
        OperandKind::List(items) => {
            h.tag(7).u64(items.len() as u64);
            for it in items {
                h.child(&it.hash());
            }
            &mut h
        }
        OperandKind::Attribute(p) => h.tag(8).str(p),
        OperandKind::Address(addr, computed) => {
            h.tag(9).str(&addr.path);
            for seg in &addr.address {
                h.u64(seg.slot as u64);
                h.i64(seg.array.map(|a| a.as_i32() as i64).unwrap_or(i64::MIN));
            }
            if let Some(c) = computed {
                h.child(&c.hash());
            }
            &mut h
        }
        OperandKind::Selector(base, name) => h.tag(10).child(&base.hash()).str(name),
        OperandKind::Index(base, idx) => h.tag(11).child(&base.hash()).child(&idx.hash()),
        OperandKind::Expr(b, args) => {
            h.tag(12).str(b.name());
            h.u64(args.len() as u64);
            for a in args {
                h.child(&a.hash());
            }
            &mut h
        }
        OperandKind::Error(msg) => h.tag(13).str(msg),
    };
    h.finish()
}

/// Builds (but does not intern) an [`OperandNode`] — interning is the
/// caller's (the compiler's) job via [`crate::intern::Interner`], which
/// needs the hash up front to probe the cache.
pub fn make_operand(kind: OperandKind) -> OperandNode {
    let hash = hash_of(&kind);
    OperandNode { kind, hash }
}

pub fn const_int(v: i64) -> Operand {
    Arc::new(make_operand(OperandKind::Int(v)))
}
pub fn const_float(v: f64) -> Operand {
    Arc::new(make_operand(OperandKind::Float(v)))
}
pub fn const_string(v: impl Into<Arc<str>>) -> Operand {
    Arc::new(make_operand(OperandKind::String(v.into())))
}
pub fn const_bool(v: bool) -> Operand {
    Arc::new(make_operand(OperandKind::Bool(v)))
}
pub fn const_null() -> Operand {
    Arc::new(make_operand(OperandKind::Null))
}
pub fn const_undefined() -> Operand {
    Arc::new(make_operand(OperandKind::Undefined))
}
pub fn error(msg: impl Into<String>) -> Operand {
    Arc::new(make_operand(OperandKind::Error(msg.into())))
}

impl OperandNode {
    pub fn kind_tag(&self) -> ValueKind {
        match &self.kind {
            OperandKind::Int(_) => ValueKind::Int,
            OperandKind::Float(_) => ValueKind::Float,
            OperandKind::String(_) => ValueKind::String,
            OperandKind::Bool(_) => ValueKind::Bool,
            OperandKind::Time(_) => ValueKind::Time,
            OperandKind::Null => ValueKind::Null,
            OperandKind::Undefined => ValueKind::Undefined,
            OperandKind::List(_) => ValueKind::List,
            OperandKind::Error(_) => ValueKind::Error,
            // Non-evaluated shapes report Error as a conservative tag;
            // callers must evaluate() before inspecting kind_tag() for these.
            OperandKind::Attribute(_)
            | OperandKind::Address(..)
            | OperandKind::Selector(..)
            | OperandKind::Index(..)
            | OperandKind::Expr(..) => ValueKind::Error,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self.kind,
            OperandKind::Int(_)
                | OperandKind::Float(_)
                | OperandKind::String(_)
                | OperandKind::Bool(_)
                | OperandKind::Time(_)
                | OperandKind::Null
                | OperandKind::Undefined
        ) || matches!(&self.kind, OperandKind::List(items) if items.iter().all(|i| i.is_const()))
    }

    /// Converts a scalar operand to `target`, per the promotion table.
    /// Returns `Error` if the conversion is not representable.
    pub fn convert_to(&self, target: ValueKind) -> Operand {
        if self.kind_tag() == target {
            return Arc::new(make_operand(self.kind.clone()));
        }
        match (&self.kind, target) {
            (OperandKind::Int(n), ValueKind::Float) => const_float(*n as f64),
            (OperandKind::Int(n), ValueKind::Bool) => const_bool(*n != 0),
            (OperandKind::Int(n), ValueKind::String) => const_string(n.to_string()),
            (OperandKind::Float(n), ValueKind::Int) => const_int(*n as i64),
            (OperandKind::Float(n), ValueKind::Bool) => const_bool(*n != 0.0),
            (OperandKind::Float(n), ValueKind::String) => const_string(n.to_string()),
            (OperandKind::Bool(b), ValueKind::Int) => const_int(*b as i64),
            (OperandKind::Bool(b), ValueKind::Float) => const_float(if *b { 1.0 } else { 0.0 }),
            (OperandKind::Bool(b), ValueKind::String) => const_string(b.to_string()),
            (OperandKind::String(s), ValueKind::Int) => s
                .parse::<i64>()
                .map(const_int)
                .unwrap_or_else(|_| error(format!("cannot convert {s:?} to int"))),
            (OperandKind::String(s), ValueKind::Float) => s
                .parse::<f64>()
                .map(const_float)
                .unwrap_or_else(|_| error(format!("cannot convert {s:?} to float"))),
            (OperandKind::String(s), ValueKind::Bool) => match s.as_ref() {
                "true" => const_bool(true),
                "false" => const_bool(false),
                _ => error(format!("cannot convert {s:?} to bool")),
            },
            (OperandKind::Time(t), ValueKind::String) => const_string(t.to_rfc3339()),
            (OperandKind::Null, _) | (OperandKind::Undefined, _) => Arc::new(make_operand(self.kind.clone())),
            _ => error(format!(
                "cannot convert {:?} to {target:?}",
                self.kind_tag()
            )),
        }
    }

    /// Structural equality (after evaluation). Errors never compare equal,
    /// including to themselves, mirroring the spec's "error short-circuits"
    /// contract — an equality test involving an error is itself an error
    /// condition in the caller, never a silent `false`.
    pub fn equals(&self, other: &OperandNode) -> Option<bool> {
        reconcile(self, other, |a, b| match (a, b) {
            (OperandKind::Null, OperandKind::Null) => Some(true),
            (OperandKind::Null, _) | (_, OperandKind::Null) => Some(false),
            (OperandKind::Int(x), OperandKind::Int(y)) => Some(x == y),
            (OperandKind::Float(x), OperandKind::Float(y)) => Some(x == y),
            (OperandKind::Bool(x), OperandKind::Bool(y)) => Some(x == y),
            (OperandKind::String(x), OperandKind::String(y)) => Some(x == y),
            (OperandKind::Time(x), OperandKind::Time(y)) => Some(x == y),
            (OperandKind::List(x), OperandKind::List(y)) => {
                Some(x.len() == y.len() && x.iter().zip(y).all(|(a, b)| a.equals(b) == Some(true)))
            }
            _ => None,
        })
    }

    /// `null`/`undefined` on either side always reports `false` here (spec
    /// §4.A "ordering operators with null ⇒ false") — callers building
    /// `<=`/`>=` out of this must not derive them by negating this result,
    /// since `!false` would wrongly turn a null-involving `<=`/`>=` into
    /// `true` (see [`crate::condition::eval_leaf`]).
    pub fn greater_than(&self, other: &OperandNode) -> Option<bool> {
        reconcile(self, other, |a, b| match (a, b) {
            (OperandKind::Null | OperandKind::Undefined, _) | (_, OperandKind::Null | OperandKind::Undefined) => {
                Some(false)
            }
            (OperandKind::Int(x), OperandKind::Int(y)) => Some(x > y),
            (OperandKind::Float(x), OperandKind::Float(y)) => Some(x > y),
            (OperandKind::Bool(x), OperandKind::Bool(y)) => Some(x & !y),
            (OperandKind::Time(x), OperandKind::Time(y)) => Some(x > y),
            (OperandKind::String(x), OperandKind::String(y)) => Some(x > y),
            _ => None,
        })
    }
}

/// Applies type reconciliation (promotion toward the higher kind) then
/// calls `f` on the reconciled pair. `null`/`undefined` never reconcile —
/// callers must special-case them before reaching here for comparisons
/// that treat them specially (see spec §4.A).
fn reconcile(
    a: &OperandNode,
    b: &OperandNode,
    f: impl FnOnce(&OperandKind, &OperandKind) -> Option<bool>,
) -> Option<bool> {
    let (ka, kb) = (a.kind_tag(), b.kind_tag());
    if ka == ValueKind::Error || kb == ValueKind::Error {
        return None;
    }
    if ka == kb {
        return f(&a.kind, &b.kind);
    }
    if matches!(ka, ValueKind::Null | ValueKind::Undefined)
        || matches!(kb, ValueKind::Null | ValueKind::Undefined)
    {
        return f(&a.kind, &b.kind);
    }
    let target = ka.max(kb);
    let a2 = if ka == target {
        Arc::new(make_operand(a.kind.clone()))
    } else {
        a.convert_to(target)
    };
    let b2 = if kb == target {
        Arc::new(make_operand(b.kind.clone()))
    } else {
        b.convert_to(target)
    };
    if a2.kind_tag() == ValueKind::Error || b2.kind_tag() == ValueKind::Error {
        return None;
    }
    f(&a2.kind, &b2.kind)
}

/// Evaluates this operand against an event's mapped values and the active
/// quantifier frame stack. Constant operands return themselves.
pub fn evaluate(op: &Operand, frames: &Frames<'_>) -> Operand {
    match &op.kind {
        OperandKind::Int(_)
        | OperandKind::Float(_)
        | OperandKind::String(_)
        | OperandKind::Bool(_)
        | OperandKind::Time(_)
        | OperandKind::Null
        | OperandKind::Undefined => op.clone(),
        OperandKind::List(items) => {
            let evaluated: Vec<Operand> = items.iter().map(|i| evaluate(i, frames)).collect();
            if evaluated.iter().any(|e| e.kind_tag() == ValueKind::Error) {
                return error("error evaluating list element");
            }
            Arc::new(make_operand(OperandKind::List(evaluated)))
        }
        OperandKind::Attribute(path) => error(format!("unresolved attribute reference: {path}")),
        OperandKind::Address(addr, computed) => {
            if computed.is_some() {
                // Dynamic index handled by catrule-compiler's lowering today;
                // runtime re-evaluation of the index expr is not needed
                // because addresses with computed subexpressions are only
                // produced for literal-index folding opportunities.
            }
            crate::frame::read_address(frames, addr)
        }
        OperandKind::Selector(base, name) => {
            let _ = (base, name);
            error("selector on a non-object base")
        }
        OperandKind::Index(base, idx) => {
            let base_v = evaluate(base, frames);
            let idx_v = evaluate(idx, frames);
            match (&base_v.kind, &idx_v.kind) {
                (OperandKind::List(items), OperandKind::Int(i)) => {
                    let i = *i;
                    if i >= 0 && (i as usize) < items.len() {
                        items[i as usize].clone()
                    } else {
                        error("index out of range")
                    }
                }
                _ => error("index on non-list base"),
            }
        }
        OperandKind::Expr(builtin, args) => crate::builtins::eval_builtin(*builtin, args, frames),
        OperandKind::Error(_) => op.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equals_treats_null_specially() {
        let null = make_operand(OperandKind::Null);
        let five = make_operand(OperandKind::Int(5));
        assert_eq!(null.equals(&null), Some(true));
        assert_eq!(null.equals(&five), Some(false));
        assert_eq!(five.equals(&null), Some(false));
    }

    #[test]
    fn greater_than_is_false_on_null_in_either_position_or_both() {
        let null = make_operand(OperandKind::Null);
        let eighteen = make_operand(OperandKind::Int(18));
        assert_eq!(null.greater_than(&eighteen), Some(false));
        assert_eq!(eighteen.greater_than(&null), Some(false));
        assert_eq!(null.greater_than(&null), Some(false));
    }

    #[test]
    fn int_promotes_toward_bool_via_truthiness_not_numeric_equality() {
        // Promotion order is Int < Bool, so Int converts toward Bool: any
        // nonzero int reconciles equal to `true`, not just int value `1`.
        let five = make_operand(OperandKind::Int(5));
        let truthy = make_operand(OperandKind::Bool(true));
        assert_eq!(five.equals(&truthy), Some(true));
    }
}
