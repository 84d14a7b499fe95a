//! The condition tree: the boolean layer above operands. `And`/`Or`/`Not`
//! combine sub-conditions; `Compare` wraps a relational operator over two
//! operands; `Category` is the leaf form a condition is reduced to once
//! the expression compiler has assigned it a category id.

use crate::frame::Frames;
use crate::hash::{ContentHash, Hasher256};
use crate::operand::{const_bool, evaluate, Operand, OperandKind};
use std::sync::Arc;

pub type Condition = Arc<ConditionNode>;
pub type CategoryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

impl CompareOp {
    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Contains => "contains",
        }
    }
}

#[derive(Clone, Debug)]
pub enum ConditionKind {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Condition),
    Compare(CompareOp, Operand, Operand),
    /// A bare operand used as a boolean condition — builtin calls
    /// (`hasValue`, `forAll`, …) and any expression not shaped as a
    /// comparison. Evaluated per §4.D's result-kind dispatch.
    Truthy(Operand),
    /// Unparsed source text — only present transiently before lowering.
    Expr(String),
    Category(CategoryId),
    Error(String),
}

pub struct ConditionNode {
    pub kind: ConditionKind,
    hash: ContentHash,
}

impl ConditionNode {
    pub fn hash(&self) -> ContentHash {
        self.hash
    }
}

impl std::fmt::Debug for ConditionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ConditionKind::And(cs) => write!(f, "And({cs:?})"),
            ConditionKind::Or(cs) => write!(f, "Or({cs:?})"),
            ConditionKind::Not(c) => write!(f, "Not({c:?})"),
            ConditionKind::Compare(op, l, r) => write!(f, "Compare({}, {l:?}, {r:?})", op.name()),
            ConditionKind::Truthy(op) => write!(f, "Truthy({op:?})"),
            ConditionKind::Expr(s) => write!(f, "Expr({s:?})"),
            ConditionKind::Category(c) => write!(f, "Category({c})"),
            ConditionKind::Error(msg) => write!(f, "Error({msg})"),
        }
    }
}

fn hash_of(kind: &ConditionKind) -> ContentHash {
    let mut h = Hasher256::new();
    match kind {
        ConditionKind::And(cs) => {
            h.tag(0).u64(cs.len() as u64);
            for c in cs {
                h.child(&c.hash());
            }
        }
        ConditionKind::Or(cs) => {
            h.tag(1).u64(cs.len() as u64);
            for c in cs {
                h.child(&c.hash());
            }
        }
        ConditionKind::Not(c) => {
            h.tag(2).child(&c.hash());
        }
        ConditionKind::Compare(op, l, r) => {
            h.tag(3).str(op.name()).child(&l.hash()).child(&r.hash());
        }
        ConditionKind::Expr(s) => {
            h.tag(4).str(s);
        }
        ConditionKind::Category(c) => {
            h.tag(5).i64(*c);
        }
        ConditionKind::Error(msg) => {
            h.tag(6).str(msg);
        }
        ConditionKind::Truthy(op) => {
            h.tag(7).child(&op.hash());
        }
    }
    h.finish()
}

pub fn make_condition(kind: ConditionKind) -> ConditionNode {
    let hash = hash_of(&kind);
    ConditionNode { kind, hash }
}

pub fn category(id: CategoryId) -> Condition {
    Arc::new(make_condition(ConditionKind::Category(id)))
}

pub fn error(msg: impl Into<String>) -> Condition {
    Arc::new(make_condition(ConditionKind::Error(msg.into())))
}

/// Evaluates a leaf condition (`Compare` or `Truthy` — the only shapes the
/// expression compiler ever attaches a category id to) against one event,
/// returning the raw result for the caller to dispatch per spec §4.D's
/// "Category result interpretation" (`Bool(true)`/`Int(n≠0)`/`List`/…).
pub fn eval_leaf(cond: &ConditionNode, frames: &Frames<'_>) -> Operand {
    match &cond.kind {
        ConditionKind::Compare(op, l, r) => {
            let lv = evaluate(l, frames);
            let rv = evaluate(r, frames);
            let result = match op {
                CompareOp::Eq => lv.equals(&rv),
                CompareOp::Ne => lv.equals(&rv).map(|b| !b),
                CompareOp::Lt => rv.greater_than(&lv),
                CompareOp::Gt => lv.greater_than(&rv),
                // `<=`/`>=` are `!(>)`/`!(<)` only for non-null operands —
                // `greater_than` reports `false` on a null operand (spec
                // §4.A), and negating that would wrongly turn a null-
                // involving `<=`/`>=` into `true`. Short-circuit those to
                // `false` directly instead of deriving them from `>`/`<`.
                CompareOp::Le => {
                    if is_null_like(&lv) || is_null_like(&rv) {
                        Some(false)
                    } else {
                        lv.greater_than(&rv).map(|b| !b)
                    }
                }
                CompareOp::Ge => {
                    if is_null_like(&lv) || is_null_like(&rv) {
                        Some(false)
                    } else {
                        rv.greater_than(&lv).map(|b| !b)
                    }
                }
                CompareOp::Contains => match (&lv.kind, &rv.kind) {
                    (OperandKind::String(s), OperandKind::String(needle)) => {
                        Some(s.contains(needle.as_ref()))
                    }
                    _ => None,
                },
            };
            match result {
                Some(b) => const_bool(b),
                None => crate::operand::error("comparison on incompatible or error operand"),
            }
        }
        ConditionKind::Truthy(op) => evaluate(op, frames),
        other => crate::operand::error(format!("{other:?} is not a leaf condition")),
    }
}

fn is_null_like(op: &Operand) -> bool {
    matches!(op.kind, OperandKind::Null | OperandKind::Undefined)
}
