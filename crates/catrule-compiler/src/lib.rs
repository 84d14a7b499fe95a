//! The expression compiler (spec §4.D): turns one rule's `Expr(text)`
//! condition into a `Category` condition tree plus side effects in the
//! shared compare-condition repository (CSE cache, attribute→evaluator
//! index, always-evaluate set, fast-path tables).

mod error;
mod fastpath;
mod lower;
mod scope;

pub use error::CompileError;

use catrule_core::{
    address_key, make_condition, AddressKey, AttributeAddress, AttributeDictionary, CategoryId,
    Condition, ConditionKind, ContentHash, Interner, Operand, OperandKind,
};
use fastpath::{ContainsAnyGroup, EqualToConstantGroup};
use lower::Bool;
use scope::ScopeStack;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One way a category id can be triggered at match time — either a plain,
/// individually-evaluated leaf condition, or a shared fast-path group that
/// several rules' leaves folded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalRef {
    Plain(CategoryId),
    EqGroup(u32),
    ContainsGroup(u32),
}

pub struct CompiledContainsAny {
    pub varying: Operand,
    pub automaton: Option<aho_corasick::AhoCorasick>,
    /// Indexed by automaton pattern id.
    pub pattern_categories: Vec<Vec<CategoryId>>,
}

pub struct CompiledEqualToConstant {
    pub varying: Operand,
    /// Exact-hash index into `constants`, for the common case where the
    /// evaluated value's concrete kind matches a registered constant's.
    pub by_hash: HashMap<ContentHash, usize>,
    /// Every distinct constant compared against `varying`, kept (not just
    /// its hash) so a constant of a different concrete kind than the
    /// evaluated value can still be checked through the promotion-aware
    /// `equals()` — `by_hash` alone would miss e.g. `flag == 1` against an
    /// event where `flag` is a JSON boolean.
    pub constants: Vec<(Operand, Vec<CategoryId>)>,
}

/// The compiler's accumulated output, consumed by the category engine
/// builder (spec §4.E) and the orchestrator's runtime (§4.F/§4.G).
pub struct CompiledRepository {
    pub dict: Arc<AttributeDictionary>,
    pub evaluators: HashMap<CategoryId, Condition>,
    pub evaluator_index: HashMap<AddressKey, Vec<EvalRef>>,
    pub always_evaluate: Vec<EvalRef>,
    pub equal_to_constant: Vec<CompiledEqualToConstant>,
    pub contains_any: Vec<CompiledContainsAny>,
    pub max_category: CategoryId,
}

pub struct RuleCompiler {
    dict: Arc<AttributeDictionary>,
    operands: Interner<catrule_core::operand::OperandNode>,
    compare_cache: HashMap<ContentHash, CategoryId>,
    next_category: CategoryId,
    evaluator_index: HashMap<AddressKey, HashSet<EvalRefKey>>,
    always_evaluate: HashSet<EvalRefKey>,
    evaluators: HashMap<CategoryId, Condition>,
    equal_to_constant: Vec<EqualToConstantGroup>,
    equal_to_constant_by_hash: HashMap<ContentHash, u32>,
    contains_any: Vec<ContainsAnyGroup>,
    contains_any_by_hash: HashMap<ContentHash, u32>,
}

/// Hashable key for an [`EvalRef`] so the address index / always-evaluate
/// set can dedupe without re-registering the same group twice.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum EvalRefKey {
    Plain(CategoryId),
    EqGroup(u32),
    ContainsGroup(u32),
}

impl From<EvalRefKey> for EvalRef {
    fn from(k: EvalRefKey) -> Self {
        match k {
            EvalRefKey::Plain(c) => EvalRef::Plain(c),
            EvalRefKey::EqGroup(g) => EvalRef::EqGroup(g),
            EvalRefKey::ContainsGroup(g) => EvalRef::ContainsGroup(g),
        }
    }
}

impl RuleCompiler {
    pub fn new(dict: Arc<AttributeDictionary>) -> Self {
        Self {
            dict,
            operands: Interner::new(),
            compare_cache: HashMap::new(),
            next_category: 1,
            evaluator_index: HashMap::new(),
            always_evaluate: HashSet::new(),
            evaluators: HashMap::new(),
            equal_to_constant: Vec::new(),
            equal_to_constant_by_hash: HashMap::new(),
            contains_any: Vec::new(),
            contains_any_by_hash: HashMap::new(),
        }
    }

    /// Compiles one rule's textual expression into its `Category` condition
    /// tree, registering every new leaf in the shared repository.
    pub fn compile_condition(&mut self, text: &str) -> Result<Condition, CompileError> {
        let ast = catrule_lang::parse_expression(text)?;
        let mut scopes = ScopeStack::new();
        let tree = self.lower_bool(&mut scopes, &ast)?;
        Ok(self.assign_categories(tree))
    }

    fn assign_categories(&mut self, b: Bool) -> Condition {
        match b {
            Bool::And(items) => {
                let cs = items.into_iter().map(|i| self.assign_categories(i)).collect();
                Arc::new(make_condition(ConditionKind::And(cs)))
            }
            Bool::Or(items) => {
                let cs = items.into_iter().map(|i| self.assign_categories(i)).collect();
                Arc::new(make_condition(ConditionKind::Or(cs)))
            }
            Bool::Leaf { negated, kind } => {
                let cat = self.category_for_leaf(kind);
                if negated {
                    Arc::new(make_condition(ConditionKind::Not(cat)))
                } else {
                    cat
                }
            }
        }
    }

    fn category_for_leaf(&mut self, kind: ConditionKind) -> Condition {
        let probe = make_condition(kind.clone());
        let hash = probe.hash();
        if let Some(&id) = self.compare_cache.get(&hash) {
            // CSE: structurally identical leaf already registered — reuse
            // its category id and discard this duplicate's side effects.
            return catrule_core::category(id);
        }

        let id = self.next_category;
        self.next_category += 1;
        self.compare_cache.insert(hash, id);

        let mut addresses = HashSet::new();
        collect_condition_addresses(&kind, &mut addresses);

        let always = addresses.is_empty() || needs_always_evaluate(&kind) || is_quantifier_root(&kind);

        let eval_ref = self.register_fastpath_or_plain(id, &kind);

        if always {
            self.always_evaluate.insert(eval_ref);
        } else {
            for key in &addresses {
                self.evaluator_index.entry(key.clone()).or_default().insert(eval_ref);
            }
        }

        self.evaluators.insert(id, Arc::new(make_condition(kind)));
        catrule_core::category(id)
    }

    /// Detects the compare-equal-to-constant and `containsAny` shapes and
    /// folds the new category into the matching shared group; everything
    /// else becomes its own plain evaluator.
    fn register_fastpath_or_plain(&mut self, id: CategoryId, kind: &ConditionKind) -> EvalRefKey {
        if let ConditionKind::Compare(catrule_core::CompareOp::Eq, l, r) = kind {
            if let Some((varying, constant)) = split_const(l, r) {
                let vhash = varying.hash();
                let gidx = *self.equal_to_constant_by_hash.entry(vhash).or_insert_with(|| {
                    self.equal_to_constant.push(EqualToConstantGroup::new(varying.clone()));
                    (self.equal_to_constant.len() - 1) as u32
                });
                self.equal_to_constant[gidx as usize].add(constant, id);
                return EvalRefKey::EqGroup(gidx);
            }
        }
        if let ConditionKind::Truthy(op) = kind {
            if let OperandKind::Expr(catrule_core::Builtin::ContainsAny, args) = &op.kind {
                if let [varying, needles @ ..] = args.as_slice() {
                    let vhash = varying.hash();
                    let gidx = *self.contains_any_by_hash.entry(vhash).or_insert_with(|| {
                        self.contains_any.push(ContainsAnyGroup::new(varying.clone()));
                        (self.contains_any.len() - 1) as u32
                    });
                    for needle in needles {
                        if let OperandKind::String(s) = &needle.kind {
                            self.contains_any[gidx as usize]
                                .needles
                                .push((s.to_string(), id));
                        }
                    }
                    return EvalRefKey::ContainsGroup(gidx);
                }
            }
        }
        EvalRefKey::Plain(id)
    }

    pub fn finalize(self) -> CompiledRepository {
        let evaluator_index = self
            .evaluator_index
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().map(EvalRef::from).collect()))
            .collect();
        let always_evaluate = self.always_evaluate.into_iter().map(EvalRef::from).collect();
        let equal_to_constant = self
            .equal_to_constant
            .into_iter()
            .map(|g| {
                let varying = g.varying.clone();
                let (by_hash, constants) = g.into_compiled();
                CompiledEqualToConstant { varying, by_hash, constants }
            })
            .collect();
        let contains_any = self
            .contains_any
            .into_iter()
            .map(|g| {
                let automaton = g.build();
                let pattern_categories = g.needles.iter().map(|(_, cat)| vec![*cat]).collect();
                CompiledContainsAny {
                    varying: g.varying,
                    automaton,
                    pattern_categories,
                }
            })
            .collect();
        CompiledRepository {
            dict: self.dict,
            evaluators: self.evaluators,
            evaluator_index,
            always_evaluate,
            equal_to_constant,
            contains_any,
            max_category: self.next_category - 1,
        }
    }
}

fn split_const<'a>(l: &'a Operand, r: &'a Operand) -> Option<(&'a Operand, &'a Operand)> {
    match (l.is_const(), r.is_const()) {
        (false, true) => Some((l, r)),
        (true, false) => Some((r, l)),
        _ => None,
    }
}

/// Some comparisons can evaluate `true` even when every address they
/// reference is absent from the event (binary mode reads a missing field as
/// `null`), so they must run unconditionally rather than being gated on
/// address observation:
/// - `== null` — a missing field reads as `null`, which equals `null`.
/// - any `!=` — `null != x` is `true` for every non-null `x` (spec §4.A),
///   so an absent operand can make the comparison fire no matter what the
///   other side is.
fn needs_always_evaluate(kind: &ConditionKind) -> bool {
    match kind {
        ConditionKind::Compare(catrule_core::CompareOp::Eq, l, r) => {
            matches!(l.kind, OperandKind::Null) || matches!(r.kind, OperandKind::Null)
        }
        ConditionKind::Compare(catrule_core::CompareOp::Ne, _, _) => true,
        _ => false,
    }
}

fn is_quantifier_root(kind: &ConditionKind) -> bool {
    matches!(
        kind,
        ConditionKind::Truthy(op)
            if matches!(op.kind, OperandKind::Expr(catrule_core::Builtin::ForAll | catrule_core::Builtin::ForSome, _))
    )
}

fn collect_condition_addresses(kind: &ConditionKind, out: &mut HashSet<AddressKey>) {
    match kind {
        ConditionKind::Compare(_, l, r) => {
            collect_operand_addresses(l, out);
            collect_operand_addresses(r, out);
        }
        ConditionKind::Truthy(op) => collect_operand_addresses(op, out),
        ConditionKind::And(cs) | ConditionKind::Or(cs) => {
            for c in cs {
                collect_condition_addresses(&c.kind, out);
            }
        }
        ConditionKind::Not(c) => collect_condition_addresses(&c.kind, out),
        ConditionKind::Category(_) | ConditionKind::Expr(_) | ConditionKind::Error(_) => {}
    }
}

fn address_full(addr: &AttributeAddress) -> AddressKey {
    address_key(&addr.full_address)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> RuleCompiler {
        RuleCompiler::new(Arc::new(AttributeDictionary::new()))
    }

    fn category_id(c: &Condition) -> CategoryId {
        match &c.kind {
            ConditionKind::Category(id) => *id,
            other => panic!("expected a bare Category leaf, got {other:?}"),
        }
    }

    #[test]
    fn identical_subexpressions_across_rules_share_one_category() {
        let mut c = compiler();
        let r1 = c.compile_condition("user.age > 18").unwrap();
        let r2 = c.compile_condition("user.age > 18 && user.country == \"US\"").unwrap();

        let r1_cat = category_id(&r1);
        let ConditionKind::And(children) = &r2.kind else { panic!("expected And") };
        let shared_cat = category_id(&children[0]);
        assert_eq!(r1_cat, shared_cat, "the shared `user.age > 18` compare must reuse one category id");
    }

    #[test]
    fn negated_equality_folds_into_canonical_compare_not_a_wrapper() {
        let mut c = compiler();
        let positive = c.compile_condition("user.country == \"US\"").unwrap();
        let negated = c.compile_condition("!(user.country == \"US\")").unwrap();

        // `==`/`!=` fold straight into each other (the fold is exact even
        // with a missing field, since `!=` is the literal negation of `==`),
        // so both compile to a bare Category leaf, no Not wrapper.
        assert!(matches!(positive.kind, ConditionKind::Category(_)));
        assert!(matches!(negated.kind, ConditionKind::Category(_)));
        assert_ne!(category_id(&positive), category_id(&negated));
    }

    #[test]
    fn negated_ordering_wraps_the_same_category_instead_of_folding() {
        let mut c = compiler();
        let positive = c.compile_condition("user.age > 18").unwrap();
        let negated = c.compile_condition("!(user.age > 18)").unwrap();

        // Ordering operators are not folded into their "opposite" — `<=`
        // short-circuits to `false` on a missing/null field rather than
        // being `!(>)`, so the two would disagree there. The negation
        // instead wraps the very same category (CSE still applies to the
        // inner `>` leaf) in `Not`, leaning on the negated-category/
        // default-list mechanism to fire when `>` does not.
        let positive_id = category_id(&positive);
        match &negated.kind {
            ConditionKind::Not(inner) => assert_eq!(category_id(inner), positive_id),
            other => panic!("expected Not(Category), got {other:?}"),
        }
    }

    #[test]
    fn compiling_the_same_text_twice_yields_distinct_categories_no_cse() {
        // CSE operates on structurally-identical leaves seen during a single
        // compilation session — re-parsing identical text still produces
        // fresh AST nodes, but the *hash* is identical, so this still CSEs.
        let mut c = compiler();
        let a = c.compile_condition("user.age > 18").unwrap();
        let b = c.compile_condition("user.age > 18").unwrap();
        assert_eq!(category_id(&a), category_id(&b));
    }

    #[test]
    fn equal_to_constant_comparisons_fold_into_one_fastpath_group() {
        let mut c = compiler();
        c.compile_condition("user.country == \"US\"").unwrap();
        c.compile_condition("user.country == \"CA\"").unwrap();
        let repo = c.finalize();
        assert_eq!(repo.equal_to_constant.len(), 1, "same varying operand should share one group");
        assert_eq!(repo.equal_to_constant[0].constants.len(), 2);
    }

    #[test]
    fn not_equal_leaf_is_always_evaluated() {
        let mut c = compiler();
        c.compile_condition("field != 0").unwrap();
        let repo = c.finalize();
        assert_eq!(repo.always_evaluate.len(), 1);
        assert!(repo.evaluator_index.is_empty());
    }

    #[test]
    fn unknown_builtin_is_a_compile_error() {
        let mut c = compiler();
        let err = c.compile_condition("bogusBuiltin(user.age)").unwrap_err();
        assert!(matches!(err, CompileError::UnknownBuiltin(_)));
    }

    #[test]
    fn wrong_arity_is_a_compile_error() {
        let mut c = compiler();
        let err = c.compile_condition("hasValue(user.age, user.name)").unwrap_err();
        assert!(matches!(err, CompileError::ArityMismatch(..)));
    }

    #[test]
    fn null_equality_leaf_is_always_evaluated() {
        let mut c = compiler();
        c.compile_condition("field == null").unwrap();
        let repo = c.finalize();
        assert_eq!(repo.always_evaluate.len(), 1);
        assert!(repo.evaluator_index.is_empty());
    }
}

fn collect_operand_addresses(op: &Operand, out: &mut HashSet<AddressKey>) {
    match &op.kind {
        OperandKind::Address(addr, computed) => {
            out.insert(address_full(addr));
            if let Some(c) = computed {
                collect_operand_addresses(c, out);
            }
        }
        OperandKind::List(items) => {
            for i in items {
                collect_operand_addresses(i, out);
            }
        }
        OperandKind::Selector(base, _) => collect_operand_addresses(base, out),
        OperandKind::Index(base, idx) => {
            collect_operand_addresses(base, out);
            collect_operand_addresses(idx, out);
        }
        OperandKind::Expr(_, args) => {
            for a in args {
                collect_operand_addresses(a, out);
            }
        }
        _ => {}
    }
}
