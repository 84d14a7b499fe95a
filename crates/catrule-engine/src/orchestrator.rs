//! Top-level Orchestrator (spec §4.G): glues the attribute mapper, the
//! compiled evaluators, and the category engine runtime together into the
//! single `register_rule` → `finalize` → `match` lifecycle of spec §6.

use crate::build::CategoryEngineBuilder;
use crate::error::EngineError;
use crate::metrics::EngineMetrics;
use crate::runtime::CategoryEngine;
use catrule_compiler::{CompiledRepository, EvalRef, RuleCompiler};
use catrule_core::condition::eval_leaf;
use catrule_core::{
    address_key, evaluate, mapper, AttributeDictionary, CategoryId, Condition, Frames, OperandKind,
    ValuesPool,
};
use std::collections::HashSet;
use std::sync::Arc;

pub type RuleId = u64;

/// Single-threaded rule registration phase (spec §5: "rule registration is
/// single-threaded"). Holds the expression compiler's CSE cache and is
/// consumed by [`finalize`](EngineBuilder::finalize).
pub struct EngineBuilder {
    compiler: RuleCompiler,
    rule_conditions: Vec<Condition>,
    rule_metadata: Vec<Option<serde_json::Value>>,
    category_optimize: crate::build::OptimizeOptions,
    next_rule_id: RuleId,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::with_optimize(crate::build::OptimizeOptions::default())
    }

    pub fn with_optimize(category_optimize: crate::build::OptimizeOptions) -> Self {
        Self {
            compiler: RuleCompiler::new(Arc::new(AttributeDictionary::new())),
            rule_conditions: Vec::new(),
            rule_metadata: Vec::new(),
            category_optimize,
            next_rule_id: 0,
        }
    }

    /// Registers one rule's boolean expression text, returning its assigned
    /// rule id (registration order, per spec §6).
    #[tracing::instrument(level = "debug", skip(self, text), fields(rule_id = self.next_rule_id))]
    pub fn register_rule(&mut self, text: &str) -> Result<RuleId, EngineError> {
        self.register_rule_with_metadata(text, None)
    }

    pub fn register_rule_with_metadata(
        &mut self,
        text: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<RuleId, EngineError> {
        let condition = self.compiler.compile_condition(text)?;
        let rule_id = self.next_rule_id;
        self.next_rule_id += 1;
        self.rule_conditions.push(condition);
        self.rule_metadata.push(metadata);
        Ok(rule_id)
    }

    /// Consumes the builder: runs the category engine builder over every
    /// registered rule's condition tree and returns the immutable, shareable
    /// [`Engine`].
    #[tracing::instrument(level = "info", skip(self))]
    pub fn finalize(self) -> Engine {
        let repo = self.compiler.finalize();
        let mut cat_builder = CategoryEngineBuilder::with_optimize(repo.max_category, self.category_optimize);
        for (rule_id, condition) in self.rule_conditions.iter().enumerate() {
            cat_builder.add_rule(rule_id as RuleId, condition);
        }
        let category_engine = cat_builder.finalize();
        tracing::info!(
            domain = "build",
            rules = self.rule_metadata.len(),
            max_category = repo.max_category,
            "category engine finalized"
        );
        let values_pool = ValuesPool::new(repo.dict.num_root_slots());
        Engine {
            dict: repo.dict.clone(),
            repo,
            category_engine,
            rule_metadata: self.rule_metadata,
            metrics: EngineMetrics::default(),
            values_pool,
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable, `Send + Sync` compiled engine (spec §5): all read paths —
/// `match`, `get_rule_metadata` — are lock-free once built.
pub struct Engine {
    dict: Arc<AttributeDictionary>,
    repo: CompiledRepository,
    category_engine: CategoryEngine,
    rule_metadata: Vec<Option<serde_json::Value>>,
    metrics: EngineMetrics,
    /// Pool of root `values` rows, sized to the dictionary's scalar slot
    /// count once — reused across calls to `match_event` instead of
    /// allocating fresh on every event (spec §4.C "Pooling", §3 "Scratch
    /// vectors … are pooled to amortize allocation").
    values_pool: ValuesPool,
}

impl Engine {
    pub fn dictionary(&self) -> &AttributeDictionary {
        &self.dict
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn get_rule_metadata(&self, rule_id: RuleId) -> Option<&serde_json::Value> {
        self.rule_metadata.get(rule_id as usize).and_then(|m| m.as_ref())
    }

    /// Number of `values` rows currently sitting idle in the pool —
    /// diagnostic only, not part of the matching contract.
    pub fn pooled_rows_free(&self) -> usize {
        self.values_pool.len_free()
    }

    /// Matches `event` against every registered rule, returning every
    /// matching rule id (spec §4.G).
    ///
    /// The root `values` row is drawn from this engine's pool and returned
    /// after matching completes, whether or not an error or early return
    /// occurs on the way — explicit release, not drop-based, per spec §3
    /// "Release is explicit after matching".
    pub fn match_event(&self, event: &serde_json::Value) -> Vec<RuleId> {
        let mut observed: HashSet<EvalRef> = HashSet::new();
        let row = self.values_pool.acquire();
        let event_map = mapper::map_event_into(&self.dict, event, row, |address| {
            let key = address_key(address);
            if let Some(refs) = self.repo.evaluator_index.get(&key) {
                observed.extend(refs.iter().copied());
            }
        });
        observed.extend(self.repo.always_evaluate.iter().copied());

        let mut ordered: Vec<EvalRef> = observed.into_iter().collect();
        ordered.sort_by_key(eval_ref_sort_key);

        let frames = Frames::new(&event_map.values);
        let mut categories: Vec<CategoryId> = Vec::new();
        for eval_ref in ordered {
            self.metrics.add_cat_evals(1);
            self.dispatch(eval_ref, &frames, &mut categories);
        }

        let result = self.category_engine.match_categories(&categories, &self.metrics);
        drop(frames);
        self.values_pool.release(event_map.values);
        result
    }

    fn dispatch(&self, eval_ref: EvalRef, frames: &Frames<'_>, categories: &mut Vec<CategoryId>) {
        match eval_ref {
            EvalRef::Plain(cat) => {
                let Some(cond) = self.repo.evaluators.get(&cat) else { return };
                let result = eval_leaf(cond, frames);
                push_leaf_result(cat, &result, categories);
            }
            EvalRef::EqGroup(g) => {
                let Some(group) = self.repo.equal_to_constant.get(g as usize) else { return };
                let value = evaluate(&group.varying, frames);
                // Exact-hash hit: the evaluated value's concrete kind
                // matches a registered constant's. Covers the common case
                // with a single O(1) lookup.
                if let Some(&idx) = group.by_hash.get(&value.hash()) {
                    categories.extend(group.constants[idx].1.iter().copied());
                }
                // A constant of a different concrete kind can still
                // reconcile equal under the promotion order `equals` uses
                // (e.g. `flag == 1` against a JSON boolean `flag`), which
                // the hash lookup above can't see since it only indexes
                // same-kind constants. Same-kind constants are already
                // fully covered above, so skip those here.
                let value_kind = value.kind_tag();
                for (constant, cats) in &group.constants {
                    if constant.kind_tag() == value_kind {
                        continue;
                    }
                    if value.equals(constant) == Some(true) {
                        categories.extend(cats.iter().copied());
                    }
                }
            }
            EvalRef::ContainsGroup(g) => {
                let Some(group) = self.repo.contains_any.get(g as usize) else { return };
                let value = evaluate(&group.varying, frames);
                let OperandKind::String(s) = &value.kind else { return };
                let Some(automaton) = &group.automaton else { return };
                for m in automaton.find_iter(s.as_ref()) {
                    if let Some(cats) = group.pattern_categories.get(m.pattern().as_usize()) {
                        categories.extend(cats.iter().copied());
                    }
                }
            }
        }
    }
}

/// Dispatches a leaf evaluator's result per spec §4.D "Category result
/// interpretation": a `Compare`/`Truthy` leaf reports `Bool(true)`, which
/// fires the leaf's own (statically assigned) category `cat`. An `Expr`
/// leaf computes its own dynamic category id(s): `Int(n != 0)` fires `n`,
/// `List([Int, ...])` fires each. Anything else fires nothing.
fn push_leaf_result(cat: CategoryId, result: &catrule_core::Operand, categories: &mut Vec<CategoryId>) {
    match &result.kind {
        OperandKind::Bool(true) => categories.push(cat),
        OperandKind::Int(n) if *n != 0 => categories.push(*n),
        OperandKind::List(items) => {
            for item in items {
                if let OperandKind::Int(n) = &item.kind {
                    categories.push(*n);
                }
            }
        }
        _ => {}
    }
}

fn eval_ref_sort_key(r: &EvalRef) -> (u8, i64) {
    match r {
        EvalRef::Plain(c) => (0, *c),
        EvalRef::EqGroup(g) => (1, *g as i64),
        EvalRef::ContainsGroup(g) => (2, *g as i64),
    }
}
