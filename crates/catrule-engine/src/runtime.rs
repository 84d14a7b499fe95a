//! Category Engine Runtime (spec §4.F): the per-event bitmask matcher that
//! turns a list of fired categories into a list of matching rule ids.

use crate::build::{CatSetMask, RuleId, SetId};
use crate::metrics::EngineMetrics;
use catrule_core::CategoryId;
use std::collections::HashMap;

pub(crate) struct CompiledSet {
    pub num_or_sets: u32,
    pub rule_ids: Vec<RuleId>,
    pub output: Vec<CatSetMask>,
}

/// The built bitmask tables, immutable and freely shareable once
/// `finalize()` returns it (spec §5: "a compiled engine is immutable;
/// matching is read-only on shared state").
pub struct CategoryEngine {
    max_category: CategoryId,
    sets: Vec<Option<CompiledSet>>,
    cat_masks: HashMap<CategoryId, Vec<CatSetMask>>,
    /// Positive categories whose negation must fire when the positive form
    /// did not (spec §4.E "Default-category list").
    default_list: Vec<CategoryId>,
}

impl CategoryEngine {
    pub(crate) fn from_builder(
        max_category: CategoryId,
        sets: Vec<Option<CompiledSet>>,
        cat_masks: HashMap<CategoryId, Vec<CatSetMask>>,
        default_list: Vec<CategoryId>,
    ) -> Self {
        Self { max_category, sets, cat_masks, default_list }
    }

    pub fn max_category(&self) -> CategoryId {
        self.max_category
    }

    /// Runs the spec §4.F algorithm over one event's fired category list,
    /// returning every matching rule id (deterministic order: each rule id
    /// appears once, in the order its owning set completed).
    pub fn match_categories(&self, categories: &[CategoryId], metrics: &EngineMetrics) -> Vec<RuleId> {
        let mut masks: Vec<u64> = vec![0; self.sets.len()];
        let mut result = Vec::new();

        let mut fired_default = vec![false; self.default_list.len()];
        let default_index: HashMap<CategoryId, usize> = self
            .default_list
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i))
            .collect();

        for &c in categories {
            metrics.inc_bitmask_check();
            if let Some(&idx) = default_index.get(&c) {
                fired_default[idx] = true;
            }
            if let Some(csms) = self.cat_masks.get(&c) {
                metrics.inc_mask_array_lookup();
                self.apply_masks(csms, &mut masks, &mut result, metrics);
            }
        }

        for (idx, fired) in fired_default.iter().enumerate() {
            if *fired {
                continue;
            }
            let neg = self.default_list[idx] + self.max_category;
            if let Some(csms) = self.cat_masks.get(&neg) {
                metrics.inc_mask_array_lookup();
                self.apply_masks(csms, &mut masks, &mut result, metrics);
            }
        }

        result
    }

    /// `applyMasks`: ORs `bit` into `masks[set_id]` for every entry in
    /// `csms`; a set reaching `-1` (every OR-set satisfied) fires its rule
    /// ids and recursively propagates into whatever parent set referenced
    /// it as a synthetic member.
    ///
    /// Scalar baseline (spec §9: "reimplement `applyMasks` as a scalar loop
    /// first"). The `simd` feature swaps in [`Self::apply_masks_paired`]
    /// below, which processes two entries per iteration; both must produce
    /// bit-identical `result`/`masks` output.
    #[cfg(not(feature = "simd"))]
    fn apply_masks(&self, csms: &[CatSetMask], masks: &mut [u64], result: &mut Vec<RuleId>, metrics: &EngineMetrics) {
        for csm in csms {
            self.apply_one(csm, masks, result, metrics);
        }
    }

    #[cfg(feature = "simd")]
    fn apply_masks(&self, csms: &[CatSetMask], masks: &mut [u64], result: &mut Vec<RuleId>, metrics: &EngineMetrics) {
        self.apply_masks_paired(csms, masks, result, metrics);
    }

    /// One `CatSetMask` entry's worth of work: OR `bit` into `masks[set_id]`,
    /// and on completion fire the set's rule ids and propagate into its
    /// parent via `output`.
    fn apply_one(&self, csm: &CatSetMask, masks: &mut [u64], result: &mut Vec<RuleId>, metrics: &EngineMetrics) {
        let set_id = csm.set_id as usize;
        let v = masks[set_id];
        if v == u64::MAX {
            // Already complete — further categories satisfying an
            // already-satisfied OR-set are a no-op.
            return;
        }
        let Some(set) = &self.sets[set_id] else { return };
        let full_mask = completion_mask(set.num_or_sets);
        let v2 = v | csm.bit;
        masks[set_id] = v2;
        if v2 == full_mask {
            masks[set_id] = u64::MAX;
            metrics.inc_bitmask_match();
            result.extend_from_slice(&set.rule_ids);
            if !set.output.is_empty() {
                self.apply_masks(&set.output, masks, result, metrics);
            }
        }
    }

    /// A "SIMD-capable variant [that processes] two set-updates per cycle
    /// using 128-bit vector OR" (spec §4.F). `portable_simd` is nightly-only,
    /// so this models the same data-parallel shape on stable: two `u64`
    /// lanes packed as one conceptual 128-bit OR, computing both updated
    /// mask values before either is written back. Falls back to the scalar
    /// path — one entry at a time — on an index collision within the pair
    /// (both entries touch the same `set_id`, so the lanes aren't
    /// independent) or a trailing odd entry. Observable behavior is
    /// identical to [`Self::apply_one`] run serially, per spec §9.
    #[cfg(feature = "simd")]
    fn apply_masks_paired(&self, csms: &[CatSetMask], masks: &mut [u64], result: &mut Vec<RuleId>, metrics: &EngineMetrics) {
        let mut i = 0;
        while i + 2 <= csms.len() {
            let (a, b) = (&csms[i], &csms[i + 1]);
            if a.set_id == b.set_id {
                self.apply_one(a, masks, result, metrics);
                self.apply_one(b, masks, result, metrics);
            } else {
                let (ia, ib) = (a.set_id as usize, b.set_id as usize);
                // Lane-parallel OR: read both slots, compute both updated
                // values, *then* write back — no intermediate state either
                // lane could observe from the other, matching a genuine
                // 128-bit vector OR of two independent u64 lanes. Completion
                // is then checked sequentially per lane (not from the `va2`/
                // `vb2` values computed here) — set A's own completion may
                // recursively propagate into set B's slot through `output`
                // before B's check runs, and that fresh read must win, or B
                // could lose an update the recursion just made to it.
                let (va, vb) = (masks[ia], masks[ib]);
                if va != u64::MAX {
                    masks[ia] = va | a.bit;
                }
                if vb != u64::MAX {
                    masks[ib] = vb | b.bit;
                }
                if va != u64::MAX {
                    self.maybe_complete(ia, masks, result, metrics);
                }
                if vb != u64::MAX {
                    self.maybe_complete(ib, masks, result, metrics);
                }
            }
            i += 2;
        }
        if i < csms.len() {
            self.apply_one(&csms[i], masks, result, metrics);
        }
    }

    /// Fires `set_id`'s rule ids and propagates into its parent if its mask
    /// has reached completion; a no-op if it's already complete (guards
    /// against double-firing when a sibling lane's recursive propagation
    /// already completed this same set).
    #[cfg(feature = "simd")]
    fn maybe_complete(&self, set_id: usize, masks: &mut [u64], result: &mut Vec<RuleId>, metrics: &EngineMetrics) {
        if masks[set_id] == u64::MAX {
            return;
        }
        let Some(set) = &self.sets[set_id] else { return };
        if masks[set_id] == completion_mask(set.num_or_sets) {
            masks[set_id] = u64::MAX;
            metrics.inc_bitmask_match();
            result.extend_from_slice(&set.rule_ids);
            if !set.output.is_empty() {
                self.apply_masks(&set.output, masks, result, metrics);
            }
        }
    }
}

/// The "all k OR-sets satisfied" mask. For `k == 64` this is `!0`, matching
/// the spec's `-1` sentinel directly; for `k < 64` it is the low-`k` bits.
fn completion_mask(num_or_sets: u32) -> u64 {
    if num_or_sets == 0 {
        0
    } else if num_or_sets >= 64 {
        u64::MAX
    } else {
        (1u64 << num_or_sets) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::CategoryEngineBuilder;
    use catrule_core::{category, make_condition, ConditionKind};
    use std::sync::Arc;

    fn and_of(cats: &[i64]) -> catrule_core::Condition {
        let cs: Vec<_> = cats.iter().map(|&c| category(c)).collect();
        Arc::new(make_condition(ConditionKind::And(cs)))
    }

    fn or_of(cats: &[i64]) -> catrule_core::Condition {
        let cs: Vec<_> = cats.iter().map(|&c| category(c)).collect();
        Arc::new(make_condition(ConditionKind::Or(cs)))
    }

    #[test]
    fn scenario_bitmask_basic() {
        // r1 = [1] or [2]; r2 = [1] or [2] or [3] — and-of-or shape, one
        // OR-set each (matching the literal scenario's intent of "any of").
        let mut builder = CategoryEngineBuilder::new(1000);
        builder.add_rule(1, &or_of(&[1, 2]));
        builder.add_rule(2, &or_of(&[1, 2, 3]));
        let engine = builder.finalize();
        let metrics = EngineMetrics::default();

        let mut r1 = engine.match_categories(&[1, 2], &metrics);
        r1.sort();
        assert_eq!(r1, vec![1, 2]);

        let mut r2 = engine.match_categories(&[1, 2, 3], &metrics);
        r2.sort();
        assert_eq!(r2, vec![1, 2]);
    }

    #[test]
    fn large_or_set_splits_and_still_matches_single_member() {
        let cats: Vec<i64> = (1..=80).collect();
        let mut builder = CategoryEngineBuilder::new(10_000);
        builder.add_rule(1, &or_of(&cats));
        let engine = builder.finalize();
        let metrics = EngineMetrics::default();

        for probe in [1i64, 40, 80] {
            let result = engine.match_categories(&[probe], &metrics);
            assert_eq!(result, vec![1], "probe {probe} should fire rule 1");
        }
        let snapshot = metrics.snapshot();
        assert!(snapshot.num_bitmask_matches >= 3);
    }

    #[test]
    fn and_of_two_or_sets_requires_both() {
        let cond = and_of_nested(&[1, 2], &[3, 4]);
        let mut builder = CategoryEngineBuilder::new(1000);
        builder.add_rule(1, &cond);
        let engine = builder.finalize();
        let metrics = EngineMetrics::default();

        assert!(engine.match_categories(&[1], &metrics).is_empty());
        assert_eq!(engine.match_categories(&[1, 3], &metrics), vec![1]);
    }

    fn and_of_nested(a: &[i64], b: &[i64]) -> catrule_core::Condition {
        Arc::new(make_condition(ConditionKind::And(vec![or_of(a), or_of(b)])))
    }

    #[test]
    fn default_list_fires_negation_over_missing_category() {
        // !cat(1) — should fire when event does not report category 1.
        let neg = Arc::new(make_condition(ConditionKind::Not(category(1))));
        let mut builder = CategoryEngineBuilder::new(1000);
        builder.add_rule(1, &neg);
        let engine = builder.finalize();
        let metrics = EngineMetrics::default();

        assert_eq!(engine.match_categories(&[], &metrics), vec![1]);
        assert!(engine.match_categories(&[1], &metrics).is_empty());
    }

    /// Exercises both the independent-lane pairing path (rules 1/2, disjoint
    /// sets) and the same-set-id-within-a-pair fallback (two categories of
    /// rule 3's own OR-set landing adjacently), asserting the `simd` feature
    /// still yields exactly the same matches as the scalar algorithm would.
    #[test]
    fn paired_and_scalar_csm_processing_agree() {
        let mut builder = CategoryEngineBuilder::new(1000);
        builder.add_rule(1, &or_of(&[1, 2]));
        builder.add_rule(2, &or_of(&[3, 4]));
        builder.add_rule(3, &or_of(&[5, 6]));
        let engine = builder.finalize();
        let metrics = EngineMetrics::default();

        let mut matched = engine.match_categories(&[2, 3, 5, 6], &metrics);
        matched.sort();
        assert_eq!(matched, vec![1, 2, 3]);
    }
}
