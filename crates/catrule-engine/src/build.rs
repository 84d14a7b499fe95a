//! Category Engine Builder (spec §4.E): converts each rule's `Category`
//! condition tree into the bitmask tables the runtime matches against.
//!
//! A rule's condition, once the expression compiler (§4.D) has reduced it to
//! `And`/`Or`/`Not(Category)`/`Category` leaves, is flattened into an
//! **and-of-or sentence**: an ordered list of OR-sets, each a set of
//! categories. `Not(Category(c))` is normalized to `Category(c + MaxCategory)`
//! so every leaf is a plain positive-comparable category id before
//! flattening starts.
//!
//! OR-sets nested more than one AND-OR level deep (an `And` appearing inside
//! an `Or`), and OR-sets or AND-arities exceeding the 64-bit mask width, are
//! both handled the same way: the overflow becomes its own synthetic
//! [`AndSentence`], referenced from its parent by a negative pseudo-category
//! (`MemberRef::Synthetic`) rather than inlined — its own completion
//! propagates into the parent's bit via `output`, the same mechanism
//! [`crate::runtime`] uses to chain `applyMasks` calls.

use catrule_core::{CategoryId, Condition, ConditionKind};
use std::collections::HashMap;

pub type RuleId = u64;
pub type SetId = u32;

/// Number of bits usable in one `CatSetRec`'s completion mask.
const MASK_WIDTH: usize = 64;

/// One category (or nested synthetic set) contributing to an OR-set's bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MemberRef {
    Cat(CategoryId),
    Synthetic(SetId),
}

#[derive(Debug, Clone, Default)]
struct OrSet {
    members: Vec<MemberRef>,
}

#[derive(Debug, Clone, Default)]
struct AndSentence {
    or_sets: Vec<OrSet>,
}

/// A built, bit-assigned `CatSetRec`: the AND-of-OR-sets structure with its
/// OR-sets' bits already decided, plus the rule ids attached at its root (if
/// any) and the parent masks its completion should propagate into (if it is
/// itself a synthetic set rather than a rule root).
struct CatSetRec {
    num_or_sets: u32,
    rule_ids: Vec<RuleId>,
    /// `(parent_set_id, parent_bit_mask)` pairs to apply when this set's own
    /// mask reaches completion (`-1`). Empty for rule-root sets.
    output: Vec<CatSetMask>,
}

/// One entry of the runtime's `cat -> [CatSetMask]` / `set -> [CatSetMask]`
/// tables: "OR this category/set's firing into `set_id`'s mask at `bit`".
#[derive(Debug, Clone, Copy)]
pub struct CatSetMask {
    pub set_id: SetId,
    pub bit: u64,
}

/// Tunable frequency thresholds for the optional OR/AND factoring passes
/// (spec §4.E "Optimizations"). Disabled entirely when `enabled` is false.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeOptions {
    pub enabled: bool,
    pub or_factor_threshold: u32,
    pub and_factor_threshold: u32,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            or_factor_threshold: 3,
            and_factor_threshold: 3,
        }
    }
}

/// Builds the bitmask tables for a batch of rules. Consumes `Category`
/// condition trees (the expression compiler's output) and a logic mode-
/// agnostic rule-id space; produces the table the runtime reads from.
pub struct CategoryEngineBuilder {
    max_category: CategoryId,
    sentences: Vec<Option<AndSentence>>,
    sentence_hash: HashMap<u64, SetId>,
    /// `rule_ids` attached directly to a sentence's root set — filled in as
    /// rules are added, before optimization/bit-assignment run.
    root_rule_ids: HashMap<SetId, Vec<RuleId>>,
    optimize: OptimizeOptions,
}

impl CategoryEngineBuilder {
    pub fn new(max_category: CategoryId) -> Self {
        Self::with_optimize(max_category, OptimizeOptions::default())
    }

    pub fn with_optimize(max_category: CategoryId, optimize: OptimizeOptions) -> Self {
        Self {
            max_category,
            sentences: Vec::new(),
            sentence_hash: HashMap::new(),
            root_rule_ids: HashMap::new(),
            optimize,
        }
    }

    /// Normalizes `Not(Category(c))` to `Category(c + MaxCategory)` and
    /// flattens the tree into an and-of-or sentence, interning it against
    /// any structurally identical sentence already registered by a prior
    /// rule (CSE at the AND/OR level, not just the leaf level).
    pub fn add_rule(&mut self, rule_id: RuleId, root: &Condition) {
        let sentence = self.flatten_and(root);
        let set_id = self.intern_sentence(sentence);
        self.root_rule_ids.entry(set_id).or_default().push(rule_id);
    }

    fn negated_category(&self, c: CategoryId) -> CategoryId {
        c + self.max_category
    }

    fn flatten_and(&mut self, cond: &Condition) -> AndSentence {
        match &cond.kind {
            ConditionKind::Category(c) => AndSentence {
                or_sets: vec![OrSet { members: vec![MemberRef::Cat(*c)] }],
            },
            ConditionKind::Not(inner) => {
                let ConditionKind::Category(c) = &inner.kind else {
                    unreachable!("category engine input must normalize Not to a Category leaf");
                };
                AndSentence {
                    or_sets: vec![OrSet { members: vec![MemberRef::Cat(self.negated_category(*c))] }],
                }
            }
            ConditionKind::And(children) => {
                let mut or_sets = Vec::new();
                for child in children {
                    match &child.kind {
                        ConditionKind::And(_) => or_sets.extend(self.flatten_and(child).or_sets),
                        ConditionKind::Or(_) => or_sets.push(self.flatten_or(child)),
                        ConditionKind::Category(_) | ConditionKind::Not(_) => {
                            or_sets.extend(self.flatten_and(child).or_sets)
                        }
                        other => unreachable!("category engine input must be And/Or/Not/Category, got {other:?}"),
                    }
                }
                AndSentence { or_sets }
            }
            ConditionKind::Or(_) => AndSentence { or_sets: vec![self.flatten_or(cond)] },
            other => unreachable!("category engine input must be And/Or/Not/Category, got {other:?}"),
        }
    }

    fn flatten_or(&mut self, cond: &Condition) -> OrSet {
        let ConditionKind::Or(children) = &cond.kind else {
            unreachable!("flatten_or called on non-Or condition");
        };
        let mut members = Vec::new();
        for child in children {
            match &child.kind {
                ConditionKind::Category(c) => members.push(MemberRef::Cat(*c)),
                ConditionKind::Not(inner) => {
                    let ConditionKind::Category(c) = &inner.kind else {
                        unreachable!("category engine input must normalize Not to a Category leaf");
                    };
                    members.push(MemberRef::Cat(self.negated_category(*c)));
                }
                ConditionKind::Or(_) => members.extend(self.flatten_or(child).members),
                ConditionKind::And(_) => {
                    // An AND nested inside an OR sits more than one AND-OR
                    // level deep — factor it out into its own synthetic set.
                    let nested = self.flatten_and(child);
                    let set_id = self.intern_sentence(nested);
                    members.push(MemberRef::Synthetic(set_id));
                }
                other => unreachable!("category engine input must be And/Or/Not/Category, got {other:?}"),
            }
        }
        OrSet { members: self.split_or_if_oversized(members) }
    }

    /// If an OR-set has grown past the 64-bit mask width, splits the excess
    /// into a synthetic set of its own (scenario 8.6: an 80-category OR-set
    /// still fires on any single member).
    fn split_or_if_oversized(&mut self, members: Vec<MemberRef>) -> Vec<MemberRef> {
        if members.len() <= MASK_WIDTH {
            return members;
        }
        let (head, tail) = members.split_at(MASK_WIDTH - 1);
        let overflow = self.split_or_if_oversized(tail.to_vec());
        let synthetic = AndSentence {
            or_sets: vec![OrSet { members: overflow }],
        };
        let set_id = self.intern_sentence(synthetic);
        let mut out = head.to_vec();
        out.push(MemberRef::Synthetic(set_id));
        out
    }

    /// If an AND sentence has grown past 64 OR-sets, splits the excess into
    /// a synthetic nested AND, referenced as one more OR-set slot in the
    /// parent (an OR-set whose sole member is the synthetic).
    fn split_and_if_oversized(&mut self, sentence: AndSentence) -> AndSentence {
        if sentence.or_sets.len() <= MASK_WIDTH {
            return sentence;
        }
        let AndSentence { or_sets } = sentence;
        let (head, tail) = or_sets.split_at(MASK_WIDTH - 1);
        let overflow = self.split_and_if_oversized(AndSentence { or_sets: tail.to_vec() });
        let set_id = self.intern_sentence(overflow);
        let mut out: Vec<OrSet> = head.to_vec();
        out.push(OrSet { members: vec![MemberRef::Synthetic(set_id)] });
        AndSentence { or_sets: out }
    }

    fn intern_sentence(&mut self, sentence: AndSentence) -> SetId {
        let sentence = self.split_and_if_oversized(sentence);
        let hash = canonical_hash(&sentence);
        if let Some(&id) = self.sentence_hash.get(&hash) {
            return id;
        }
        let id = self.sentences.len() as SetId;
        self.sentences.push(Some(sentence));
        self.sentence_hash.insert(hash, id);
        id
    }

    /// Consumes the builder, running the optional OR/AND factoring passes
    /// and assigning final bitmask tables.
    pub fn finalize(mut self) -> super::runtime::CategoryEngine {
        if self.optimize.enabled {
            self.factor_or_pairs();
            self.factor_and_pairs();
            self.inline_single_referrer_sets();
            self.garbage_collect();
        }
        self.assign_and_build()
    }

    /// OR-factoring: pairs of categories that co-occur within an OR-set
    /// above the frequency threshold are extracted into one shared
    /// synthetic set, replacing both originals with a single reference.
    fn factor_or_pairs(&mut self) {
        let mut freq: HashMap<(MemberRef, MemberRef), u32> = HashMap::new();
        for sentence in self.sentences.iter().flatten() {
            for or_set in &sentence.or_sets {
                for i in 0..or_set.members.len() {
                    for j in (i + 1)..or_set.members.len() {
                        let key = order_pair(or_set.members[i], or_set.members[j]);
                        *freq.entry(key).or_insert(0) += 1;
                    }
                }
            }
        }
        let hot: Vec<(MemberRef, MemberRef)> = freq
            .into_iter()
            .filter(|(_, n)| *n >= self.optimize.or_factor_threshold)
            .map(|(pair, _)| pair)
            .collect();
        for (a, b) in hot {
            let synthetic_id = self.intern_sentence(AndSentence {
                or_sets: vec![OrSet { members: vec![a, b] }],
            });
            for idx in 0..self.sentences.len() {
                if idx as SetId == synthetic_id {
                    continue;
                }
                let Some(sentence) = self.sentences[idx].take() else { continue };
                let or_sets = sentence
                    .or_sets
                    .into_iter()
                    .map(|or_set| {
                        if or_set.members.contains(&a) && or_set.members.contains(&b) {
                            let mut members: Vec<MemberRef> =
                                or_set.members.into_iter().filter(|m| *m != a && *m != b).collect();
                            members.push(MemberRef::Synthetic(synthetic_id));
                            OrSet { members }
                        } else {
                            or_set
                        }
                    })
                    .collect();
                self.sentences[idx] = Some(AndSentence { or_sets });
            }
        }
    }

    /// AND-factoring: pairs of OR-sets (by structural content) that co-occur
    /// within an AND sentence above the frequency threshold are extracted
    /// into a shared synthetic AND of just those two OR-sets.
    fn factor_and_pairs(&mut self) {
        let mut freq: HashMap<(u64, u64), u32> = HashMap::new();
        let mut by_hash: HashMap<u64, OrSet> = HashMap::new();
        for sentence in self.sentences.iter().flatten() {
            for i in 0..sentence.or_sets.len() {
                for j in (i + 1)..sentence.or_sets.len() {
                    let (ha, hb) = (hash_or_set(&sentence.or_sets[i]), hash_or_set(&sentence.or_sets[j]));
                    by_hash.entry(ha).or_insert_with(|| sentence.or_sets[i].clone());
                    by_hash.entry(hb).or_insert_with(|| sentence.or_sets[j].clone());
                    let key = if ha <= hb { (ha, hb) } else { (hb, ha) };
                    *freq.entry(key).or_insert(0) += 1;
                }
            }
        }
        let hot: Vec<(u64, u64)> = freq
            .into_iter()
            .filter(|(_, n)| *n >= self.optimize.and_factor_threshold)
            .map(|(pair, _)| pair)
            .collect();
        for (ha, hb) in hot {
            let (Some(a), Some(b)) = (by_hash.get(&ha).cloned(), by_hash.get(&hb).cloned()) else {
                continue;
            };
            let synthetic_id = self.intern_sentence(AndSentence { or_sets: vec![a.clone(), b.clone()] });
            for idx in 0..self.sentences.len() {
                if idx as SetId == synthetic_id {
                    continue;
                }
                let Some(sentence) = self.sentences[idx].take() else { continue };
                let has_a = sentence.or_sets.iter().any(|o| hash_or_set(o) == ha);
                let has_b = sentence.or_sets.iter().any(|o| hash_or_set(o) == hb);
                let or_sets = if has_a && has_b {
                    let mut remaining: Vec<OrSet> = sentence
                        .or_sets
                        .into_iter()
                        .filter(|o| hash_or_set(o) != ha && hash_or_set(o) != hb)
                        .collect();
                    remaining.push(OrSet { members: vec![MemberRef::Synthetic(synthetic_id)] });
                    remaining
                } else {
                    sentence.or_sets
                };
                self.sentences[idx] = Some(AndSentence { or_sets });
            }
        }
    }

    /// Synthetic sets referenced exactly once and carrying no rule ids of
    /// their own are inlined back into their sole referrer.
    fn inline_single_referrer_sets(&mut self) {
        loop {
            let mut referrer_count: HashMap<SetId, u32> = HashMap::new();
            for sentence in self.sentences.iter().flatten() {
                for or_set in &sentence.or_sets {
                    for member in &or_set.members {
                        if let MemberRef::Synthetic(id) = member {
                            *referrer_count.entry(*id).or_insert(0) += 1;
                        }
                    }
                }
            }
            let inlinable: Vec<SetId> = referrer_count
                .into_iter()
                .filter(|(id, count)| {
                    *count == 1 && !self.root_rule_ids.contains_key(id) && self.sentences[*id as usize].is_some()
                })
                .map(|(id, _)| id)
                .collect();
            if inlinable.is_empty() {
                break;
            }
            let mut changed = false;
            for target in inlinable {
                let Some(inner) = self.sentences[target as usize].clone() else { continue };
                // Only inline degenerate single-OR-set synthetics — inlining
                // a multi-OR-set AND back into an OR-set member position
                // would change its semantics (the members that stood in for
                // it were a disjunction, not a conjunction).
                if inner.or_sets.len() != 1 {
                    continue;
                }
                for idx in 0..self.sentences.len() {
                    let Some(sentence) = self.sentences[idx].take() else { continue };
                    let or_sets = sentence
                        .or_sets
                        .into_iter()
                        .map(|or_set| {
                            if or_set.members.contains(&MemberRef::Synthetic(target)) {
                                changed = true;
                                let mut members: Vec<MemberRef> = or_set
                                    .members
                                    .into_iter()
                                    .filter(|m| *m != MemberRef::Synthetic(target))
                                    .collect();
                                members.extend(inner.or_sets[0].members.iter().copied());
                                OrSet { members }
                            } else {
                                or_set
                            }
                        })
                        .collect();
                    self.sentences[idx] = Some(AndSentence { or_sets });
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Drops synthetic sets that ended up with no referrers and no rule ids
    /// attached — dead weight left behind by factoring/inlining.
    fn garbage_collect(&mut self) {
        let mut referenced: std::collections::HashSet<SetId> = std::collections::HashSet::new();
        for sentence in self.sentences.iter().flatten() {
            for or_set in &sentence.or_sets {
                for member in &or_set.members {
                    if let MemberRef::Synthetic(id) = member {
                        referenced.insert(*id);
                    }
                }
            }
        }
        for (id, slot) in self.sentences.iter_mut().enumerate() {
            let id = id as SetId;
            if slot.is_some() && !referenced.contains(&id) && !self.root_rule_ids.contains_key(&id) {
                *slot = None;
            }
        }
    }

    fn assign_and_build(self) -> super::runtime::CategoryEngine {
        let mut recs: Vec<Option<CatSetRec>> = self
            .sentences
            .iter()
            .map(|s| {
                s.as_ref().map(|s| CatSetRec {
                    num_or_sets: s.or_sets.len() as u32,
                    rule_ids: Vec::new(),
                    output: Vec::new(),
                })
            })
            .collect();
        for (set_id, rule_ids) in self.root_rule_ids {
            if let Some(Some(rec)) = recs.get_mut(set_id as usize) {
                rec.rule_ids = rule_ids;
            }
        }

        let mut cat_masks: HashMap<CategoryId, Vec<CatSetMask>> = HashMap::new();
        let mut default_list: Vec<CategoryId> = Vec::new();
        let mut seen_default: std::collections::HashSet<CategoryId> = std::collections::HashSet::new();

        for (set_id, sentence) in self.sentences.iter().enumerate() {
            let Some(sentence) = sentence else { continue };
            let set_id = set_id as SetId;
            for (bit_idx, or_set) in sentence.or_sets.iter().enumerate() {
                let bit = 1u64 << bit_idx;
                for member in &or_set.members {
                    match member {
                        MemberRef::Cat(c) => {
                            cat_masks.entry(*c).or_default().push(CatSetMask { set_id, bit });
                            if *c > self.max_category {
                                let positive = c - self.max_category;
                                if seen_default.insert(positive) {
                                    default_list.push(positive);
                                }
                            }
                        }
                        MemberRef::Synthetic(inner) => {
                            if let Some(Some(rec)) = recs.get_mut(*inner as usize) {
                                rec.output.push(CatSetMask { set_id, bit });
                            }
                        }
                    }
                }
            }
        }

        super::runtime::CategoryEngine::from_builder(
            self.max_category,
            recs.into_iter()
                .map(|r| {
                    r.map(|r| super::runtime::CompiledSet {
                        num_or_sets: r.num_or_sets,
                        rule_ids: r.rule_ids,
                        output: r.output,
                    })
                })
                .collect(),
            cat_masks,
            default_list,
        )
    }
}

fn order_pair(a: MemberRef, b: MemberRef) -> (MemberRef, MemberRef) {
    if member_key(a) <= member_key(b) {
        (a, b)
    } else {
        (b, a)
    }
}

fn member_key(m: MemberRef) -> (u8, i64) {
    match m {
        MemberRef::Cat(c) => (0, c),
        MemberRef::Synthetic(id) => (1, id as i64),
    }
}

fn hash_or_set(or_set: &OrSet) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut members: Vec<MemberRef> = or_set.members.clone();
    members.sort_by_key(|m| member_key(*m));
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    members.hash(&mut hasher);
    hasher.finish()
}

fn canonical_hash(sentence: &AndSentence) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut or_hashes: Vec<u64> = sentence.or_sets.iter().map(hash_or_set).collect();
    or_hashes.sort_unstable();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    or_hashes.hash(&mut hasher);
    hasher.finish()
}
