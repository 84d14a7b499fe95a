//! Fast-path specializations (spec §4.D step 5): compare-equal-to-constant
//! folds into a single shared lookup per varying expression; `containsAny`
//! feeds an Aho-Corasick automaton built once per varying expression.

use aho_corasick::AhoCorasick;
use catrule_core::{CategoryId, ContentHash, Operand};
use std::collections::HashMap;

pub(crate) struct EqualToConstantGroup {
    pub varying: Operand,
    by_hash: HashMap<ContentHash, usize>,
    pub constants: Vec<(Operand, Vec<CategoryId>)>,
}

impl EqualToConstantGroup {
    pub fn new(varying: Operand) -> Self {
        Self {
            varying,
            by_hash: HashMap::new(),
            constants: Vec::new(),
        }
    }

    /// Registers `category` as firing when the varying operand equals
    /// `constant`, deduping on `constant`'s exact hash so repeated literals
    /// (e.g. two rules both comparing against `"US"`) share one entry.
    pub fn add(&mut self, constant: &Operand, category: CategoryId) {
        let hash = constant.hash();
        if let Some(&idx) = self.by_hash.get(&hash) {
            self.constants[idx].1.push(category);
        } else {
            let idx = self.constants.len();
            self.by_hash.insert(hash, idx);
            self.constants.push((constant.clone(), vec![category]));
        }
    }

    pub fn into_compiled(self) -> (HashMap<ContentHash, usize>, Vec<(Operand, Vec<CategoryId>)>) {
        (self.by_hash, self.constants)
    }
}

pub(crate) struct ContainsAnyGroup {
    pub varying: Operand,
    /// Needle text → category ids whose rule asked for that needle.
    pub needles: Vec<(String, CategoryId)>,
}

impl ContainsAnyGroup {
    pub fn new(varying: Operand) -> Self {
        Self {
            varying,
            needles: Vec::new(),
        }
    }

    /// Builds the automaton over every needle registered so far. Called at
    /// `finalize()` time since rules may add needles for the same varying
    /// expression right up until the builder consumes the repository.
    pub fn build(&self) -> Option<AhoCorasick> {
        if self.needles.is_empty() {
            return None;
        }
        AhoCorasick::new(self.needles.iter().map(|(s, _)| s.as_str())).ok()
    }
}
