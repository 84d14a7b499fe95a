//! The scope stack used while lowering `forAll`/`forSome` predicates (spec
//! §4.D "Scope stack and iteration").

use catrule_core::Address;

/// One nesting level. The root scope (`nesting_level == 0`) always sits at
/// the bottom of the stack and is never popped.
pub struct Scope {
    pub nesting_level: u32,
    /// The identifier a `forAll`/`forSome` predicate uses to name the
    /// current array element (`None` for the root scope).
    pub element_binding: Option<String>,
    /// Address of the dictionary node this scope's fields resolve under —
    /// empty for the root scope.
    pub base_address: Address,
}

pub struct ScopeStack(Vec<Scope>);

impl ScopeStack {
    pub fn new() -> Self {
        Self(vec![Scope {
            nesting_level: 0,
            element_binding: None,
            base_address: Vec::new(),
        }])
    }

    pub fn top(&self) -> &Scope {
        self.0.last().expect("scope stack is never empty")
    }

    pub fn push(&mut self, element_binding: String, base_address: Address) -> u32 {
        let nesting_level = self.top().nesting_level + 1;
        self.0.push(Scope {
            nesting_level,
            element_binding: Some(element_binding),
            base_address,
        });
        nesting_level
    }

    pub fn pop(&mut self) {
        assert!(self.0.len() > 1, "cannot pop the root scope");
        self.0.pop();
    }

    /// Finds the innermost scope whose binding matches `name`, searching
    /// from the top of the stack down — a nested quantifier predicate can
    /// still refer to an enclosing quantifier's element.
    pub fn find_binding(&self, name: &str) -> Option<&Scope> {
        self.0
            .iter()
            .rev()
            .find(|s| s.element_binding.as_deref() == Some(name))
    }

    pub fn root(&self) -> &Scope {
        &self.0[0]
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}
