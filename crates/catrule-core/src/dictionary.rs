//! Attribute dictionary: assigns stable integer slots to dotted attribute
//! paths, one local slot space per nesting level (object / array-element).

use parking_lot::Mutex;
use std::collections::HashMap;

pub type Slot = u32;

/// The array-index component of one address segment.
///
/// `-1` ("any") and `-2` ("all") are the two synthetic markers from the
/// spec; `Specific` carries a concrete, non-negative element index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayIndex {
    Specific(u32),
    Any,
    All,
}

impl ArrayIndex {
    pub fn as_i32(self) -> i32 {
        match self {
            ArrayIndex::Specific(n) => n as i32,
            ArrayIndex::Any => -1,
            ArrayIndex::All => -2,
        }
    }
}

/// One `(ati, ari?)` pair of the spec's address encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSeg {
    pub slot: Slot,
    pub array: Option<ArrayIndex>,
}

pub type Address = Vec<AddressSeg>;

/// The structural part of an address used to key the attribute→evaluator
/// index — the spec's "address-match-key": an address with all array
/// indices erased, since the evaluator must fire regardless of which
/// element of an array produced the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressKey(pub Vec<Slot>);

pub fn address_key(address: &[AddressSeg]) -> AddressKey {
    AddressKey(address.iter().map(|s| s.slot).collect())
}

/// A resolved attribute reference as produced by the expression compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeAddress {
    /// Address relative to the scope the reference was compiled in.
    pub address: Address,
    /// Original dotted path text, kept for diagnostics.
    pub path: String,
    /// Nesting level of the enclosing quantifier scope, if any — frames are
    /// indexed by this when evaluating `forAll`/`forSome` predicates.
    pub parent_param_idx: Option<u32>,
    /// Fully resolved address from the event root (equal to `address` for
    /// top-level, non-quantified references).
    pub full_address: Address,
}

struct DictNode {
    names: HashMap<String, Slot>,
    slot_names: Vec<String>,
    next_slot: Slot,
    child_node: HashMap<Slot, usize>,
}

impl DictNode {
    fn new() -> Self {
        Self {
            names: HashMap::new(),
            slot_names: Vec::new(),
            next_slot: 0,
            child_node: HashMap::new(),
        }
    }

    fn slot_for(&mut self, name: &str) -> Slot {
        if let Some(&slot) = self.names.get(name) {
            return slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.names.insert(name.to_string(), slot);
        self.slot_names.push(name.to_string());
        slot
    }
}

struct DictState {
    nodes: Vec<DictNode>,
}

impl DictState {
    fn new() -> Self {
        Self {
            nodes: vec![DictNode::new()],
        }
    }

    fn child_node_for(&mut self, node_idx: usize, slot: Slot) -> usize {
        if let Some(&idx) = self.nodes[node_idx].child_node.get(&slot) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(DictNode::new());
        self.nodes[node_idx].child_node.insert(slot, idx);
        idx
    }
}

/// One raw path segment before slot resolution: a name plus an optional
/// array marker (`[]` or `[n]`).
#[derive(Debug, Clone)]
struct RawSeg {
    name: String,
    array: Option<ArrayIndex>,
}

fn parse_path(path: &str) -> Vec<RawSeg> {
    let mut segs = Vec::new();
    for part in path.split('.') {
        if let Some(bracket) = part.find('[') {
            let name = part[..bracket].to_string();
            let rest = &part[bracket + 1..];
            let close = rest.find(']').unwrap_or(rest.len());
            let idx_str = &rest[..close];
            let array = if idx_str.is_empty() {
                Some(ArrayIndex::Any)
            } else {
                idx_str.parse::<u32>().ok().map(ArrayIndex::Specific)
            };
            segs.push(RawSeg { name, array });
        } else {
            segs.push(RawSeg {
                name: part.to_string(),
                array: None,
            });
        }
    }
    segs
}

/// Assigns stable integer addresses to attribute paths. `path_to_address`
/// is pure from the caller's perspective: repeated calls with the same path
/// return an address with identical slot numbering, regardless of how many
/// other paths have been registered in between.
pub struct AttributeDictionary {
    state: Mutex<DictState>,
}

impl Default for AttributeDictionary {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeDictionary {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DictState::new()),
        }
    }

    pub const ROOT: usize = 0;

    /// Registers `path`, returning its resolved [`AttributeAddress`].
    pub fn path_to_address(&self, path: &str) -> AttributeAddress {
        let address = self.path_to_address_from_node(Self::ROOT, path);
        AttributeAddress {
            address: address.clone(),
            path: path.to_string(),
            parent_param_idx: None,
            full_address: address,
        }
    }

    /// Resolves `path` relative to the dictionary node reached by `base` —
    /// used to register attribute references inside a `forAll`/`forSome`
    /// scope, whose paths are rooted at the array's element dictionary
    /// rather than the event root.
    pub fn path_to_address_in_scope(&self, base: &[AddressSeg], path: &str) -> Address {
        let base_node = self.node_for_address(base);
        self.path_to_address_from_node(base_node, path)
    }

    fn node_for_address(&self, address: &[AddressSeg]) -> usize {
        let state = self.state.lock();
        let mut node_idx = Self::ROOT;
        for seg in address {
            node_idx = *state.nodes[node_idx]
                .child_node
                .get(&seg.slot)
                .expect("address must have been produced by this dictionary");
        }
        node_idx
    }

    fn path_to_address_from_node(&self, base_node: usize, path: &str) -> Address {
        let raw = parse_path(path);
        let mut state = self.state.lock();
        let mut node_idx = base_node;
        let mut address = Address::with_capacity(raw.len());
        for seg in &raw {
            let slot = state.nodes[node_idx].slot_for(&seg.name);
            address.push(AddressSeg {
                slot,
                array: seg.array,
            });
            node_idx = state.child_node_for(node_idx, slot);
        }
        address
    }

    /// Number of scalar slots registered at the dictionary node reached by
    /// `address` (root if empty) — the size an `EventMap`/nested values row
    /// at that level must be allocated to.
    pub fn num_slots_at(&self, address: &[AddressSeg]) -> u32 {
        let state = self.state.lock();
        let mut node_idx = Self::ROOT;
        for seg in address {
            node_idx = *state.nodes[node_idx]
                .child_node
                .get(&seg.slot)
                .expect("address must have been produced by this dictionary");
        }
        state.nodes[node_idx].next_slot
    }

    pub fn num_root_slots(&self) -> u32 {
        self.state.lock().nodes[Self::ROOT].next_slot
    }

    pub(crate) fn num_slots_at_node(&self, node_idx: usize) -> u32 {
        self.state.lock().nodes[node_idx].next_slot
    }

    /// Whether `slot` at dictionary node `node_idx` has its own nested
    /// dictionary (i.e. it names an object or an array of objects) as
    /// opposed to a scalar leaf.
    pub(crate) fn child_node(&self, node_idx: usize, slot: Slot) -> Option<usize> {
        self.state.lock().nodes[node_idx].child_node.get(&slot).copied()
    }

    /// Looks up an already-registered name at `node_idx` without creating
    /// it. Used by the mapper to find the conventional `$self` slot that
    /// the compiler reserves when a `forAll`/`forSome` predicate refers to
    /// a scalar array element directly (rather than one of its fields).
    pub(crate) fn named_slot(&self, node_idx: usize, name: &str) -> Option<Slot> {
        self.state.lock().nodes[node_idx].names.get(name).copied()
    }

    pub(crate) fn registered(&self, node_idx: usize) -> Vec<(String, Slot)> {
        let state = self.state.lock();
        let node = &state.nodes[node_idx];
        node.slot_names
            .iter()
            .enumerate()
            .map(|(slot, name)| (name.clone(), slot as Slot))
            .collect()
    }

    /// Reverse navigation for diagnostics: reconstructs the dotted path for
    /// an address.
    pub fn address_to_full_path(&self, address: &[AddressSeg]) -> String {
        let state = self.state.lock();
        let mut node_idx = Self::ROOT;
        let mut parts = Vec::with_capacity(address.len());
        for seg in address {
            let node = &state.nodes[node_idx];
            let name = node
                .slot_names
                .get(seg.slot as usize)
                .cloned()
                .unwrap_or_else(|| format!("<slot {}>", seg.slot));
            let suffix = match seg.array {
                None => String::new(),
                Some(ArrayIndex::Any) => "[]".to_string(),
                Some(ArrayIndex::All) => "[*]".to_string(),
                Some(ArrayIndex::Specific(n)) => format!("[{n}]"),
            };
            parts.push(format!("{name}{suffix}"));
            if let Some(&next) = node.child_node.get(&seg.slot) {
                node_idx = next;
            }
        }
        parts.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_returns_same_address() {
        let dict = AttributeDictionary::new();
        let a1 = dict.path_to_address("user.age");
        let a2 = dict.path_to_address("user.age");
        assert_eq!(a1.address, a2.address);
    }

    #[test]
    fn array_and_container_share_slot() {
        let dict = AttributeDictionary::new();
        let a = dict.path_to_address("items");
        let b = dict.path_to_address("items[]");
        assert_eq!(a.address[0].slot, b.address[0].slot);
    }

    #[test]
    fn reverse_path_roundtrip() {
        let dict = AttributeDictionary::new();
        let addr = dict.path_to_address("user.age");
        assert_eq!(dict.address_to_full_path(&addr.address), "user.age");
    }

    #[test]
    fn nested_array_element_gets_own_slot_space() {
        let dict = AttributeDictionary::new();
        let value_addr = dict.path_to_address("items[].value");
        let other_addr = dict.path_to_address("other");
        // "value" (slot 0 inside items' nested dict) and "other" (slot at
        // root) do not collide even though both may be numbered 0/1.
        assert_ne!(value_addr.address.len(), other_addr.address.len());
    }
}
