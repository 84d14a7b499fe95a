//! Mapped event storage (`EventMap`/`ValuesRow`) and the quantifier frame
//! stack used to evaluate `forAll`/`forSome` predicates without closure
//! allocation.

use crate::dictionary::{ArrayIndex, AttributeAddress};
use crate::operand::{const_null, Operand};

/// One slot's worth of mapped event data.
#[derive(Debug, Clone)]
pub enum SlotValue {
    /// The attribute was absent from the event.
    Empty,
    Scalar(Operand),
    /// A registered object-valued attribute (not inside an array).
    Nested(ValuesRow),
    /// A registered array-of-objects attribute. `Vec::is_empty()` means the
    /// array was present but had zero elements — distinct from `Empty`.
    Array(Vec<ValuesRow>),
}

/// Flat, dictionary-indexed row of values for one object level (the event
/// root, or one element of a registered array).
#[derive(Debug, Clone)]
pub struct ValuesRow(pub Vec<SlotValue>);

impl ValuesRow {
    pub fn empty(num_slots: u32) -> Self {
        Self(
            std::iter::repeat_with(|| SlotValue::Empty)
                .take(num_slots as usize)
                .collect(),
        )
    }
}

/// One event's mapped attribute values plus a reference to the raw decoded
/// event, retained so empty-vs-missing arrays can be told apart by callers
/// that only have a path string (diagnostics, `hasValue`-style builtins).
pub struct EventMap<'a> {
    pub values: ValuesRow,
    pub original_event: &'a serde_json::Value,
}

impl<'a> EventMap<'a> {
    pub fn get_num_elements_at(&self, path: &str) -> Option<usize> {
        let mut cur = self.original_event;
        for seg in path.split('.') {
            let name = seg.split('[').next().unwrap_or(seg);
            cur = cur.as_object()?.get(name)?;
        }
        cur.as_array().map(|a| a.len())
    }
}

pub const DEFAULT_FRAME_CAPACITY: usize = 20;

/// Fixed-depth stack of references into the nested `values` tree, indexed
/// by nesting level. Frame 0 is always the event root.
pub struct Frames<'a> {
    slots: Vec<Option<&'a ValuesRow>>,
}

impl<'a> Frames<'a> {
    pub fn new(root: &'a ValuesRow) -> Self {
        Self::with_capacity(root, DEFAULT_FRAME_CAPACITY)
    }

    pub fn with_capacity(root: &'a ValuesRow, capacity: usize) -> Self {
        let mut slots = vec![None; capacity.max(1)];
        slots[0] = Some(root);
        Self { slots }
    }

    pub fn get(&self, level: u32) -> Option<&'a ValuesRow> {
        self.slots.get(level as usize).copied().flatten()
    }

    pub fn set(&mut self, level: u32, row: &'a ValuesRow) {
        let idx = level as usize;
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, None);
        }
        self.slots[idx] = Some(row);
    }

    /// Cheap copy of the frame pointers (not the underlying rows) — used by
    /// quantifier evaluation so each element iteration can set its own
    /// frame without disturbing the caller's view.
    pub fn clone_shallow(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

/// Resolves a scalar attribute address against the current frame stack.
pub fn read_address(frames: &Frames<'_>, addr: &AttributeAddress) -> Operand {
    let start_level = addr.parent_param_idx.unwrap_or(0);
    let Some(mut row) = frames.get(start_level) else {
        return const_null();
    };
    let segs = &addr.address;
    for (i, seg) in segs.iter().enumerate() {
        let is_last = i + 1 == segs.len();
        match row.0.get(seg.slot as usize) {
            None | Some(SlotValue::Empty) => return const_null(),
            Some(SlotValue::Scalar(op)) => {
                return if is_last {
                    op.clone()
                } else {
                    crate::operand::error("address descends past a scalar")
                };
            }
            Some(SlotValue::Nested(nested)) => {
                if is_last {
                    return const_null();
                }
                row = nested;
            }
            Some(SlotValue::Array(rows)) => match seg.array {
                Some(ArrayIndex::Specific(n)) => {
                    let Some(elem) = rows.get(n as usize) else {
                        return const_null();
                    };
                    if is_last {
                        return const_null();
                    }
                    row = elem;
                }
                _ => return const_null(),
            },
        }
    }
    const_null()
}

/// Outcome of looking up a registered array attribute for quantifier
/// iteration — distinguishes "field absent" from "field present, empty".
pub enum ArrayLookup<'a> {
    Missing,
    Present(&'a [ValuesRow]),
}

pub fn read_array<'a>(frames: &Frames<'a>, addr: &AttributeAddress) -> ArrayLookup<'a> {
    let start_level = addr.parent_param_idx.unwrap_or(0);
    let Some(mut row) = frames.get(start_level) else {
        return ArrayLookup::Missing;
    };
    let segs = &addr.address;
    for (i, seg) in segs.iter().enumerate() {
        let is_last = i + 1 == segs.len();
        match row.0.get(seg.slot as usize) {
            None | Some(SlotValue::Empty) => return ArrayLookup::Missing,
            Some(SlotValue::Array(rows)) if is_last => return ArrayLookup::Present(rows),
            Some(SlotValue::Nested(nested)) if !is_last => row = nested,
            _ => return ArrayLookup::Missing,
        }
    }
    ArrayLookup::Missing
}
