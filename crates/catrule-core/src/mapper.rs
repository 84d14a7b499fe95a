//! Attribute mapper: projects a raw decoded event onto the dictionary's
//! address space, producing an [`EventMap`] and reporting every address it
//! observed along the way.

use crate::dictionary::{AddressSeg, ArrayIndex, AttributeDictionary};
use crate::frame::{EventMap, SlotValue, ValuesRow};
use crate::operand::{const_bool, const_float, const_int, const_null, const_string, Operand};
use serde_json::Value as Json;

/// Converts a scalar JSON leaf to its `Operand` representation. Returns
/// `None` for containers (objects/arrays), which the mapper handles via
/// recursion rather than as scalar values.
fn json_scalar_to_operand(v: &Json) -> Option<Operand> {
    match v {
        Json::Null => Some(const_null()),
        Json::Bool(b) => Some(const_bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(const_int(i))
            } else {
                n.as_f64().map(const_float)
            }
        }
        Json::String(s) => Some(const_string(s.clone())),
        Json::Array(_) | Json::Object(_) => None,
    }
}

/// Maps `event` against `dict`, invoking `report` for every address
/// observed (every scalar leaf, and every array element descended into).
///
/// Allocates its own root `values` row. Callers matching events in a hot
/// loop should prefer [`map_event_into`] with a row drawn from a
/// [`crate::pool::ValuesPool`] (spec §4.C "Pooling") to avoid a fresh
/// allocation per event.
pub fn map_event<'a>(
    dict: &AttributeDictionary,
    event: &'a Json,
    report: impl FnMut(&[AddressSeg]),
) -> EventMap<'a> {
    let num_root = dict.num_root_slots();
    let values = ValuesRow::empty(num_root);
    map_event_into(dict, event, values, report)
}

/// Same as [`map_event`], but projects into a caller-supplied `values` row
/// (typically acquired from a [`crate::pool::ValuesPool`]) instead of
/// allocating a fresh one. `values` must already be sized to
/// `dict.num_root_slots()` — exactly what `ValuesPool::acquire` returns.
pub fn map_event_into<'a>(
    dict: &AttributeDictionary,
    event: &'a Json,
    mut values: ValuesRow,
    mut report: impl FnMut(&[AddressSeg]),
) -> EventMap<'a> {
    let mut prefix = Vec::new();
    map_object(dict, AttributeDictionary::ROOT, event, &mut values, &mut prefix, &mut report);
    EventMap {
        values,
        original_event: event,
    }
}

fn map_object(
    dict: &AttributeDictionary,
    node_idx: usize,
    obj: &Json,
    values: &mut ValuesRow,
    prefix: &mut Vec<AddressSeg>,
    report: &mut impl FnMut(&[AddressSeg]),
) {
    let Some(map) = obj.as_object() else {
        return;
    };
    for (name, slot) in dict.registered(node_idx) {
        let Some(child) = map.get(&name) else {
            continue;
        };
        if let Some(child_node_idx) = dict.child_node(node_idx, slot) {
            if let Some(arr) = child.as_array() {
                let mut rows = Vec::with_capacity(arr.len());
                for (i, elem) in arr.iter().enumerate() {
                    let nested_slots = dict.num_slots_at_node(child_node_idx).max(1);
                    let mut row = ValuesRow::empty(nested_slots);
                    prefix.push(AddressSeg {
                        slot,
                        array: Some(ArrayIndex::Specific(i as u32)),
                    });
                    if let Some(self_slot) = dict.named_slot(child_node_idx, "$self") {
                        if let Some(scalar) = json_scalar_to_operand(elem) {
                            row.0[self_slot as usize] = SlotValue::Scalar(scalar);
                        }
                    }
                    map_object(dict, child_node_idx, elem, &mut row, prefix, report);
                    report(prefix);
                    prefix.pop();
                    rows.push(row);
                }
                values.0[slot as usize] = SlotValue::Array(rows);
            } else if child.is_object() {
                let nested_slots = dict.num_slots_at_node(child_node_idx);
                let mut row = ValuesRow::empty(nested_slots);
                prefix.push(AddressSeg { slot, array: None });
                map_object(dict, child_node_idx, child, &mut row, prefix, report);
                prefix.pop();
                values.0[slot as usize] = SlotValue::Nested(row);
            }
        } else if let Some(op) = json_scalar_to_operand(child) {
            values.0[slot as usize] = SlotValue::Scalar(op);
            prefix.push(AddressSeg { slot, array: None });
            report(prefix);
            prefix.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frames;
    use serde_json::json;

    #[test]
    fn maps_scalar_and_nested_array() {
        let dict = AttributeDictionary::new();
        let age_addr = dict.path_to_address("user.age");
        let item_value_addr = dict.path_to_address("items[].value");

        let event = json!({
            "user": {"age": 21},
            "items": [{"value": 150}, {"value": 50}],
        });

        let mut observed = Vec::new();
        let map = map_event(&dict, &event, |addr| observed.push(addr.to_vec()));

        let frames = Frames::new(&map.values);
        let age = crate::operand::evaluate(
            &std::sync::Arc::new(crate::operand::make_operand(
                crate::operand::OperandKind::Address(age_addr, None),
            )),
            &frames,
        );
        assert!(matches!(age.kind, crate::operand::OperandKind::Int(21)));
        assert!(!observed.is_empty());
        let _ = item_value_addr;
    }

    #[test]
    fn missing_array_vs_empty_array_distinguishable() {
        let dict = AttributeDictionary::new();
        let _ = dict.path_to_address("items[].value");

        let missing = json!({});
        let empty = json!({"items": []});

        let map_missing = map_event(&dict, &missing, |_| {});
        let map_empty = map_event(&dict, &empty, |_| {});

        assert_eq!(map_missing.get_num_elements_at("items"), None);
        assert_eq!(map_empty.get_num_elements_at("items"), Some(0));
    }
}
