//! The binary-vs-three-valued logic open question from spec §9.

/// Which missing-field semantics the compiled engine uses.
///
/// `Binary` (the default, and this workspace's primary mode) treats a
/// missing field as `null`: `field == null` matches it, `field != 0`
/// matches it, and the category engine's negation-over-missing-fields is
/// implemented via the default-category list (spec §4.E).
///
/// `ThreeValued` instead has comparisons involving a missing field
/// evaluate to `Undefined`, which propagates through every operator
/// including `Not`, and is treated exactly like `false` for category
/// emission (spec §9) — this removes the need for the default-category
/// list entirely, at the cost of `Undefined` needing to be threaded
/// through every operator implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogicMode {
    #[default]
    Binary,
    ThreeValued,
}
