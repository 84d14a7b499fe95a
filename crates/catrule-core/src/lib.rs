//! Operand/condition model, attribute dictionary, and event mapper — the
//! immutable, content-addressed data layer shared by the expression
//! compiler and the category engine.

pub mod builtins;
pub mod condition;
pub mod dictionary;
pub mod frame;
pub mod hash;
pub mod intern;
pub mod logic;
pub mod mapper;
pub mod operand;
pub mod pool;

pub use condition::{category, make_condition, CategoryId, Condition, ConditionKind, CompareOp};
pub use dictionary::{
    address_key, Address, AddressKey, AddressSeg, ArrayIndex, AttributeAddress, AttributeDictionary, Slot,
};
pub use frame::{ArrayLookup, EventMap, Frames, SlotValue, ValuesRow, DEFAULT_FRAME_CAPACITY};
pub use hash::ContentHash;
pub use intern::Interner;
pub use logic::LogicMode;
pub use operand::{evaluate, make_operand, Builtin, Operand, OperandKind, ValueKind};
pub use pool::ValuesPool;
