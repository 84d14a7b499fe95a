//! A small free-list pool for the per-event scratch allocations
//! (`ValuesRow` buffers). Hand-rolled rather than pulled from a generic
//! object-pool crate — this workspace's hot paths elsewhere (window
//! buffers) favor a bespoke pool sized to the one shape they actually hold.

use crate::frame::{SlotValue, ValuesRow};
use parking_lot::Mutex;

/// Pool of `ValuesRow` buffers pre-sized to `num_slots`. `acquire` reuses a
/// previously `release`d row (clearing it to `Empty`) when one is
/// available, otherwise allocates fresh.
pub struct ValuesPool {
    num_slots: u32,
    free: Mutex<Vec<Vec<SlotValue>>>,
}

impl ValuesPool {
    pub fn new(num_slots: u32) -> Self {
        Self {
            num_slots,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn acquire(&self) -> ValuesRow {
        let mut free = self.free.lock();
        if let Some(mut buf) = free.pop() {
            buf.iter_mut().for_each(|s| *s = SlotValue::Empty);
            buf.resize_with(self.num_slots as usize, || SlotValue::Empty);
            ValuesRow(buf)
        } else {
            ValuesRow::empty(self.num_slots)
        }
    }

    pub fn release(&self, row: ValuesRow) {
        let mut free = self.free.lock();
        // Bound the pool so a burst of concurrent matches can't leave it
        // holding memory indefinitely.
        if free.len() < 256 {
            free.push(row.0);
        }
    }

    pub fn len_free(&self) -> usize {
        self.free.lock().len()
    }
}
