//! Content hashing for the interned operand/condition graph.
//!
//! Structural equality of operands and conditions is decided by a SHA-256
//! digest over a canonical byte encoding (variant tag + children, recursively).
//! Two nodes with equal [`ContentHash`] are structurally equal — this is the
//! invariant the CSE cache and the interner both rely on.

use sha2::{Digest, Sha256};
use std::hash::{Hash, Hasher};

#[derive(Clone, Copy, Eq)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for ContentHash {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Hash for ContentHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.0);
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "…")
    }
}

/// Incrementally builds a [`ContentHash`] the way a node's `Debug`/`Hash`
/// impl would, but recorded into a canonical, platform-stable byte stream
/// rather than through `std::hash::Hash` (whose output is not guaranteed
/// stable across Rust versions).
pub struct Hasher256(Sha256);

impl Default for Hasher256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher256 {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn tag(&mut self, tag: u8) -> &mut Self {
        self.0.update([tag]);
        self
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.0.update((data.len() as u64).to_le_bytes());
        self.0.update(data);
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.bytes(s.as_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.update(v.to_le_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.0.update(v.to_le_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.0.update(v.to_bits().to_le_bytes());
        self
    }

    pub fn child(&mut self, h: &ContentHash) -> &mut Self {
        self.0.update(h.as_bytes());
        self
    }

    pub fn finish(self) -> ContentHash {
        let digest = self.0.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        ContentHash(out)
    }
}
