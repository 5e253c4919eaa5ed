/*!
 * Hash Primitive
 *
 * A pure function `hash(bytes) -> digest` plus a streaming accumulator that
 * can fold a sequence of digests (or raw bytes) into one final digest. Any
 * fixed hash function satisfying the contract below will do, so this module
 * is the only place that names a concrete algorithm (SHA-256, via the `sha2`
 * crate).
 */

use sha2::{Digest, Sha256};

/// Hash a byte slice, returning its hex-encoded digest.
pub fn hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// An incremental hash accumulator: call [`Accumulator::append`] any number
/// of times, then [`Accumulator::end`] once to get the final digest. Used
/// both for hashing a chunk's bytes in one shot and for folding a sequence
/// of per-chunk digests into the whole-file digest.
pub struct Accumulator {
    hasher: Sha256,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Feed more bytes into the accumulator. Order matters: two accumulators
    /// fed the same bytes in a different order will not (in general)
    /// produce the same digest.
    pub fn append(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Feed a digest (its hex representation) into the accumulator. Used by
    /// the Hash Pipeline's fold stage to combine per-chunk digests.
    pub fn append_digest(&mut self, digest: &str) {
        self.hasher.update(digest.as_bytes());
    }

    /// Finalize and return the hex-encoded digest. Consumes the accumulator
    /// since a hash function's finalize step is one-shot.
    pub fn end(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}
