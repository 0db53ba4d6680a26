//! Identifier generation.
//!
//! Ids are lower-cased ULIDs.  They sort lexicographically in creation order, which lets callers recover creation
//! order without an index.  Lower-casing keeps that property since every digit sorts before every letter in either
//! case.
use parking_lot::Mutex;
use ulid::{Generator, Ulid};

lazy_static::lazy_static! {
    /// Monotonic within a millisecond, so two ids minted back to back still compare in order.
    static ref GENERATOR: Mutex<Generator> = Mutex::new(Generator::new());
}

/// Mint a new id.
pub fn new_id() -> String {
    let id = GENERATOR
        .lock()
        .generate()
        // Only reachable after 2^80 ids in one millisecond; a random id is still unique.
        .unwrap_or_else(|_| Ulid::new());
    id.to_string().to_lowercase()
}
