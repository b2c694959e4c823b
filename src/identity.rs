//! Collection identities - compact, collision-free handles
//!
//! Every collection gets an identity at construction: a sequence number
//! rendered in lower-case base-36. The rendered form doubles as the
//! table-name suffix when a collection is table-backed, so identities must be
//! unique both within the running store and among pre-existing backend tables
//! sharing the configured prefix.

use crate::{Error, Result};
use parking_lot::Mutex;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque, totally-ordered identity of a collection.
///
/// Never reused within a process lifetime. The raw integer is deliberately
/// not exposed; callers see only the base-36 rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionIdentity(u64);

impl CollectionIdentity {
    pub(crate) fn from_raw(raw: u64) -> Self {
        CollectionIdentity(raw)
    }

    /// Parse a base-36 rendering back into an identity
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::Format("empty collection identity".to_string()));
        }
        u64::from_str_radix(s, 36)
            .map(CollectionIdentity::from_raw)
            .map_err(|_| Error::Format(format!("invalid collection identity: {}", s)))
    }
}

impl std::fmt::Display for CollectionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut digits = [0u8; 13]; // u64::MAX is 13 base-36 digits
        let mut n = self.0;
        let mut i = digits.len();
        loop {
            i -= 1;
            digits[i] = ALPHABET[(n % 36) as usize];
            n /= 36;
            if n == 0 {
                break;
            }
        }
        // Digits are ASCII by construction
        f.write_str(std::str::from_utf8(&digits[i..]).expect("base-36 digits are ASCII"))
    }
}

/// Monotonic identity allocator.
///
/// `next()` hands out `last + 1`. When a relational backend is active the
/// caller supplies a probe that checks for an existing table with the
/// candidate suffix; collisions are skipped forward, which is what lets a
/// store resume against tables left by a previous process.
#[derive(Debug, Default)]
pub struct IdentityAllocator {
    last: Mutex<u64>,
}

impl IdentityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next identity with no backend probing
    pub fn next(&self) -> CollectionIdentity {
        let mut last = self.last.lock();
        *last += 1;
        CollectionIdentity(*last)
    }

    /// Advance past an identity observed in the backend so it is never
    /// re-issued to a fresh collection. Lower identities are a no-op.
    pub(crate) fn resume_after(&self, identity: CollectionIdentity) {
        let mut last = self.last.lock();
        if identity.0 > *last {
            *last = identity.0;
        }
    }

    /// Allocate the next identity, skipping past any candidate for which
    /// `occupied` reports an existing backend table.
    pub(crate) fn next_probed(
        &self,
        mut occupied: impl FnMut(CollectionIdentity) -> Result<bool>,
    ) -> Result<CollectionIdentity> {
        let mut last = self.last.lock();
        loop {
            *last += 1;
            let candidate = CollectionIdentity(*last);
            if !occupied(candidate)? {
                return Ok(candidate);
            }
        }
    }
}
