//! `ParameterHash`: spec §3/§4.1 — lowercase hex SHA-256 over a canonical
//! serialization of a `ParameterSet`, deterministic across processes and
//! platforms.

use super::set::ParameterSet;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Concurrent map with lock-free reads; the SHA-256 state itself is
/// single-threaded per call (spec §5 — "SHA-256 state guarded by a mutex").
/// `Sha256::new()`/`update`/`finalize` don't share state across calls so no
/// explicit mutex is needed beyond what `Sha256::new()` already gives each
/// caller.
static HASH_CACHE: Lazy<DashMap<String, Arc<str>>> = Lazy::new(DashMap::new);

/// Canonical JSON used as hash input: keys sorted lexicographically
/// (guaranteed by `ParameterSet`'s `BTreeMap` backing), values rendered in
/// culture-invariant numeric form.
fn canonical_json(set: &ParameterSet) -> String {
    let mut out = String::from("{");
    for (i, (name, value)) in set.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        out.push_str(&name.replace('\\', "\\\\").replace('"', "\\\""));
        out.push_str("\":");
        out.push_str(&value.canonical_string());
    }
    out.push('}');
    out
}

/// 64-char lowercase hex SHA-256 of the canonical serialization. Memoized
/// per unique canonical string so repeated hashing of identical sets (a
/// common pattern when re-evaluating the same parameter set across
/// walk-forward windows) skips recomputation.
#[must_use]
pub fn hash(set: &ParameterSet) -> String {
    let canonical = canonical_json(set);
    if let Some(cached) = HASH_CACHE.get(&canonical) {
        return cached.value().to_string();
    }

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    HASH_CACHE.insert(canonical, Arc::from(hex.as_str()));
    hex
}
