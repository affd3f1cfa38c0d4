//! Memory-namespace derivation.
//!
//! Each run's retrieval-memory collections are isolated behind a
//! namespace string. Callers may supply one; anything that survives
//! normalization is used as-is, otherwise a fresh identifier is
//! synthesized.

use uuid::Uuid;

/// Strip a candidate namespace down to alphanumerics, `-` and `_`,
/// replacing every other character with `_`.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Resolve the namespace for a run: the normalized candidate when one
/// survives, else a synthesized `run_<uuid>` identifier.
pub fn resolve(provided: Option<&str>) -> String {
    if let Some(candidate) = provided {
        let normalized = normalize(candidate);
        if !normalized.is_empty() {
            return normalized;
        }
    }
    format!("run_{}", Uuid::new_v4().simple())
}
