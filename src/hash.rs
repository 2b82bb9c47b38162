//! xxHash-based alias generation for binding sets.
//!
//! Table aliases are derived from the binding-set name so that the same
//! definition always yields the same alias, across calls and across loads.

use xxhash_rust::xxh64;

/// Fixed seed for deterministic hashing.
const SEED: u64 = 0x517cc1b727220a95;

/// Maximum number of name characters kept in an alias prefix.
const PREFIX_LEN: usize = 12;

/// Compute a 64-bit xxHash of a name.
pub fn name_hash(name: &str) -> u64 {
    xxh64::xxh64(name.as_bytes(), SEED)
}

/// Derive the default table alias for a binding set.
///
/// The alias is a lower-case identifier made of a sanitised name prefix and
/// eight hex digits of the name hash, e.g. `orders_1a2b3c4d`. Distinct names
/// sharing a prefix still get distinct aliases.
pub fn table_alias(name: &str) -> String {
    let mut prefix: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(PREFIX_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    if prefix.is_empty() || prefix.starts_with(|c: char| c.is_ascii_digit()) {
        prefix.insert(0, 't');
    }
    format!("{prefix}_{:08x}", name_hash(name) as u32)
}
