//! Expiry policy over the in-memory map.
//!
//! Staleness itself is [`Entry::is_expired_at`]. [`purge_expired`] removes
//! stale entries from the map; persisting the result is the caller's job,
//! done once per purge rather than once per key.

use hashbrown::HashMap;

use crate::entry::Entry;

/// Remove every entry expired at `now` in a single pass.
///
/// Returns the removed keys. Running it again with the same `now` removes
/// nothing.
pub fn purge_expired(data: &mut HashMap<String, Entry>, now: f64) -> Vec<String> {
    let mut removed = Vec::new();
    data.retain(|key, entry| {
        if entry.is_expired_at(now) {
            removed.push(key.clone());
            false
        } else {
            true
        }
    });
    removed
}
