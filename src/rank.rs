use crate::feed::Entry;

/// Default cap on the number of entries handed to the renderer.
pub const MAX_ENTRIES: usize = 250;

/// Orders entries newest first and keeps at most `max` of them.
///
/// The sort is stable, so entries with equal timestamps keep the order they arrived in.
pub fn rank(entries: impl IntoIterator<Item = Entry>, max: usize) -> Vec<Entry> {
    let mut entries: Vec<Entry> = entries.into_iter().collect();
    entries.sort_by(|a, b| b.time.cmp(&a.time));
    entries.truncate(max);
    entries
}
