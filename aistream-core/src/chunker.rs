//! Splits a finished answer into word groups for incremental delivery.

/// Words per chunk when nothing else is configured.
pub const DEFAULT_GROUP_SIZE: usize = 10;

/// Split `text` on single spaces and regroup the words `group_size` at a time.
///
/// The last chunk may hold fewer words. Runs of spaces collapse, so no chunk
/// is ever empty and empty (or all-space) input yields no chunks.
/// `group_size` must be non-zero; config validation guarantees that upstream.
pub fn chunk(text: &str, group_size: usize) -> Vec<String> {
    let group_size = group_size.max(1);
    let words: Vec<&str> = text.split(' ').filter(|w| !w.is_empty()).collect();
    words
        .chunks(group_size)
        .map(|group| group.join(" "))
        .collect()
}
