//! Text blob shared by the rule and learned stages.

/// Lower-cased `name tags map`, single-space joined, empty parts skipped.
pub fn text_blob(name: &str, tags: &str, map: &str) -> String {
    [name, tags, map]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Split a blob into word tokens: runs of alphanumeric characters, at least
/// two characters long.
pub fn tokenize(blob: &str) -> impl Iterator<Item = &str> {
    blob.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
}
