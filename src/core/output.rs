//! Terminal rendering helpers shared by CLI commands and summaries.

use std::collections::BTreeSet;

/// Single-line form of `text`, cut to `max_chars` with a trailing `...`.
pub fn compact_line(text: &str, max_chars: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let flat = words.join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// Up to `max_items` compacted entries joined by ` | `, noting how many were left out.
pub fn preview_messages(items: &[String], max_items: usize, max_chars: usize) -> String {
    let mut out = items
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if items.len() > max_items {
        out.push_str(&format!(" (+{} more)", items.len() - max_items));
    }
    out
}

/// Layer names in sorted order, joined by `sep`.
pub fn join_layers(layers: &BTreeSet<String>, sep: &str) -> String {
    layers.iter().map(String::as_str).collect::<Vec<_>>().join(sep)
}
