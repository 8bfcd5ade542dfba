//! WebVTT to plain text.

use regex::Regex;
use std::sync::OnceLock;

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("Invalid regex"))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Flatten a WebVTT document into running text.
///
/// Drops the header, NOTE/STYLE/REGION blocks, cue identifiers, timing lines
/// and inline tags. Rolling auto-captions repeat the previous line at the top
/// of each cue; a line equal to the last kept line is dropped.
pub fn flatten_vtt(vtt: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut skipping_block = false;
    let mut in_header = true;

    let raw_lines: Vec<&str> = vtt.lines().map(|l| l.trim_end_matches('\r')).collect();
    for (i, raw) in raw_lines.iter().enumerate() {
        let line = raw.trim();

        if in_header {
            // Header runs until the first blank line.
            if line.is_empty() {
                in_header = false;
            }
            continue;
        }
        if line.is_empty() {
            skipping_block = false;
            continue;
        }
        if skipping_block {
            continue;
        }
        if line.starts_with("NOTE") || line == "STYLE" || line == "REGION" {
            skipping_block = true;
            continue;
        }
        if line.contains("-->") {
            continue;
        }
        // Cue identifier: any line directly followed by a timing line.
        if raw_lines.get(i + 1).is_some_and(|next| next.contains("-->")) {
            continue;
        }

        let text = decode_entities(&tag_pattern().replace_all(line, ""));
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() || lines.last() == Some(&text) {
            continue;
        }
        lines.push(text);
    }

    lines.join(" ")
}
