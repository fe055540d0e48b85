//! Parser for links between notes.
//!
//! A note links to another with an ordinary markdown link whose target is the
//! note path `/<id>`:
//! - Basic links: `[Title](/abc123)`
//! - Titled links: `[Title](/abc123 "hover text")`
//! - Angle targets: `[Title](</abc123>)`
//!
//! Images (`![alt](/abc123)`) and external URLs are not note links.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A markdown link pointing at another note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteLink {
    /// Id of the linked note: "abc123"
    pub target_id: String,
    /// Link text: "Title"
    pub label: String,
}

/// Returns true when `c` may appear in a note id.
pub fn is_note_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Returns true for non-empty ids made of `[A-Za-z0-9_-]`.
pub fn is_note_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(is_note_id_char)
}

/// Returns true when `href` is exactly `/<id>`.
pub fn is_note_link(href: &str) -> bool {
    href.strip_prefix('/').is_some_and(is_note_id)
}

/// Parse all note links from markdown content
pub fn parse_note_links(content: &str) -> Vec<NoteLink> {
    let mut links = Vec::new();
    let chars: Vec<char> = content.chars().collect();
    let len = chars.len();
    let mut i = 0;

    while i < len {
        if chars[i] == '[' && (i == 0 || chars[i - 1] != '!') {
            if let Some((link, end)) = parse_link_at(&chars, i) {
                if let Some(link) = link {
                    links.push(link);
                }
                i = end;
                continue;
            }
        }
        i += 1;
    }

    links
}

/// Parses `[label](target)` starting at `start`.
///
/// Returns the link (if its target is a note) and the index just past the
/// closing paren, or None if this is not a markdown link at all.
fn parse_link_at(chars: &[char], start: usize) -> Option<(Option<NoteLink>, usize)> {
    let len = chars.len();

    // Find the matching ]
    let mut depth = 0;
    let mut label_end = None;
    for (j, &c) in chars.iter().enumerate().skip(start) {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    label_end = Some(j);
                    break;
                }
            }
            '\n' => return None,
            _ => {}
        }
    }
    let label_end = label_end?;

    if label_end + 1 >= len || chars[label_end + 1] != '(' {
        return None;
    }

    // Find the closing )
    let target_start = label_end + 2;
    let close = (target_start..len).find(|&j| chars[j] == ')' || chars[j] == '\n')?;
    if chars[close] != ')' {
        return None;
    }

    let label: String = chars[start + 1..label_end].iter().collect();
    let inner: String = chars[target_start..close].iter().collect();
    let link = parse_target(&inner).map(|target_id| NoteLink {
        target_id,
        label: label.trim().to_string(),
    });

    Some((link, close + 1))
}

/// Pulls the note id out of a link target, dropping any title.
fn parse_target(inner: &str) -> Option<String> {
    let inner = inner.trim();
    let href = match inner.strip_prefix('<') {
        Some(rest) => rest.split('>').next().unwrap_or_default(),
        None => inner.split_whitespace().next().unwrap_or_default(),
    };

    if is_note_link(href) {
        Some(href[1..].to_string())
    } else {
        None
    }
}

/// Extract unique linked note ids, in order of first appearance.
pub fn extract_link_ids(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for link in parse_note_links(content) {
        if seen.insert(link.target_id.clone()) {
            ids.push(link.target_id);
        }
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_note_links() {
        let links = parse_note_links("See [Daily](/abc123) for details.");

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_id, "abc123");
        assert_eq!(links[0].label, "Daily");
    }

    #[test]
    fn parse_links_with_titles() {
        let links = parse_note_links(r#"[Plan](/x_Y-9 "the plan")"#);

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target_id, "x_Y-9");
    }

    #[test]
    fn parse_angle_bracket_targets() {
        let links = parse_note_links("[Plan](</plan01>)");
        assert_eq!(links[0].target_id, "plan01");
    }

    #[test]
    fn ignore_images_and_external_links() {
        let content = "![pic](/img01) [site](https://example.com/abc) [nested](/a/b) [rel](abc)";
        assert!(parse_note_links(content).is_empty());
    }

    #[test]
    fn handle_nested_brackets_in_label() {
        let links = parse_note_links("[see [this] one](/inner)");

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].label, "see [this] one");
    }

    #[test]
    fn handle_multiple_links_in_one_line() {
        let links = parse_note_links("[A](/a) and [B](/b) and [C](/c)");
        let ids: Vec<&str> = links.iter().map(|l| l.target_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn unterminated_links_are_ignored() {
        assert!(parse_note_links("[open](/abc").is_empty());
        assert!(parse_note_links("[open\n](/abc)").is_empty());
        assert!(parse_note_links("[just text]").is_empty());
    }

    #[test]
    fn extract_unique_ids() {
        let content = "[A](/a)\n\nlater [again](/a) and [B](/b)";
        assert_eq!(extract_link_ids(content), vec!["a", "b"]);
    }

    #[test]
    fn note_id_rules() {
        assert!(is_note_id("Ab_9-z"));
        assert!(!is_note_id(""));
        assert!(!is_note_id("a b"));
        assert!(is_note_link("/abc"));
        assert!(!is_note_link("abc"));
        assert!(!is_note_link("/"));
    }

    #[test]
    fn return_empty_for_no_links() {
        assert!(extract_link_ids("plain text, no links").is_empty());
    }
}
