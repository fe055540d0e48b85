//! Plain-text output for the CLI.

use note_tree::{HierarchyNode, NoteMeta};
use std::fmt::Write;
use sync_core::InitReport;

const INDENT: &str = "  ";

/// Renders the hierarchy as an indented outline, one note per line.
///
/// Children of collapsed items are still listed. A `*` marks notes whose
/// body is loaded and `(deleted)` marks soft-deleted ones. The root is not
/// printed.
pub fn render_hierarchy(root: &HierarchyNode) -> String {
    let mut out = String::new();
    let mut stack: Vec<(&HierarchyNode, usize)> =
        root.children.iter().rev().map(|child| (child, 0)).collect();

    while let Some((node, depth)) = stack.pop() {
        let title = match node.title() {
            Some(title) if !title.is_empty() => title,
            _ => "(untitled)",
        };
        let loaded = node.data.as_ref().is_some_and(|data| data.is_loaded());
        let deleted = node
            .data
            .as_ref()
            .is_some_and(|data| data.meta().is_deleted());

        let _ = write!(out, "{}{}", INDENT.repeat(depth), if loaded { "* " } else { "- " });
        let _ = write!(out, "{} [{}]", title, node.id);
        if deleted {
            out.push_str(" (deleted)");
        }
        out.push('\n');

        stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
    }
    out
}

pub fn render_report(report: &InitReport) -> String {
    let mut out = String::new();
    if let Some(provisional) = report.provisional_items {
        let _ = writeln!(out, "cached tree: {} items", provisional);
    }
    let _ = writeln!(out, "tree: {} items", report.total_items);
    let _ = writeln!(
        out,
        "preloaded: {} ({} from cache, {} fetched), {} deferred",
        report.priority.len(),
        report.from_cache,
        report.fetched,
        report.deferred
    );
    for failure in &report.failed {
        let _ = writeln!(out, "failed: {} ({})", failure.id, failure.error);
    }
    if !report.evicted.is_empty() {
        let _ = writeln!(out, "evicted: {}", report.evicted.join(", "));
    }
    let _ = writeln!(out, "took {:?}", report.elapsed);
    out
}

pub fn render_backlinks(target: &str, sources: &[NoteMeta]) -> String {
    if sources.is_empty() {
        return format!("no cached notes link to {}\n", target);
    }
    sources
        .iter()
        .map(|meta| format!("{} [{}]\n", meta.title, meta.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use note_tree::{Note, NoteMeta, TreeItem, TreeModel, make_hierarchy};

    fn meta(id: &str, title: &str) -> NoteMeta {
        NoteMeta {
            title: title.to_string(),
            ..NoteMeta::new(id)
        }
    }

    fn tree() -> TreeModel {
        let mut tree = TreeModel::default();
        tree.insert(TreeItem::new("root").with_children(["a", "b"]));
        tree.insert(TreeItem::new("a").with_children(["c"]).with_data(Note {
            meta: meta("a", "Alpha"),
            content: "body".into(),
        }));
        tree.insert(TreeItem::new("b").with_data(meta("b", "")));
        tree.insert(TreeItem::new("c").with_data(meta("c", "Gamma")));
        tree
    }

    #[test]
    fn test_render_outline() {
        let hierarchy = make_hierarchy(&tree()).unwrap();
        assert_eq!(
            render_hierarchy(&hierarchy),
            "* Alpha [a]\n  - Gamma [c]\n- (untitled) [b]\n"
        );
    }

    #[test]
    fn test_render_backlinks() {
        assert_eq!(render_backlinks("x", &[]), "no cached notes link to x\n");
        let sources = vec![meta("a", "Alpha")];
        assert_eq!(render_backlinks("x", &sources), "Alpha [a]\n");
    }

    #[test]
    fn test_render_report_lists_failures() {
        let report = InitReport {
            total_items: 3,
            priority: vec!["a".into()],
            failed: vec![sync_core::FetchFailure {
                id: "a".into(),
                error: "timed out".into(),
            }],
            ..Default::default()
        };
        let text = render_report(&report);
        assert!(text.contains("tree: 3 items"));
        assert!(text.contains("failed: a (timed out)"));
        assert!(!text.contains("cached tree"));
    }
}
