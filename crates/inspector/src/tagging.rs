//! DOM tagging pass.
//!
//! Writes the correlation facts gathered from the accessibility snapshot
//! onto the live DOM as `data-fiberscope-*` attributes, so the page-side
//! fiber serializer can read them back without another protocol round trip.

use serde_json::{json, Value};
use tracing::debug;

use crate::errors::InspectorError;
use crate::model::CorrelationMap;
use crate::ports::InspectorPage;

const TAG_ELEMENT_JS: &str = include_str!("js/tag_element.js");

/// Roles worth correlating. Everything else is layout noise that would only
/// inflate the cross-process call count.
const ALLOWED_ROLES: &[&str] = &[
    "alert",
    "alertdialog",
    "article",
    "banner",
    "button",
    "cell",
    "checkbox",
    "columnheader",
    "combobox",
    "complementary",
    "contentinfo",
    "dialog",
    "form",
    "grid",
    "heading",
    "image",
    "img",
    "link",
    "list",
    "listbox",
    "listitem",
    "main",
    "menu",
    "menubar",
    "menuitem",
    "navigation",
    "option",
    "progressbar",
    "radio",
    "region",
    "row",
    "rowheader",
    "search",
    "searchbox",
    "slider",
    "spinbutton",
    "status",
    "switch",
    "tab",
    "table",
    "tablist",
    "tabpanel",
    "textbox",
    "toolbar",
    "tooltip",
    "tree",
    "treeitem",
];

const DENIED_ROLES: &[&str] = &[
    "generic",
    "none",
    "presentation",
    "InlineTextBox",
    "StaticText",
    "LineBreak",
    "paragraph",
    "text",
];

/// Whether a role carries enough meaning to be tagged and later surfaced
/// as an accessibility annotation.
pub fn role_passes_filter(role: &str) -> bool {
    if role.is_empty() || DENIED_ROLES.contains(&role) {
        return false;
    }
    ALLOWED_ROLES.contains(&role)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagReport {
    pub tagged: usize,
    pub skipped: usize,
}

/// Write markers for every filter-passing correlation entry. Stale or
/// detached nodes are logged and counted; the pass never aborts early.
pub async fn tag_elements(
    page: &dyn InspectorPage,
    correlation: &CorrelationMap,
) -> Result<TagReport, InspectorError> {
    let mut entries: Vec<_> = correlation
        .iter()
        .filter(|(_, entry)| role_passes_filter(&entry.role))
        .collect();
    // Stable iteration so identical snapshots tag in identical order.
    entries.sort_by_key(|(reference, _)| **reference);

    let mut report = TagReport::default();
    for (reference, entry) in entries {
        let object_id = match page.resolve_backend_node(*reference).await {
            Ok(id) => id,
            Err(err) => {
                debug!(
                    target: "inspector",
                    reference,
                    error = %err,
                    "could not resolve node for tagging, skipping"
                );
                report.skipped += 1;
                continue;
            }
        };

        let args = [json!(reference), json!(entry.role), json!(entry.name)];
        match page.call_function_on(&object_id, TAG_ELEMENT_JS, &args).await {
            Ok(Value::Bool(true)) => report.tagged += 1,
            Ok(_) => {
                debug!(target: "inspector", reference, "element rejected the marker write");
                report.skipped += 1;
            }
            Err(err) => {
                debug!(
                    target: "inspector",
                    reference,
                    error = %err,
                    "marker write failed, skipping"
                );
                report.skipped += 1;
            }
        }
    }

    debug!(
        target: "inspector",
        tagged = report.tagged,
        skipped = report.skipped,
        "tagging pass finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CorrelationEntry;
    use crate::testutil::{MockOp, MockPage};
    use serde_json::json;

    fn correlation(entries: &[(u64, &str, &str)]) -> CorrelationMap {
        entries
            .iter()
            .map(|(reference, role, name)| {
                (
                    *reference,
                    CorrelationEntry {
                        role: (*role).to_owned(),
                        name: (*name).to_owned(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn filter_accepts_semantic_roles_and_rejects_noise() {
        assert!(role_passes_filter("button"));
        assert!(role_passes_filter("navigation"));
        assert!(role_passes_filter("textbox"));
        assert!(!role_passes_filter("generic"));
        assert!(!role_passes_filter("StaticText"));
        assert!(!role_passes_filter("presentation"));
        assert!(!role_passes_filter(""));
        assert!(!role_passes_filter("RootWebArea"));
    }

    #[tokio::test]
    async fn tags_passing_entries_in_backend_ref_order() {
        let page = MockPage::new();
        page.push_resolve("obj-5");
        page.push_resolve("obj-9");
        page.push_call(json!(true));
        page.push_call(json!(true));

        let map = correlation(&[
            (9, "link", "Docs"),
            (5, "button", "Sign up"),
            (7, "generic", ""),
        ]);
        let report = tag_elements(&page, &map).await.unwrap();

        assert_eq!(report, TagReport { tagged: 2, skipped: 0 });
        let resolves: Vec<u64> = page
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                MockOp::Resolve(reference) => Some(reference),
                _ => None,
            })
            .collect();
        assert_eq!(resolves, vec![5, 9]);
    }

    #[tokio::test]
    async fn stale_node_is_skipped_without_aborting_the_pass() {
        let page = MockPage::new();
        page.push_resolve_err(InspectorError::Resolution {
            reference: 5,
            reason: "no node with given id".into(),
        });
        page.push_resolve("obj-9");
        page.push_call(json!(true));

        let map = correlation(&[(5, "button", "Gone"), (9, "link", "Docs")]);
        let report = tag_elements(&page, &map).await.unwrap();

        assert_eq!(report, TagReport { tagged: 1, skipped: 1 });
    }

    #[tokio::test]
    async fn marker_write_refusal_counts_as_skipped() {
        let page = MockPage::new();
        page.push_resolve("obj-5");
        page.push_call(json!(false));

        let map = correlation(&[(5, "button", "Save")]);
        let report = tag_elements(&page, &map).await.unwrap();

        assert_eq!(report, TagReport { tagged: 0, skipped: 1 });
    }
}
