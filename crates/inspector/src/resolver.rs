//! Single-node resolver.
//!
//! Fast path from one backend reference to the component owning that
//! element, without serializing the whole forest.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::InspectorError;
use crate::model::{ComponentDetail, ComponentQuery};
use crate::ports::InspectorPage;

const OWNER_CHAIN_JS: &str = include_str!("js/owner_chain.js");

#[derive(Debug, Deserialize)]
struct OwnerChainResult {
    found: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    component: Option<ComponentDetail>,
}

/// Look up the authored component owning the element behind `reference`.
///
/// Every failure mode comes back as `success: false` with a descriptive
/// error; only payload corruption and transport loss surface as `Err`.
pub async fn resolve_backend_reference(
    page: &dyn InspectorPage,
    reference: u64,
) -> Result<ComponentQuery, InspectorError> {
    let object_id = match page.resolve_backend_node(reference).await {
        Ok(id) => id,
        Err(InspectorError::Resolution { reference, reason }) => {
            debug!(target: "inspector", reference, reason = %reason, "backend reference did not resolve");
            return Ok(ComponentQuery::failed(format!(
                "could not resolve backend reference {reference}: {reason}; \
                 the reference may be from an older page load"
            )));
        }
        Err(err) => return Err(err),
    };

    let raw = page
        .call_function_on(&object_id, OWNER_CHAIN_JS, &[])
        .await?;
    parse_owner_chain(raw, reference)
}

fn parse_owner_chain(raw: Value, reference: u64) -> Result<ComponentQuery, InspectorError> {
    let result: OwnerChainResult = serde_json::from_value(raw)
        .map_err(|err| InspectorError::Payload(format!("malformed owner chain result: {err}")))?;

    if !result.found {
        let reason = result
            .reason
            .unwrap_or_else(|| "no component found for this element".into());
        return Ok(ComponentQuery::failed(reason));
    }

    match result.component {
        Some(component) => {
            debug!(
                target: "inspector",
                reference,
                component = %component.name,
                owners = component.owners.len(),
                "resolved backend reference"
            );
            Ok(ComponentQuery::found(component))
        }
        None => Err(InspectorError::Payload(
            "owner chain result claimed success without a component".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComponentKind;
    use crate::testutil::{MockOp, MockPage};
    use serde_json::json;

    #[tokio::test]
    async fn resolves_component_with_owner_chain() {
        let page = MockPage::new();
        page.push_resolve("obj-1");
        page.push_call(json!({
            "found": true,
            "component": {
                "name": "Button",
                "kind": "component",
                "props": {"variant": "primary", "onClick": "[Function]"},
                "state": null,
                "source": {"file": "src/Button.tsx", "line": 42, "column": 8},
                "owners": [
                    {"name": "Form", "kind": "component", "source": null},
                    {"name": "App", "kind": "component", "source": null},
                ],
            },
        }));

        let query = resolve_backend_reference(&page, 20).await.unwrap();
        assert!(query.success);
        let component = query.component.unwrap();
        assert_eq!(component.name, "Button");
        assert_eq!(component.kind, ComponentKind::Component);
        assert_eq!(component.owners.len(), 2);
        assert_eq!(component.owners[0].name, "Form");
        assert_eq!(page.count(|op| matches!(op, MockOp::Resolve(20))), 1);
    }

    #[tokio::test]
    async fn stale_reference_yields_descriptive_failure() {
        let page = MockPage::new();
        page.push_resolve_err(InspectorError::Resolution {
            reference: 99,
            reason: "no node with given id found".into(),
        });

        let query = resolve_backend_reference(&page, 99).await.unwrap();
        assert!(!query.success);
        let error = query.error.unwrap();
        assert!(error.contains("99"));
        assert!(error.contains("older page load"));
    }

    #[tokio::test]
    async fn element_without_fiber_yields_failure_not_error() {
        let page = MockPage::new();
        page.push_resolve("obj-1");
        page.push_call(json!({
            "found": false,
            "reason": "element is not managed by React",
        }));

        let query = resolve_backend_reference(&page, 5).await.unwrap();
        assert!(!query.success);
        assert_eq!(query.error.unwrap(), "element is not managed by React");
    }

    #[tokio::test]
    async fn transport_loss_surfaces_as_error() {
        let page = MockPage::new();
        page.push_resolve("obj-1");
        page.push_call_err(InspectorError::Transport("connection reset".into()));

        let err = resolve_backend_reference(&page, 5).await.unwrap_err();
        assert!(matches!(err, InspectorError::Transport(_)));
    }
}
