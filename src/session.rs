//! Current-page selection.
//!
//! One page at a time: reuse the first attached page with a live session,
//! otherwise open a fresh one. Commands that carry a URL navigate before
//! any inspection happens.

use cdp_adapter::ids::PageId;
use cdp_adapter::{AdapterError, CdpAdapter, PageOps};
use tracing::info;

pub async fn current_page(
    adapter: &CdpAdapter,
    url: Option<&str>,
) -> Result<PageId, AdapterError> {
    let existing = adapter
        .registry
        .snapshot()
        .into_iter()
        .find(|(_, record)| record.cdp_session.is_some())
        .map(|(page, _)| page);

    let page = match existing {
        Some(page) => page,
        None => {
            let target = url.unwrap_or("about:blank");
            info!(target: "fiberscope", url = target, "no attached page, opening one");
            let page = adapter.create_page(target).await?;
            if url.is_some() {
                // create_page already landed on the URL.
                return Ok(page);
            }
            page
        }
    };

    if let Some(url) = url {
        adapter.navigate(page, url).await?;
    }
    Ok(page)
}
