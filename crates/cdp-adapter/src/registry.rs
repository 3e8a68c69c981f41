//! Registry of attached pages and the CDP sessions that reach them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{PageId, SessionId};

/// Everything the adapter knows about one attached page. The `cdp_session`
/// is the flat-session routing key; commands cannot reach the page without
/// it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageRecord {
    pub session: SessionId,
    pub target: Option<String>,
    pub cdp_session: Option<String>,
    pub last_url: Option<String>,
}

#[derive(Default)]
pub struct Registry {
    pages: DashMap<PageId, PageRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        page: PageId,
        session: SessionId,
        target: Option<String>,
        cdp_session: Option<String>,
    ) {
        self.pages.insert(
            page,
            PageRecord {
                session,
                target,
                cdp_session,
                last_url: None,
            },
        );
    }

    pub fn remove(&self, page: &PageId) {
        self.pages.remove(page);
    }

    pub fn lookup(&self, page: &PageId) -> Option<PageRecord> {
        self.pages.get(page).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every attached page.
    pub fn snapshot(&self) -> Vec<(PageId, PageRecord)> {
        self.pages
            .iter()
            .map(|kv| (*kv.key(), kv.value().clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn note_url(&self, page: &PageId, url: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.last_url = Some(url);
        }
    }

    pub fn attach_session(&self, page: &PageId, cdp_session: String) {
        if let Some(mut entry) = self.pages.get_mut(page) {
            entry.cdp_session = Some(cdp_session);
        }
    }

    pub fn session_for(&self, page: &PageId) -> Option<String> {
        self.pages
            .get(page)
            .and_then(|entry| entry.cdp_session.clone())
    }
}
