use thiserror::Error;

/// Failures surfaced by the correlation engine. Per-node problems inside the
/// tagging pass are swallowed locally; these are the systemic ones.
#[derive(Debug, Error, Clone)]
pub enum InspectorError {
    #[error("page evaluation failed: {0}")]
    Eval(String),

    #[error("could not resolve backend reference {reference}: {reason}")]
    Resolution { reference: u64, reason: String },

    #[error("no React renderers registered on the page; run attach first")]
    NotAttached,

    #[error("no fiber roots found on the page")]
    NoRoots,

    #[error("accessibility snapshot unavailable: {0}")]
    EmptySnapshot(String),

    #[error("unexpected payload from page: {0}")]
    Payload(String),

    #[error("transport failure: {0}")]
    Transport(String),
}
