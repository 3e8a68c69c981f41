//! Correlation engine merging two descriptions of the same running page: the
//! platform accessibility tree and the React fiber tree.
//!
//! The engine never owns either tree. It snapshots the accessibility tree,
//! writes temporary correlation markers onto meaningful DOM elements, walks
//! the fiber tree reading the markers back, and renders one annotated
//! component map. A single-node fast path resolves one backend reference to
//! its owning component chain without the full walk.
//!
//! All page access goes through the [`ports::InspectorPage`] trait; the
//! engine itself holds no transport state.

pub mod ax;
pub mod errors;
pub mod hook;
pub mod model;
pub mod ports;
pub mod resolver;
pub mod tagging;
pub mod walker;

pub use errors::InspectorError;
pub use model::{AttachReport, AxSnapshot, ComponentQuery};

#[cfg(test)]
pub(crate) mod testutil;
