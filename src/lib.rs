//! fiberscope: correlates a live page's accessibility tree with its React
//! component tree over the Chrome DevTools Protocol.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod session;
pub mod tools;
