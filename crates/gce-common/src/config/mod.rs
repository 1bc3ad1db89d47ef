//! Configs derived from plugin options and container labels.
//!
//! Both are rebuilt on every request or event and never persisted.

pub mod disk;
pub mod network;
