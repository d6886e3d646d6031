//! Core model for mirroring issues between two trackers.
//!
//! - **types**: issue, comment and attachment views plus their ID newtypes
//! - **tracker**: the capability contract every tracker adapter implements
//! - **bucket**: correspondence namespaces keyed by tracker pair and entity kind
//! - **store**: the durable ID-correspondence store
//! - **config**: TOML configuration for the `mirrorsync` binary

pub mod bucket;
pub mod config;
pub mod store;
pub mod tracker;
pub mod types;
