#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Built-in zone aggregate plugins.
//!
//! Each plugin's display metadata lives in a TOML file under `plugins/`,
//! embedded at compile time. [`registry::default_registry`] registers every
//! built-in plugin.

pub mod registry;
pub mod rent;
