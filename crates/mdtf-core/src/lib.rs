//! Core engine for the MDTF diagnostic framework driver: permissive JSON
//! configuration loading, the data-driven CLI model, layered defaults
//! resolution, and the plugin registry.
//!
//! The `mdtf-cli` crate owns the binary surface (entry points, installer);
//! everything that decides *what the configuration is* lives here.

pub mod cli;
pub mod config;
pub mod domain;
pub mod util;

pub use domain::{FrameworkError, FrameworkErrorKind, FrameworkResult};
