//! Common utilities and types shared across syncwarden crates.
//!
//! This module provides the error taxonomy and the path types used to
//! address the same file on both replicas of a synchronized tree.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{RelPath, RemoteSpec};
