//! Core domain types and traits for the Kozmic CI orchestrator.
//!
//! This crate contains:
//! - Records the job execution core reads and writes (projects, hooks,
//!   builds, hook calls, jobs) and their derived states
//! - The container driver trait implemented by the Docker backend
//! - The hosted-git trait the core consumes (contents, commits, statuses)
//! - The notifier trait behind which mail delivery lives

pub mod codehost;
pub mod driver;
pub mod error;
pub mod model;
pub mod notify;

pub use error::{Error, Result};
