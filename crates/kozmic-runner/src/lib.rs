//! Job execution core.
//!
//! A queued job descriptor is turned into a finished job by the
//! [`runner::JobRunner`], which coordinates three concurrent actors: the
//! [`builder::Builder`] (stages the workspace and drives the container),
//! the [`tailer::Tailer`] (follows the log file and enforces the stall
//! timeout) and the cache committer inside the runner itself. The builder
//! hands the freshly created container to the runner over a single-slot
//! rendezvous; the runner starts the tailer before acknowledging, so the
//! container cannot start until its log is being watched.

pub mod builder;
pub mod fingerprint;
pub mod runner;
pub mod tailer;
pub mod worker;

pub use builder::Builder;
pub use fingerprint::compute_fingerprint;
pub use runner::{JobRunner, RunnerConfig};
pub use tailer::{Tailer, TailerReport};
pub use worker::Worker;

#[cfg(test)]
pub(crate) mod testing;
