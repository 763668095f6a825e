//! Docker backend for the Kozmic container driver, plus the cache sweeper.

pub mod driver;
pub mod sweeper;

pub use driver::DockerDriver;
pub use sweeper::{SweepReport, sweep_cache};
