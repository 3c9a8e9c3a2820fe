//! Test fixtures and drivers for the Zeropage analysis core.

pub mod analyze;
pub mod fixtures;

pub use analyze::{analyze, analyze_with, Analyzed};
pub use fixtures::Fixture;
