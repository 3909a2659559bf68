//! Test-only fixtures shared across module test suites: `tempfile`-backed
//! scratch directories and builder-pattern constructors for the core's
//! domain types.

pub mod fixtures;
pub mod temp;
