//! Common test utilities for datamill integration tests.

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
