//! Property-based tests

mod determinism;
mod versioning;
