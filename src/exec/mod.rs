//! Structured subprocess execution
//!
//! Every external tool the pipeline drives (b2, lipo, ar, xcodebuild,
//! plutil, xcrun) goes through the [`Runner`] trait so stages can be
//! exercised in tests without a toolchain present.

pub mod subprocess;

#[cfg(test)]
pub mod mock;

pub use subprocess::{command_exists, CommandResult, Invocation, ProcessRunner, Runner};
