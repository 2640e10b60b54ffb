//! Shared plumbing for the `modlink` command line tools.

pub mod common;
