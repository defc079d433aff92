//! gitweave application library
//!
//! Adapters implementing the core ports with git2, the service wiring them into a controller,
//! and the command line surface of the `gitweave` binary.

pub mod adapters;
pub mod cli;
pub mod services;
