//! Core ip6tables provisioning functionality
//!
//! This module contains the rule set and the logic for installing it into the
//! IPv6 mangle table. It provides:
//!
//! - [`rules`]: The ordered ip6tables invocations, as pure data
//! - [`provision`]: Setup and cleanup against a live (or mocked) ip6tables
//! - [`executor`]: Process execution behind the [`executor::Executor`] trait
//! - [`error`]: Error types for provisioning operations

pub mod error;
pub mod executor;
pub mod provision;
pub mod rules;

#[cfg(test)]
pub mod test_helpers;
