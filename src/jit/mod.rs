//! Azure just-in-time (JIT) VM network access.
//!
//! This module provides functionality for:
//! - Locating a VM by name across subscriptions
//! - Reading and extending `Microsoft.Security` JIT policies
//! - Requesting time-boxed access to a port from a source prefix

pub mod access;
pub mod client;
pub mod duration;
pub mod models;
pub mod planner;
pub mod preflight;
pub mod prompt;

pub use access::{request_access, AccessParams};
pub use client::ArmClient;
pub use models::{AccessGrant, Protocol};
pub use prompt::TerminalPrompt;
