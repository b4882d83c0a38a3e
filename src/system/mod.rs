//! # System Interaction Layer
//!
//! This module provides abstractions for interacting with the underlying operating system.
//! It is the boundary between the execution engine in `core` and the specifics of
//! process management, stream plumbing and configuration files.
//!
//! ## Modules
//!
//! - **`executor`**: Turns a parsed command line into a ready-to-spawn process: resolves
//!   its environment, locates the binary and wires its standard streams.
//! - **`registry`**: Tracks background processes by their command text and stops them.
//! - **`redirect`**: Splices pipes into stdout/stderr and drains them into a [`redirect::Capture`].
//! - **`config`**: Loads `config.toml` runner settings.
//! - **`prompt`**: Line-oriented user input from the terminal or any reader.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod executor;
pub mod prompt;
pub mod redirect;
pub mod registry;

/// Locks a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
