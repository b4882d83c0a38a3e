//! Chainable command runner with scoped environments, directories and captured output.

pub mod cli;
pub mod constants;
pub mod core;
pub mod system;

pub use crate::core::context::Context;
pub use crate::core::env::{EnvError, EnvMap};
pub use crate::core::runnable::{Runnable, call, shell, start};
pub use crate::system::executor::{CommandSpec, ExecutionError};
pub use crate::system::prompt::{prompt, prompt_hidden, prompt_masked, read_line, read_masked};
pub use crate::system::redirect::{Capture, StreamMask};
pub use crate::system::registry::{ProcessRegistry, RegistryError, TimeSpan, stop, wait};
