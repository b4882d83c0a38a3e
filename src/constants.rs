// src/constants.rs

/// Cross-platform stand-in for the path list separator.
/// Stored verbatim and rewritten to `:` (Unix) or `;` (Windows) only when an
/// environment is materialized for a child process.
pub const PATH_LIST_PLACEHOLDER: &str = "::";

/// Shell used by `shell()` when only the script text is given.
pub const DEFAULT_SHELL: &str = "sh";

/// Flag handed to the shell before the script text.
pub const SHELL_COMMAND_FLAG: &str = "-c";

/// Environment variable that overrides the configured default shell.
pub const SHELL_OVERRIDE_VAR: &str = "RUNCHAIN_SHELL";

/// The name of the directory (inside the system config dir) holding runchain configuration.
pub const CONFIG_DIR_NAME: &str = "runchain";

/// The name of the configuration file inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILENAME: &str = "config.toml";

/// How often background waiters poll their child for exit, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
