// EN: src/system/executor.rs

use crate::constants::SHELL_COMMAND_FLAG;
use crate::core::env::{self as env_map, EnvMap};
use crate::core::tokenizer::{self, TokenizeError};
use crate::system::config::ConfigError;
use crate::system::redirect::{RedirectError, Stream, Streams};
use crate::system::registry::RegistryError;
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as StdCommand, ExitStatus, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    #[error("Installing '{binary}' is in your future: it was not found on the search path.")]
    BinaryNotFound {
        binary: String,
        #[source]
        source: which::Error,
    },
    #[error("Shell takes a script, optionally preceded by the shell binary; got {0} arguments.")]
    ShellArgumentCount(usize),
    #[error("Command '{command}' could not be executed: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Command '{command}' failed: {status}\nline={line}")]
    ProcessExit {
        command: String,
        line: usize,
        status: ExitStatus,
    },
    #[error("Could not change working directory to '{}': {source}", .path.display())]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Redirect(#[from] RedirectError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One parsed invocation, ready to be resolved against an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub binary: String,
    pub args: Vec<String>,
    /// Per-invocation `KEY=VALUE` overrides, in order.
    pub env: Vec<String>,
    /// Working directory for the child; `None` inherits the process directory.
    pub dir: Option<PathBuf>,
    /// The raw statement, used for diagnostics and as the registry key.
    pub command: String,
}

/// Environment and stream targets a command is launched under.
#[derive(Debug, Clone, Copy)]
pub struct Launch<'a> {
    pub env: &'a EnvMap,
    pub inherit_external: bool,
    pub streams: &'a Streams,
}

impl CommandSpec {
    pub fn parse(line: &str, dir: Option<&Path>) -> Result<Self, TokenizeError> {
        let parsed = tokenizer::parse_command(line)?;
        Ok(Self {
            binary: parsed.binary,
            args: parsed.args,
            env: parsed.env,
            dir: dir.map(Path::to_path_buf),
            command: line.to_string(),
        })
    }

    /// `[script]` runs under `default_shell`; `[shell, script]` names the shell.
    pub fn shell(
        parts: &[String],
        default_shell: &str,
        dir: Option<&Path>,
    ) -> Result<Self, ExecutionError> {
        let (binary, script, command) = match parts {
            [script] => (default_shell.to_string(), script.clone(), script.clone()),
            [shell, script] => (shell.clone(), script.clone(), parts.join(" ")),
            _ => return Err(ExecutionError::ShellArgumentCount(parts.len())),
        };
        Ok(Self {
            binary,
            args: vec![SHELL_COMMAND_FLAG.to_string(), script],
            env: Vec::new(),
            dir: dir.map(Path::to_path_buf),
            command,
        })
    }

    /// The child's environment: per-invocation overrides win over `store`,
    /// which wins over the real OS environment.
    pub fn resolve_env(&self, store: &EnvMap, inherit_external: bool) -> EnvMap {
        let mut resolved = store.combine_with(&self.env, inherit_external);
        resolved.backfill(env_map::os_vars());
        resolved
    }

    /// Finds the binary on the search path of `env`, retrying once with any
    /// `$NAME` references in the binary name expanded.
    pub fn locate(&self, env: &EnvMap) -> Result<PathBuf, ExecutionError> {
        let search_path = env
            .materialized("PATH")
            .map(OsString::from)
            .or_else(|| env::var_os("PATH"));
        let cwd = self.lookup_dir();

        which::which_in(&self.binary, search_path.as_ref(), &cwd)
            .or_else(|err| {
                let expanded = env.expand(&self.binary);
                if expanded == self.binary {
                    return Err(err);
                }
                log::debug!("Retrying lookup of '{}' as '{}'.", self.binary, expanded);
                which::which_in(&expanded, search_path.as_ref(), &cwd)
            })
            .map_err(|source| ExecutionError::BinaryNotFound {
                binary: self.binary.clone(),
                source,
            })
    }

    fn lookup_dir(&self) -> PathBuf {
        let current = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        match &self.dir {
            Some(dir) => current.join(dir),
            None => current,
        }
    }

    fn spawn_error(&self, source: io::Error) -> ExecutionError {
        ExecutionError::Spawn {
            command: self.command.clone(),
            source,
        }
    }
}

/// Builds the OS command for `spec`. Stdin is always inherited; stdout and
/// stderr follow `launch.streams`.
pub fn prepare(spec: &CommandSpec, launch: Launch<'_>) -> Result<StdCommand, ExecutionError> {
    let env = spec.resolve_env(launch.env, launch.inherit_external);
    let program = spec.locate(&env)?;

    let stdout = launch
        .streams
        .stdio(Stream::Stdout)
        .map_err(|e| spec.spawn_error(e))?;
    let stderr = launch
        .streams
        .stdio(Stream::Stderr)
        .map_err(|e| spec.spawn_error(e))?;

    let mut command = StdCommand::new(program);
    command
        .args(&spec.args)
        .env_clear()
        .envs(env.materialize())
        .stdin(Stdio::inherit())
        .stdout(stdout)
        .stderr(stderr);
    if let Some(dir) = &spec.dir {
        command.current_dir(dunce::simplified(dir));
    }

    log::trace!("Env: {}", env);
    log::debug!("Command loaded: {}", spec.command);
    Ok(command)
}

/// Runs `spec` to completion. `line` is the 1-based statement number reported
/// when the process exits unsuccessfully.
pub fn run(spec: &CommandSpec, line: usize, launch: Launch<'_>) -> Result<(), ExecutionError> {
    let mut command = prepare(spec, launch)?;
    let mut child = command.spawn().map_err(|e| spec.spawn_error(e))?;
    let status = child.wait().map_err(|e| spec.spawn_error(e))?;
    if !status.success() {
        return Err(ExecutionError::ProcessExit {
            command: spec.command.clone(),
            line,
            status,
        });
    }
    Ok(())
}

/// Starts `spec` and returns as soon as the OS confirms the process exists.
pub fn spawn(spec: &CommandSpec, launch: Launch<'_>) -> Result<Child, ExecutionError> {
    let mut command = prepare(spec, launch)?;
    command.spawn().map_err(|e| spec.spawn_error(e))
}
