// src/core/runnable.rs

//! Chainable command runner.
//!
//! A [`Runnable`] is a tree built from the inside out: every builder call wraps
//! the chain built so far in a new node. Action nodes (`call`, `shell`, `start`)
//! run their predecessor and then their own command. Scope nodes (`with`, `at`,
//! `in_dir`, `pipe`) run everything built before them inside a context change.
//!
//! ```no_run
//! use runchain::{Capture, StreamMask, call};
//!
//! let out = Capture::new();
//! call("echo A")
//!     .call("echo B")
//!     .with(["GREETING=hi"])
//!     .pipe(StreamMask::STDOUT, &out)
//!     .run()?;
//! assert_eq!(out.contents(), "A\nB\n");
//! # Ok::<(), runchain::ExecutionError>(())
//! ```
//!
//! Environment, virtual directory and stream redirection live in the
//! [`Context`] handed down the tree, so two chains never see each other's
//! scopes. `in_dir` is the exception: it changes the real process directory,
//! which every thread of the process observes while the scope is active.

use crate::core::context::Context;
use crate::core::tokenizer;
use crate::system::executor::{self, CommandSpec, ExecutionError};
use crate::system::redirect::{self, Capture, StreamMask};
use scopeguard::guard;
use std::env;
use std::path::PathBuf;
use std::time::SystemTime;

/// A process invocation appended to a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// One synchronous command per non-blank line.
    Call(String),
    /// `[script]` or `[shell, script]`, run with `-c`.
    Shell(Vec<String>),
    /// Background command; only the first non-blank line is used.
    Start(String),
}

/// A context change around the chain built before it.
#[derive(Debug, Clone)]
pub enum Scope {
    With(Vec<String>),
    At(PathBuf),
    In(PathBuf),
    Pipe(StreamMask, Capture),
}

/// A deferred chain of commands. Nothing runs until [`Runnable::run`].
#[derive(Debug, Clone, Default)]
pub enum Runnable {
    /// The start of every chain.
    #[default]
    Empty,
    Action {
        prev: Box<Runnable>,
        action: Action,
    },
    Scope {
        inner: Box<Runnable>,
        scope: Scope,
    },
}

/// Starts a chain with [`Runnable::call`].
pub fn call(text: impl Into<String>) -> Runnable {
    Runnable::Empty.call(text)
}

/// Starts a chain with [`Runnable::shell`].
pub fn shell<I, S>(parts: I) -> Runnable
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Runnable::Empty.shell(parts)
}

/// Starts a chain with [`Runnable::start`].
pub fn start(text: impl Into<String>) -> Runnable {
    Runnable::Empty.start(text)
}

impl Runnable {
    /// Runs each non-blank line of `text` as a command, in order, stopping at
    /// the first failure. Leading `KEY=VALUE` words are per-command overrides.
    pub fn call(self, text: impl Into<String>) -> Self {
        self.then(Action::Call(text.into()))
    }

    /// Runs a script through a shell. One part runs under the configured
    /// default shell; with two, the first names the shell binary.
    pub fn shell<I, S>(self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(Action::Shell(parts.into_iter().map(Into::into).collect()))
    }

    /// Starts the first non-blank line of `text` in the background and returns
    /// once the process exists. Its exit status is only visible in the registry.
    pub fn start(self, text: impl Into<String>) -> Self {
        self.then(Action::Start(text.into()))
    }

    /// Runs the chain so far with `assignments` combined over the environment.
    pub fn with<I, S>(self, assignments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.around(Scope::With(assignments.into_iter().map(Into::into).collect()))
    }

    /// Runs the chain so far with `dir` as the working directory of new commands.
    /// The process directory is not touched.
    pub fn at(self, dir: impl Into<PathBuf>) -> Self {
        self.around(Scope::At(dir.into()))
    }

    /// Changes the process directory to `dir` for the chain so far and changes
    /// it back afterwards, whatever the outcome.
    pub fn in_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.around(Scope::In(dir.into()))
    }

    /// Captures the streams selected by `mask` into `sink` for the chain so far.
    pub fn pipe(self, mask: StreamMask, sink: &Capture) -> Self {
        self.around(Scope::Pipe(mask, sink.clone()))
    }

    /// Runs the chain under [`Context::ambient`].
    pub fn run(&self) -> Result<(), ExecutionError> {
        let ctx = Context::ambient()?;
        evaluate(self, &ctx)
    }

    /// Runs the chain under an explicit root context.
    pub fn run_with(&self, ctx: &Context) -> Result<(), ExecutionError> {
        evaluate(self, ctx)
    }

    fn then(self, action: Action) -> Self {
        Self::Action {
            prev: Box::new(self),
            action,
        }
    }

    fn around(self, scope: Scope) -> Self {
        Self::Scope {
            inner: Box::new(self),
            scope,
        }
    }
}

/// Interprets a chain: predecessors first, scopes around what they wrap.
pub fn evaluate(node: &Runnable, ctx: &Context) -> Result<(), ExecutionError> {
    match node {
        Runnable::Empty => Ok(()),
        Runnable::Action { prev, action } => {
            evaluate(prev, ctx)?;
            perform(action, ctx)
        }
        Runnable::Scope { inner, scope } => enter(scope, inner, ctx),
    }
}

fn perform(action: &Action, ctx: &Context) -> Result<(), ExecutionError> {
    match action {
        Action::Call(text) => {
            for (index, line) in tokenizer::statements(text).enumerate() {
                let spec = CommandSpec::parse(line, ctx.virtual_dir())?;
                executor::run(&spec, index + 1, ctx.launch())?;
            }
            Ok(())
        }
        Action::Shell(parts) => {
            let spec = CommandSpec::shell(parts, &ctx.config().default_shell, ctx.virtual_dir())?;
            executor::run(&spec, 1, ctx.launch())
        }
        Action::Start(text) => {
            let Some(line) = tokenizer::statements(text).next() else {
                return Ok(());
            };
            let spec = CommandSpec::parse(line, ctx.virtual_dir())?;
            let started_at = SystemTime::now();
            let child = executor::spawn(&spec, ctx.launch())?;
            ctx.registry().register(&spec.command, started_at, child)?;
            Ok(())
        }
    }
}

fn enter(scope: &Scope, inner: &Runnable, ctx: &Context) -> Result<(), ExecutionError> {
    match scope {
        Scope::With(assignments) => {
            let scoped = ctx.scoped_env(ctx.env().combine(assignments));
            evaluate(inner, &scoped)
        }
        Scope::At(dir) => evaluate(inner, &ctx.scoped_dir(dir.clone())),
        Scope::In(dir) => {
            let previous = env::current_dir().map_err(|source| {
                ExecutionError::WorkingDirectory {
                    path: PathBuf::from("."),
                    source,
                }
            })?;
            env::set_current_dir(dir).map_err(|source| ExecutionError::WorkingDirectory {
                path: dir.clone(),
                source,
            })?;
            let _restore = guard(previous, |previous| {
                if let Err(e) = env::set_current_dir(&previous) {
                    log::warn!(
                        "Could not restore working directory to '{}': {}",
                        previous.display(),
                        e
                    );
                }
            });
            evaluate(inner, ctx)
        }
        Scope::Pipe(mask, sink) => {
            let redirection = redirect::redirect(ctx.streams(), *mask, sink)?;
            let result = {
                let scoped = ctx.scoped_streams(redirection.streams().clone());
                evaluate(inner, &scoped)
            };
            // The copier is joined even when the chain failed.
            let copied = redirection.finish();
            result?;
            copied?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::EnvMap;
    use crate::system::config::RunnerConfig;
    use crate::system::redirect::{RedirectError, Stream};
    use crate::system::registry::{ProcessRegistry, ProcessState, TimeSpan};
    use serial_test::serial;
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;

    fn context() -> Context {
        Context::new(EnvMap::from_os(), RunnerConfig::default())
    }

    fn context_with_registry() -> (Context, Arc<ProcessRegistry>) {
        let registry = Arc::new(ProcessRegistry::new(Duration::from_millis(10)));
        (context().with_registry(Arc::clone(&registry)), registry)
    }

    const PRINT_FOO: &str = r#"sh -c "printf %s \"$FOO\"""#;

    #[test]
    fn test_chain_output_in_construction_order() {
        let out = Capture::new();
        call("echo A")
            .call("echo B")
            .pipe(StreamMask::STDOUT, &out)
            .run_with(&context())
            .unwrap();
        assert_eq!(out.contents(), "A\nB\n");
    }

    #[test]
    fn test_multiline_failure_reports_line() {
        let out = Capture::new();
        let err_out = Capture::new();
        let text = "\n\tcat runchain-missing-first.txt\n\n\tcat runchain-missing-second.txt\n";

        let err = call(text)
            .pipe(StreamMask::STDOUT, &out)
            .pipe(StreamMask::STDERR, &err_out)
            .run_with(&context())
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("line=1"), "{message}");
        assert!(message.contains("exit status"), "{message}");
        assert!(out.is_empty());
        assert!(err_out.contents().contains("runchain-missing-first"));
        assert!(!err_out.contents().contains("runchain-missing-second"));
    }

    #[test]
    fn test_failed_predecessor_skips_successor() {
        let out = Capture::new();
        let result = call("false")
            .call("echo never")
            .pipe(StreamMask::STDOUT, &out)
            .run_with(&context());
        assert!(matches!(result, Err(ExecutionError::ProcessExit { line: 1, .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn test_with_scopes_environment() {
        let out = Capture::new();
        let ctx = context().scoped_env(EnvMap::from_os().combine(&["FOO=outer"]));

        call(PRINT_FOO)
            .with(["FOO=inner:$FOO"])
            .call(PRINT_FOO)
            .pipe(StreamMask::STDOUT, &out)
            .run_with(&ctx)
            .unwrap();

        assert_eq!(out.contents(), "inner:outerouter");
        assert_eq!(ctx.env().get("FOO"), Some("outer"));
    }

    #[test]
    fn test_inline_assignment_wins_over_with() {
        let out = Capture::new();
        call(format!("FOO=inline {PRINT_FOO}"))
            .with(["FOO=scoped"])
            .pipe(StreamMask::STDOUT, &out)
            .run_with(&context())
            .unwrap();
        assert_eq!(out.contents(), "inline");
    }

    #[test]
    fn test_shell_forms() {
        let out = Capture::new();
        shell(["printf x"])
            .shell(["sh", "printf y"])
            .pipe(StreamMask::STDOUT, &out)
            .run_with(&context())
            .unwrap();
        assert_eq!(out.contents(), "xy");

        let err = shell(["sh", "-e", "true"]).run_with(&context()).unwrap_err();
        assert!(matches!(err, ExecutionError::ShellArgumentCount(3)));
    }

    #[test]
    fn test_assignment_only_line_is_empty_command() {
        let err = call("A=1 B=2").run_with(&context()).unwrap_err();
        assert!(matches!(err, ExecutionError::Tokenize(_)));
    }

    #[test]
    fn test_missing_binary() {
        let err = call("runchain-no-such-binary").run_with(&context()).unwrap_err();
        assert!(matches!(err, ExecutionError::BinaryNotFound { .. }));
    }

    #[test]
    fn test_invalid_pipe_option() {
        let out = Capture::new();
        let err = call("true")
            .pipe(StreamMask::STDIN, &out)
            .run_with(&context())
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Redirect(RedirectError::InvalidPipeOption(_))
        ));
    }

    #[test]
    fn test_nested_pipe_on_same_stream_fails() {
        let outer = Capture::new();
        let inner = Capture::new();
        let err = call("echo hidden")
            .pipe(StreamMask::STDOUT, &inner)
            .pipe(StreamMask::STDOUT, &outer)
            .run_with(&context())
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Redirect(RedirectError::AlreadyPiped(Stream::Stdout))
        ));
        assert!(outer.is_empty());
        assert!(inner.is_empty());
    }

    #[test]
    fn test_pipe_both_streams_into_one_capture() {
        let out = Capture::new();
        shell(["echo out; echo err >&2"])
            .pipe(StreamMask::STDOUT | StreamMask::STDERR, &out)
            .run_with(&context())
            .unwrap();
        let contents = out.contents();
        assert!(contents.contains("out\n"));
        assert!(contents.contains("err\n"));
    }

    #[test]
    #[serial]
    fn test_at_changes_only_command_directory() {
        let dir = tempdir().unwrap();
        let expected = dir.path().canonicalize().unwrap();
        let before = env::current_dir().unwrap();
        let out = Capture::new();

        call("pwd -P")
            .at(dir.path())
            .call("pwd -P")
            .pipe(StreamMask::STDOUT, &out)
            .run_with(&context())
            .unwrap();

        assert_eq!(env::current_dir().unwrap(), before);
        let lines: Vec<String> = out.contents().lines().map(str::to_string).collect();
        assert_eq!(lines.first().map(PathBuf::from), Some(expected));
        assert_eq!(
            lines.get(1).map(PathBuf::from),
            Some(before.canonicalize().unwrap())
        );
    }

    #[test]
    #[serial]
    fn test_in_changes_and_restores_process_directory() {
        let dir = tempdir().unwrap();
        let expected = dir.path().canonicalize().unwrap();
        let before = env::current_dir().unwrap();
        let out = Capture::new();

        call("pwd -P")
            .in_dir(dir.path())
            .pipe(StreamMask::STDOUT, &out)
            .run_with(&context())
            .unwrap();

        assert_eq!(env::current_dir().unwrap(), before);
        assert_eq!(PathBuf::from(out.contents().trim_end()), expected);
    }

    #[test]
    #[serial]
    fn test_in_restores_directory_on_failure() {
        let dir = tempdir().unwrap();
        let before = env::current_dir().unwrap();

        let err = call("false").in_dir(dir.path()).run_with(&context());
        assert!(err.is_err());
        assert_eq!(env::current_dir().unwrap(), before);

        let missing = dir.path().join("missing");
        let err = call("true").in_dir(&missing).run_with(&context()).unwrap_err();
        assert!(matches!(err, ExecutionError::WorkingDirectory { ref path, .. } if *path == missing));
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    #[serial]
    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn test_non_utf8_os_variable_does_not_break_calls() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        // SAFETY: serialized test, nothing else reads this key.
        unsafe { env::set_var("_runchain_bad_bytes", OsStr::from_bytes(b"\xff\xfe")) };
        let ctx = Context::new(EnvMap::new(), RunnerConfig::default());
        let result = call("true").run_with(&ctx);
        // SAFETY: as above.
        unsafe { env::remove_var("_runchain_bad_bytes") };

        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn test_start_registers_and_stop_respects_spans() {
        let (ctx, registry) = context_with_registry();
        let text = "sleep 30";

        start(text).start(text).run_with(&ctx).unwrap();
        assert_eq!(registry.records(text).len(), 2);

        let past = TimeSpan::new(UNIX_EPOCH, UNIX_EPOCH + Duration::from_secs(1));
        assert_eq!(registry.stop(text, &[past]).unwrap(), 0);
        assert_eq!(registry.records(text).len(), 2);

        assert_eq!(registry.stop(text, &[]).unwrap(), 2);
        assert!(registry.records(text).is_empty());
        registry.wait();
    }

    #[test]
    fn test_start_uses_first_line_only() {
        let (ctx, registry) = context_with_registry();
        start("\n  sleep 20\nsleep 21\n").run_with(&ctx).unwrap();

        assert_eq!(registry.commands(), vec!["sleep 20".to_string()]);
        assert_eq!(registry.stop("sleep 20", &[]).unwrap(), 1);
        registry.wait();
    }

    #[test]
    fn test_start_failure_after_launch_is_not_returned() {
        let (ctx, registry) = context_with_registry();
        start("false").run_with(&ctx).unwrap();
        registry.wait();

        let state = registry.records("false").first().map(|info| info.state);
        assert!(matches!(state, Some(ProcessState::Exited(status)) if !status.success()));
    }

    #[test]
    fn test_start_missing_binary_fails_synchronously() {
        let (ctx, registry) = context_with_registry();
        let err = start("runchain-no-such-daemon").run_with(&ctx).unwrap_err();
        assert!(matches!(err, ExecutionError::BinaryNotFound { .. }));
        assert!(registry.commands().is_empty());
    }

    #[test]
    fn test_started_process_keeps_its_scope() {
        let (ctx, registry) = context_with_registry();
        let out = Capture::new();

        // The pipe scope only finishes once the background child closes its end.
        start(PRINT_FOO)
            .with(["FOO=scoped"])
            .pipe(StreamMask::STDOUT, &out)
            .run_with(&ctx)
            .unwrap();

        assert_eq!(out.contents(), "scoped");
        registry.wait();
    }
}
