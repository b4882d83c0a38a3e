// src/core/context.rs

//! The execution context threaded through a [`Runnable`](super::runnable::Runnable) chain.
//!
//! A context is never mutated. Scope nodes derive a child context for the part of
//! the chain they wrap, and the parent is what the rest of the chain keeps using,
//! so leaving a scope is the same as dropping its child context.

use crate::core::env::EnvMap;
use crate::system::config::{ConfigError, RunnerConfig};
use crate::system::executor::Launch;
use crate::system::redirect::Streams;
use crate::system::registry::{self, ProcessRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Context {
    env: Arc<EnvMap>,
    virtual_dir: Option<PathBuf>,
    streams: Streams,
    registry: Arc<ProcessRegistry>,
    config: Arc<RunnerConfig>,
}

impl Context {
    /// A root context over `env`, registering background work in the global registry.
    pub fn new(env: EnvMap, config: RunnerConfig) -> Self {
        Self {
            env: Arc::new(env),
            virtual_dir: None,
            streams: Streams::default(),
            registry: registry::global(),
            config: Arc::new(config),
        }
    }

    /// The root context `run()` uses: the inherited OS environment and the
    /// discovered runner configuration.
    pub fn ambient() -> Result<Self, ConfigError> {
        let config = RunnerConfig::discover()?;
        Ok(Self::new(EnvMap::from_os(), config))
    }

    /// Replaces the registry background processes are tracked in.
    pub fn with_registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn env(&self) -> &EnvMap {
        &self.env
    }

    /// Directory baked into new commands. `None` means the OS current directory.
    pub fn virtual_dir(&self) -> Option<&Path> {
        self.virtual_dir.as_deref()
    }

    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub(crate) fn launch(&self) -> Launch<'_> {
        Launch {
            env: &self.env,
            inherit_external: self.config.inherit_external,
            streams: &self.streams,
        }
    }

    pub(crate) fn scoped_env(&self, env: EnvMap) -> Self {
        Self {
            env: Arc::new(env),
            ..self.clone()
        }
    }

    pub(crate) fn scoped_dir(&self, dir: PathBuf) -> Self {
        Self {
            virtual_dir: Some(dir),
            ..self.clone()
        }
    }

    pub(crate) fn scoped_streams(&self, streams: Streams) -> Self {
        Self {
            streams,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_contexts_leave_parent_untouched() {
        let root = Context::new(EnvMap::parse(&["A=1"], false, &[]), RunnerConfig::default());

        let with_env = root.scoped_env(root.env().combine(&["A=2"]));
        let with_dir = with_env.scoped_dir(PathBuf::from("sub"));

        assert_eq!(root.env().get("A"), Some("1"));
        assert!(root.virtual_dir().is_none());
        assert_eq!(with_dir.env().get("A"), Some("2"));
        assert_eq!(with_dir.virtual_dir(), Some(Path::new("sub")));
        assert!(Arc::ptr_eq(root.registry(), with_dir.registry()));
    }

    #[test]
    fn test_launch_follows_config() {
        let config = RunnerConfig {
            inherit_external: true,
            ..RunnerConfig::default()
        };
        let ctx = Context::new(EnvMap::new(), config);
        assert!(ctx.launch().inherit_external);
    }
}
