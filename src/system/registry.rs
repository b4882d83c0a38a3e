// src/system/registry.rs

//! Tracking of background processes started by `start`.
//!
//! Records are grouped in buckets keyed by the literal command text that started
//! them. Nothing is collected automatically: a record leaves its bucket only when
//! `stop` matches it, so repeatedly starting the same text without stopping it
//! grows the bucket for the life of the registry.

use super::config::RunnerConfig;
use super::lock;
use crate::constants::DEFAULT_POLL_INTERVAL_MS;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::io;
use std::process::{Child, ExitStatus};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use thiserror::Error;

lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<ProcessRegistry> = {
        let poll_interval = match RunnerConfig::discover() {
            Ok(config) => config.poll_interval(),
            Err(e) => {
                log::warn!("Using the default poll interval: {}", e);
                Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
            }
        };
        Arc::new(ProcessRegistry::new(poll_interval))
    };
}

/// The process-wide registry used by the ambient context.
pub fn global() -> Arc<ProcessRegistry> {
    Arc::clone(&GLOBAL_REGISTRY)
}

/// [`ProcessRegistry::stop`] on the global registry.
pub fn stop(command: &str, spans: &[TimeSpan]) -> Result<usize, RegistryError> {
    GLOBAL_REGISTRY.stop(command, spans)
}

/// Blocks until every background process started through the global registry has exited.
pub fn wait() {
    GLOBAL_REGISTRY.wait();
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Command '{0}' is not in the maintenance list.")]
    CommandNotTracked(String),
    #[error("Could not kill process {pid} started by '{command}': {source}")]
    ProcessKill {
        command: String,
        pid: u32,
        #[source]
        source: io::Error,
    },
    #[error("Could not supervise background command '{command}': {source}")]
    Supervisor {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Inclusive window of start times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl TimeSpan {
    pub fn new(start: SystemTime, end: SystemTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: SystemTime) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(ExitStatus),
}

/// Snapshot of one tracked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub started_at: SystemTime,
    pub pid: u32,
    pub state: ProcessState,
}

#[derive(Debug)]
struct ProcessRecord {
    started_at: SystemTime,
    pid: u32,
    child: Arc<Mutex<Child>>,
    exit: Arc<Mutex<Option<ExitStatus>>>,
}

impl ProcessRecord {
    fn info(&self) -> ProcessInfo {
        let state = match *lock(&self.exit) {
            Some(status) => ProcessState::Exited(status),
            None => ProcessState::Running,
        };
        ProcessInfo {
            started_at: self.started_at,
            pid: self.pid,
            state,
        }
    }

    /// Kills the child unless it has already exited. Liveness is read from the
    /// live handle, never from a cached exit snapshot.
    fn terminate(&self, command: &str) -> Result<(), RegistryError> {
        let kill_error = |source| RegistryError::ProcessKill {
            command: command.to_string(),
            pid: self.pid,
            source,
        };
        let mut child = lock(&self.child);
        match child.try_wait().map_err(kill_error)? {
            Some(_) => Ok(()),
            None => child.kill().map_err(kill_error),
        }
    }
}

/// Keyed store of background process handles.
#[derive(Debug)]
pub struct ProcessRegistry {
    buckets: Mutex<HashMap<String, Vec<ProcessRecord>>>,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }
}

impl ProcessRegistry {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            supervisors: Mutex::new(Vec::new()),
            poll_interval,
        }
    }

    /// Tracks a started child under `command` and waits on it in the background.
    /// Returns the child's pid.
    pub fn register(
        &self,
        command: &str,
        started_at: SystemTime,
        child: Child,
    ) -> Result<u32, RegistryError> {
        let pid = child.id();
        let child = Arc::new(Mutex::new(child));
        let exit = Arc::new(Mutex::new(None));

        let label = command.to_string();
        let poll_interval = self.poll_interval;
        let (watched, exit_slot) = (Arc::clone(&child), Arc::clone(&exit));
        let supervisor = match thread::Builder::new()
            .name(format!("runchain-wait-{pid}"))
            .spawn(move || supervise(&label, pid, &watched, &exit_slot, poll_interval))
        {
            Ok(supervisor) => supervisor,
            Err(source) => {
                // Nothing would ever reap the child, so it is not tracked at all.
                abandon(&child, command, pid);
                return Err(RegistryError::Supervisor {
                    command: command.to_string(),
                    source,
                });
            }
        };
        lock(&self.supervisors).push(supervisor);

        lock(&self.buckets)
            .entry(command.to_string())
            .or_default()
            .push(ProcessRecord {
                started_at,
                pid,
                child,
                exit,
            });
        log::info!("Async application added [{:?}] (PID: {}).", command, pid);
        Ok(pid)
    }

    /// Kills and forgets the processes started by `command`.
    ///
    /// A record is a candidate only if its start time lies inside *every* span;
    /// with no spans, every record is. Candidates that already exited are removed
    /// without a kill. The first failed kill aborts the call and leaves that record
    /// (and any not yet visited) in place. Returns how many records were removed.
    pub fn stop(&self, command: &str, spans: &[TimeSpan]) -> Result<usize, RegistryError> {
        let mut buckets = lock(&self.buckets);
        let bucket = buckets
            .get_mut(command)
            .ok_or_else(|| RegistryError::CommandNotTracked(command.to_string()))?;

        let mut kept = Vec::with_capacity(bucket.len());
        let mut removed = 0;
        let mut failure = None;
        for record in std::mem::take(bucket) {
            let candidate = spans.iter().all(|span| span.contains(record.started_at));
            if failure.is_some() || !candidate {
                kept.push(record);
                continue;
            }
            match record.terminate(command) {
                Ok(()) => {
                    removed += 1;
                    log::info!(
                        "Process [{:?}:{}] started at {:?} stopped.",
                        command,
                        record.pid,
                        record.started_at
                    );
                }
                Err(e) => {
                    failure = Some(e);
                    kept.push(record);
                }
            }
        }
        *bucket = kept;

        match failure {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }

    /// Tracked processes for `command`, ordered by start time.
    pub fn records(&self, command: &str) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = lock(&self.buckets)
            .get(command)
            .map(|bucket| bucket.iter().map(ProcessRecord::info).collect())
            .unwrap_or_default();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    /// Command texts with at least one tracked process.
    pub fn commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = lock(&self.buckets)
            .iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(command, _)| command.clone())
            .collect();
        commands.sort();
        commands
    }

    /// Blocks until every background process registered so far has exited.
    pub fn wait(&self) {
        let supervisors = std::mem::take(&mut *lock(&self.supervisors));
        for supervisor in supervisors {
            if supervisor.join().is_err() {
                log::warn!("A background supervisor thread panicked.");
            }
        }
    }
}

/// Kills and reaps a child that cannot be supervised.
fn abandon(child: &Mutex<Child>, command: &str, pid: u32) {
    let mut child = lock(child);
    if let Err(e) = child.kill() {
        log::warn!("Could not kill unsupervised command {:?} (PID: {}): {}", command, pid, e);
    }
    if let Err(e) = child.wait() {
        log::warn!("Could not reap unsupervised command {:?} (PID: {}): {}", command, pid, e);
    }
}

fn supervise(
    command: &str,
    pid: u32,
    child: &Mutex<Child>,
    exit: &Mutex<Option<ExitStatus>>,
    poll_interval: Duration,
) {
    loop {
        // The lock is released before sleeping so `stop` can reach the child.
        let polled = lock(child).try_wait();
        match polled {
            Ok(Some(status)) => {
                *lock(exit) = Some(status);
                if status.success() {
                    log::debug!("Background command {:?} (PID: {}) finished.", command, pid);
                } else {
                    log::warn!(
                        "Background command {:?} (PID: {}) exited with {}.",
                        command,
                        pid,
                        status
                    );
                }
                return;
            }
            Ok(None) => thread::sleep(poll_interval),
            Err(e) => {
                log::warn!("Lost track of background command {:?} (PID: {}): {}", command, pid, e);
                return;
            }
        }
    }
}
