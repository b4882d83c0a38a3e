// src/core/env.rs

//! Layered environment maps with `$NAME` / `${NAME}` expansion.
//!
//! An [`EnvMap`] is the store every action node draws its child environment from.
//! Assignments are expanded once, in order, before they are stored:
//!
//! 1. the batch being built (assignments earlier in the same call),
//! 2. each fallback map, closest scope first,
//! 3. the real OS environment, only when `inherit_external` is enabled.
//!
//! Anything still unresolved expands to the empty string. Expansion is single-pass:
//! a referenced value is substituted as already stored and never re-scanned.
//! A reference to a key assigned *later* in the same batch is not supported; it
//! resolves against the fallbacks (or to nothing) rather than the later value.

use crate::constants::PATH_LIST_PLACEHOLDER;
use std::collections::HashMap;
use std::collections::hash_map;
use std::env;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvError {
    #[error("Cannot promote '{0}': it is not included in the current environment map.")]
    UndefinedKey(String),
    #[error("Cannot promote '{0}': not a valid OS environment variable name or value.")]
    InvalidVariable(String),
}

/// Resolves references for one batch of assignments.
#[derive(Debug, Clone, Copy)]
pub struct Expander<'a> {
    fallbacks: &'a [&'a EnvMap],
    inherit_external: bool,
}

impl<'a> Expander<'a> {
    pub fn new(fallbacks: &'a [&'a EnvMap], inherit_external: bool) -> Self {
        Self {
            fallbacks,
            inherit_external,
        }
    }

    /// Expands every `$NAME` and `${NAME}` in `text`, consulting `batch` first.
    pub fn expand(&self, batch: &EnvMap, text: &str) -> String {
        shellexpand::env_with_context_no_errors(text, |name: &str| Some(self.lookup(batch, name)))
            .into_owned()
    }

    fn lookup(&self, batch: &EnvMap, name: &str) -> String {
        if let Some(value) = batch.get(name) {
            return value.to_string();
        }
        for fallback in self.fallbacks {
            if let Some(value) = fallback.get(name) {
                return value.to_string();
            }
        }
        if self.inherit_external {
            if let Ok(value) = env::var(name) {
                return value;
            }
        }
        String::new()
    }
}

/// Mapping of variable name to value. Iteration order is unspecified;
/// [`EnvMap::list`] is sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap {
    vars: HashMap<String, String>,
}

impl EnvMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the inherited OS environment. Values are taken verbatim.
    pub fn from_os() -> Self {
        os_vars().collect()
    }

    /// Parses `KEY=VALUE` (or bare `KEY`) assignments into a new map.
    ///
    /// Each assignment is expanded as a whole before it is split at its first `=`,
    /// so a quoted value keeps its quotes and any `=` it contains.
    pub fn parse<S: AsRef<str>>(
        assignments: &[S],
        inherit_external: bool,
        fallbacks: &[&EnvMap],
    ) -> Self {
        let expander = Expander::new(fallbacks, inherit_external);
        let mut batch = Self::new();
        for assignment in assignments {
            let expanded = expander.expand(&batch, assignment.as_ref());
            let (key, value) = match expanded.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (expanded, String::new()),
            };
            if key.is_empty() {
                log::debug!("Ignoring assignment without a key: {:?}", assignment.as_ref());
                continue;
            }
            batch.vars.insert(key, value);
        }
        batch
    }

    /// Applies assignments in place, expanding against this map.
    pub fn set<S: AsRef<str>>(&mut self, assignments: &[S]) {
        let parsed = Self::parse(assignments, false, &[self]);
        self.vars.extend(parsed.vars);
    }

    /// Returns a new map: the expanded assignments, backfilled with every key of
    /// `self` they do not already define.
    pub fn combine<S: AsRef<str>>(&self, assignments: &[S]) -> Self {
        self.combine_with(assignments, false)
    }

    /// [`EnvMap::combine`] with control over falling back to the OS environment.
    pub fn combine_with<S: AsRef<str>>(&self, assignments: &[S], inherit_external: bool) -> Self {
        let mut combined = Self::parse(assignments, inherit_external, &[self]);
        for (key, value) in &self.vars {
            combined
                .vars
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        combined
    }

    /// Adds each pair whose key is not yet present. Values are not expanded.
    pub fn backfill<I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in pairs {
            self.vars.entry(key).or_insert(value);
        }
    }

    /// Expands `text` against this map only.
    pub fn expand(&self, text: &str) -> String {
        Expander::new(&[self], false).expand(&Self::new(), text)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, String> {
        self.vars.iter()
    }

    /// Key/value pairs ready for a child process, sorted by key, with the
    /// path list placeholder rewritten to the platform separator.
    pub fn materialize(&self) -> Vec<(String, String)> {
        let separator = path_list_separator();
        let mut pairs: Vec<(String, String)> = self
            .vars
            .iter()
            .map(|(key, value)| {
                let value = if value.contains(PATH_LIST_PLACEHOLDER) {
                    value.replace(PATH_LIST_PLACEHOLDER, separator)
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect();
        pairs.sort();
        pairs
    }

    /// One value as a child process would see it.
    pub fn materialized(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|value| value.replace(PATH_LIST_PLACEHOLDER, path_list_separator()))
    }

    /// OS-friendly `KEY=VALUE` list. See [`EnvMap::materialize`].
    pub fn list(&self) -> Vec<String> {
        self.materialize()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }

    /// Copies one key into the real OS environment of this process.
    ///
    /// Mutating the process environment races with any other thread reading it;
    /// promote before spawning threads that inspect the environment.
    #[allow(unsafe_code)]
    pub fn promote(&self, key: &str) -> Result<(), EnvError> {
        let value = self
            .vars
            .get(key)
            .ok_or_else(|| EnvError::UndefinedKey(key.to_string()))?;
        if key.is_empty() || key.contains(['=', '\0']) || value.contains('\0') {
            return Err(EnvError::InvalidVariable(key.to_string()));
        }
        // SAFETY: key and value were validated above; concurrent access to the
        // process environment is the caller's responsibility (see doc comment).
        unsafe { env::set_var(key, value) };
        log::debug!("Promoted '{}' to the process environment.", key);
        Ok(())
    }
}

impl FromIterator<(String, String)> for EnvMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for EnvMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.list().join(", "))
    }
}

/// The OS environment as UTF-8 pairs. Entries whose key or value is not valid
/// UTF-8 are skipped.
pub fn os_vars() -> impl Iterator<Item = (String, String)> {
    env::vars_os().filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
        (Ok(key), Ok(value)) => Some((key, value)),
        (key, _) => {
            log::debug!("Skipping non UTF-8 environment variable {:?}.", key);
            None
        }
    })
}

fn path_list_separator() -> &'static str {
    if cfg!(windows) { ";" } else { ":" }
}
