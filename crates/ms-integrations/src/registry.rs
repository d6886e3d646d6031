//! Scheme -> tracker factory registry.
//!
//! Built explicitly at startup; there is no process-global registration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ms_core::tracker::{self, Tracker, TrackerError};
use thiserror::Error;

use crate::jira::JiraTracker;
use crate::mantisbt::MantisTracker;

/// Builds a tracker from its base URL (everything after `scheme:`).
pub type Factory = Box<dyn Fn(&str) -> tracker::Result<Arc<dyn Tracker>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tracker scheme {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("{0:?} has no scheme (expected scheme:baseURL)")]
    MissingScheme(String),
    #[error("unknown tracker scheme {scheme:?} (known: {known})")]
    UnknownScheme { scheme: String, known: String },
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

#[derive(Default)]
pub struct TrackerRegistry {
    factories: BTreeMap<String, Factory>,
}

impl fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("schemes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, scheme: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&str) -> tracker::Result<Arc<dyn Tracker>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(scheme) {
            return Err(RegistryError::AlreadyRegistered(scheme.to_string()));
        }
        self.factories.insert(scheme.to_string(), Box::new(factory));
        Ok(())
    }

    /// Construct the tracker named by `name` (`scheme:baseURL`).
    pub fn open(&self, name: &str) -> Result<Arc<dyn Tracker>, RegistryError> {
        let (scheme, url) = name
            .split_once(':')
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| RegistryError::MissingScheme(name.to_string()))?;
        let factory = self
            .factories
            .get(scheme)
            .ok_or_else(|| RegistryError::UnknownScheme {
                scheme: scheme.to_string(),
                known: self.schemes().join(", "),
            })?;
        Ok(factory(url)?)
    }

    pub fn schemes(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

fn open_jira(url: &str) -> tracker::Result<Arc<dyn Tracker>> {
    Ok(Arc::new(JiraTracker::new(url)?))
}

fn open_mantisbt(url: &str) -> tracker::Result<Arc<dyn Tracker>> {
    Ok(Arc::new(MantisTracker::new(url)?))
}

/// Registry with the built-in `jira` and `mantisbt` adapters.
pub fn default_registry() -> Result<TrackerRegistry, RegistryError> {
    let mut registry = TrackerRegistry::new();
    registry.register("jira", open_jira)?;
    registry.register("mantisbt", open_mantisbt)?;
    Ok(registry)
}
