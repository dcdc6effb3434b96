//! SF-015: Public operations — list and parse application definitions.
//!
//! `AppLibrary` holds only the definitions directory and evaluation limits,
//! so one instance can be shared across threads. Each call re-lists the
//! directory and evaluates from scratch; nothing is cached.

use super::catalog::Catalog;
use super::error::{EvaluationError, LookupError};
use super::extractor;
use super::resolver;
use super::settings::Settings;
use super::types::{ApplicationConfig, ApplicationDescriptor};
use crate::sandbox::{self, EvalOptions};
use std::path::{Path, PathBuf};

/// Entry point for callers (HTTP layer, CLI).
#[derive(Debug, Clone)]
pub struct AppLibrary {
    catalog: Catalog,
    options: EvalOptions,
}

impl AppLibrary {
    pub fn new(dir: impl Into<PathBuf>, options: EvalOptions) -> Self {
        Self {
            catalog: Catalog::new(dir),
            options,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.definitions_dir.clone(), settings.eval_options())
    }

    pub fn dir(&self) -> &Path {
        self.catalog.dir()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Canonical names of all definitions, sorted, without evaluating any.
    pub fn list_applications(&self) -> Vec<String> {
        self.catalog.list()
    }

    /// Resolve `raw_name`, evaluate its definition and extract the form schema.
    pub fn parse_application(&self, raw_name: &str) -> Result<ApplicationConfig, LookupError> {
        let descriptor = self.evaluate_application(raw_name)?;
        Ok(extractor::extract(&descriptor, &descriptor.params))
    }

    /// Resolve and evaluate without extracting.
    pub fn evaluate_application(&self, raw_name: &str) -> Result<ApplicationDescriptor, LookupError> {
        let Some(entry) = resolver::resolve(&self.catalog, raw_name) else {
            tracing::debug!(raw_len = raw_name.len(), "application not found");
            return Err(LookupError::NotFound);
        };

        sandbox::evaluate(&entry, &self.options).map_err(|err| {
            if err.is_missing_file() {
                tracing::debug!(app = %entry.name, "definition vanished before it was read");
                return LookupError::NotFound;
            }
            log_failure(&entry.name, &err);
            LookupError::Internal(err)
        })
    }
}

fn log_failure(name: &str, err: &EvaluationError) {
    tracing::error!(app = %name, path = %err.path().display(), error = %err, "cannot load application definition");
}
