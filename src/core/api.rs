//! SF-016: Response envelopes for an HTTP front end.
//!
//! Transport-neutral: callers serialize these with `serde_json` and use
//! [`ErrorResponse::status`] as the HTTP status code.

use super::error::LookupError;
use super::library::AppLibrary;
use super::types::ApplicationConfig;
use serde::{Deserialize, Serialize};

/// One row of the application index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub name: String,
}

/// Body of the index endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIndex {
    pub applications: Vec<ApplicationSummary>,
    pub total_count: usize,
}

/// Body of a successful show request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationEnvelope {
    pub application: ApplicationConfig,
}

/// Error body plus the status code to send it with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: u16,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl ErrorResponse {
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL: u16 = 500;

    pub fn not_found(app_name: &str) -> Self {
        Self {
            status: Self::NOT_FOUND,
            error: "Application not found".to_string(),
            app_name: Some(app_name.to_string()),
        }
    }

    /// Generic 500; carries no detail about the failure.
    pub fn internal() -> Self {
        Self {
            status: Self::INTERNAL,
            error: "Internal server error".to_string(),
            app_name: None,
        }
    }

    pub fn from_lookup(err: &LookupError, app_name: &str) -> Self {
        match err {
            LookupError::NotFound => Self::not_found(app_name),
            LookupError::Internal(_) => Self::internal(),
        }
    }
}

/// List all applications.
pub fn index(library: &AppLibrary) -> ApplicationIndex {
    let applications: Vec<ApplicationSummary> = library
        .list_applications()
        .into_iter()
        .map(|name| ApplicationSummary { name })
        .collect();
    ApplicationIndex {
        total_count: applications.len(),
        applications,
    }
}

/// Config for one application, or the error body to return.
pub fn show(library: &AppLibrary, app_name: &str) -> Result<ApplicationEnvelope, ErrorResponse> {
    library
        .parse_application(app_name)
        .map(|application| ApplicationEnvelope { application })
        .map_err(|e| ErrorResponse::from_lookup(&e, app_name))
}
