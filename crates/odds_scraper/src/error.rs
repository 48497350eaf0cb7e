use std::time::Duration;

use thiserror::Error;

use crate::model::Target;

/// Session and network layer failures. All of them are retried by the fetcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("browser session failed to start: {0}")]
    SessionStart(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page renderer crashed: {0}")]
    PageCrash(String),

    #[error("element `{selector}` did not render within {timeout:?}")]
    ElementNotFound { selector: String, timeout: Duration },
}

/// Terminal fetch failure once the retry budget is spent.
#[derive(Debug, Error)]
#[error("fetching {target} failed after {attempts} attempt(s): {last_error}")]
pub struct FetchFailedError {
    pub target: Target,
    pub attempts: u32,
    #[source]
    pub last_error: SessionError,
}

/// The page rendered, but its odds markup does not match the extraction rules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unexpected odds layout on {target_id}: {reason}")]
pub struct ExtractionSchemaError {
    pub target_id: String,
    pub reason: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct InvalidConfigurationError(pub String);
