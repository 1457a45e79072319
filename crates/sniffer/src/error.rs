use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("discovery cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("browser launch failed: {reason}")]
    BrowserLaunch { reason: String },

    #[error("browser support is not compiled in (enable the `browser` feature)")]
    BrowserUnavailable,

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page operation failed: {reason}")]
    Page { reason: String },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("invalid rule document: {reason}")]
    InvalidRules { reason: String },

    #[error("rule file {path}: {source}")]
    RuleFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("HTTP {status} while fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error(transparent)]
    Common(#[from] stream_common::CommonError),

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl ProbeError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn browser_launch(reason: impl Into<String>) -> Self {
        Self::BrowserLaunch {
            reason: reason.into(),
        }
    }

    pub fn navigation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn page(reason: impl Into<String>) -> Self {
        Self::Page {
            reason: reason.into(),
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    pub fn invalid_rules(reason: impl Into<String>) -> Self {
        Self::InvalidRules {
            reason: reason.into(),
        }
    }

    /// Errors that end the whole discovery run rather than one attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::BrowserUnavailable)
    }
}
