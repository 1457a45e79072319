use std::path::PathBuf;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("playlist at {url} is empty")]
    EmptyPlaylist { url: String },

    #[error("no segments in {url}")]
    NoSegments { url: String },

    #[error("mux failed: {reason}")]
    Mux { reason: String },

    #[error(transparent)]
    Common(#[from] stream_common::CommonError),

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl FetchError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>, operation: &'static str) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn path_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::PathIo {
            path: path.into(),
            source,
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn mux(reason: impl Into<String>) -> Self {
        Self::Mux {
            reason: reason.into(),
        }
    }

    /// HTTP status of the failure, when there was a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(status.as_u16()),
            Self::Network { source } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 401, 403 and 429 are treated as the origin pushing back.
    pub fn is_blocking(&self) -> bool {
        matches!(self.status(), Some(401 | 403 | 429))
    }

    /// Errors that make one manifest candidate unusable.
    pub fn is_manifest_error(&self) -> bool {
        matches!(
            self,
            Self::Playlist { .. } | Self::EmptyPlaylist { .. } | Self::NoSegments { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_statuses() {
        for code in [401u16, 403, 429] {
            let err = FetchError::http_status(StatusCode::from_u16(code).unwrap(), "u", "segment");
            assert!(err.is_blocking(), "{code}");
        }
        let err = FetchError::http_status(StatusCode::BAD_REQUEST, "u", "segment");
        assert!(!err.is_blocking());
        assert_eq!(err.status(), Some(400));
        assert!(!FetchError::Cancelled.is_blocking());
        assert!(FetchError::NoSegments { url: "u".into() }.is_manifest_error());
    }
}
