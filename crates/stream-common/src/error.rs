#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("TLS configuration error: {source}")]
    Tls {
        #[from]
        source: rustls::Error,
    },

    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        #[from]
        source: reqwest::Error,
    },
}

impl CommonError {
    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }
}
