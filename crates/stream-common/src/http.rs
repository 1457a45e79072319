use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::HeaderMap;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::debug;

use crate::CommonError;
use crate::proxy::{ProxySettings, build_proxy};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36";

/// Options for a single HTTP client instance.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// User agent sent with every request
    pub user_agent: String,

    /// Headers sent with every request
    pub headers: HeaderMap,

    /// Time allowed to establish the connection
    pub connect_timeout: Duration,

    /// Overall request timeout; `None` leaves it to per-request timeouts
    pub timeout: Option<Duration>,

    /// Whether to follow redirects (limited to 10 hops)
    pub follow_redirects: bool,

    /// Upstream proxy
    pub proxy: ProxySettings,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HeaderMap::new(),
            connect_timeout: Duration::from_secs(10),
            timeout: None,
            follow_redirects: true,
            proxy: ProxySettings::default(),
        }
    }
}

/// Create a reqwest client using rustls with the platform verifier.
///
/// No cookie store is attached; callers that need cookies send them as an
/// explicit header so state never leaks between clients.
pub fn create_client(options: &ClientOptions) -> Result<Client, CommonError> {
    let provider = Arc::new(aws_lc_rs::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_platform_verifier()?
        .with_no_client_auth();

    let mut builder = Client::builder()
        .user_agent(&options.user_agent)
        .default_headers(options.headers.clone())
        .use_preconfigured_tls(tls_config)
        .connect_timeout(options.connect_timeout)
        .redirect(if options.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    match build_proxy(&options.proxy)? {
        Some(proxy) => {
            debug!(server = ?options.proxy.server(), "Using configured proxy");
            builder = builder.proxy(proxy);
        }
        None => {
            builder = builder.no_proxy();
        }
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_default_client() {
        assert!(create_client(&ClientOptions::default()).is_ok());
    }

    #[test]
    fn builds_client_with_proxy() {
        let options = ClientOptions {
            proxy: ProxySettings {
                enabled: true,
                address: "127.0.0.1".into(),
                port: "8888".into(),
                username: "u".into(),
                password: "p".into(),
            },
            ..Default::default()
        };
        assert!(create_client(&options).is_ok());
    }
}
