//! Plain HTTP probe used when the browser found nothing.
//!
//! Fetches the target page and a bounded number of its `<script src>`
//! resources and runs the same text heuristics over them.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use stream_common::{ClientOptions, ProxySettings, StopSignal, create_client};
use tracing::{debug, info, warn};

use crate::candidates::CandidateStore;
use crate::error::ProbeError;
use crate::extract::{candidate_urls, script_sources};

pub const SCRIPT_PROBE_LIMIT: usize = 10;

const PAGE_CONNECT_TIMEOUT: Duration = Duration::from_secs(8);
const PAGE_READ_TIMEOUT: Duration = Duration::from_secs(12);
const SCRIPT_READ_TIMEOUT: Duration = Duration::from_secs(10);

pub struct FallbackProbe {
    client: Client,
}

impl FallbackProbe {
    /// `headers` is the monitor header set; the user agent entry becomes the
    /// client's user agent.
    pub fn new(headers: &[(String, String)], proxy: &ProxySettings) -> Result<Self, ProbeError> {
        let mut header_map = HeaderMap::new();
        let mut user_agent = None;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("user-agent") {
                user_agent = Some(value.clone());
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    header_map.insert(name, value);
                }
                _ => debug!(header = %name, "skipping invalid header"),
            }
        }

        let mut options = ClientOptions {
            headers: header_map,
            connect_timeout: PAGE_CONNECT_TIMEOUT,
            proxy: proxy.clone(),
            ..ClientOptions::default()
        };
        if let Some(user_agent) = user_agent {
            options.user_agent = user_agent;
        }
        Ok(Self {
            client: create_client(&options)?,
        })
    }

    /// Probe `target_url`, feeding what it finds into `store`. Returns the
    /// number of new manifest URLs.
    pub async fn run(
        &self,
        store: &CandidateStore,
        target_url: &str,
        stop: &StopSignal,
    ) -> Result<usize, ProbeError> {
        info!(url = %target_url, "HTTP fallback probe started");
        let body = self.fetch(target_url, target_url, PAGE_READ_TIMEOUT).await?;

        let mut found = store.add_found(candidate_urls(&body, target_url), Some(target_url), true);

        for script_url in script_sources(&body, target_url)
            .into_iter()
            .take(SCRIPT_PROBE_LIMIT)
        {
            if stop.is_stopped() {
                return Err(ProbeError::Cancelled);
            }
            let script = match self.fetch(&script_url, target_url, SCRIPT_READ_TIMEOUT).await {
                Ok(script) => script,
                Err(e) => {
                    debug!(script = %script_url, error = %e, "script fetch failed");
                    continue;
                }
            };
            found += store.add_found(
                candidate_urls(&script, &script_url),
                Some(&script_url),
                true,
            );
        }

        info!(found, "HTTP fallback probe done");
        Ok(found)
    }

    async fn fetch(&self, url: &str, referer: &str, timeout: Duration) -> Result<String, ProbeError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, referer)
            .timeout(timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Run the fallback probe, logging instead of failing.
pub async fn probe_quietly(
    store: &CandidateStore,
    target_url: &str,
    headers: &[(String, String)],
    proxy: &ProxySettings,
    stop: &StopSignal,
) -> usize {
    let probe = match FallbackProbe::new(headers, proxy) {
        Ok(probe) => probe,
        Err(e) => {
            warn!(error = %e, "HTTP fallback probe unavailable");
            return 0;
        }
    };
    match probe.run(store, target_url, stop).await {
        Ok(found) => found,
        Err(e) => {
            warn!(url = %target_url, error = %e, "HTTP fallback probe failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::HeaderMap as AxumHeaders;
    use axum::routing::get;

    use super::*;
    use crate::session::monitor_headers;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn finds_manifests_in_page_and_scripts() {
        let router = Router::new()
            .route(
                "/watch/1",
                get(|| async {
                    r#"<html><script src="/static/player.js"></script>
                    <script>var player_x = {"encrypt":0,"url":"/hls/main/index.m3u8"};</script>
                    <a href="/watch/2">next</a></html>"#
                }),
            )
            .route(
                "/static/player.js",
                get(|headers: AxumHeaders| async move {
                    let referer = headers
                        .get("referer")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if referer.ends_with("/watch/1") {
                        r#"load("https://cdn.example/live/stream.m3u8?token=1")"#.to_string()
                    } else {
                        String::new()
                    }
                }),
            );
        let base = serve(router).await;
        let target = format!("{base}/watch/1");
        let store = CandidateStore::new(target.clone());

        let found = probe_quietly(
            &store,
            &target,
            &monitor_headers(&target, "probe-test"),
            &ProxySettings::default(),
            &StopSignal::new(),
        )
        .await;

        assert_eq!(found, 2);
        let manifests = store.ranked_manifests();
        assert!(manifests.contains(&format!("{base}/hls/main/index.m3u8")));
        assert!(manifests.contains(&"https://cdn.example/live/stream.m3u8?token=1".to_string()));
    }

    #[tokio::test]
    async fn http_errors_are_not_fatal() {
        let base = serve(Router::new()).await;
        let target = format!("{base}/missing");
        let store = CandidateStore::new(target.clone());
        let found = probe_quietly(
            &store,
            &target,
            &[],
            &ProxySettings::default(),
            &StopSignal::new(),
        )
        .await;
        assert_eq!(found, 0);
        assert_eq!(store.manifest_count(), 0);
    }
}
