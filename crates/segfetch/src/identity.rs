//! Request identities rotated across retry rounds.
//!
//! An identity is a user agent plus referrer, expanded into a full browser
//! header set. The pool is built once per download and never regenerated
//! mid-round, so every request of one round looks the same.

use std::collections::HashSet;

use rand::RngExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

const USER_AGENTS: [&str; 10] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:141.0) Gecko/20100101 Firefox/141.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:140.0) Gecko/20100101 Firefox/140.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36 OPR/121.0.0.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Mobile Safari/537.36",
];

pub const EXAMPLE_REFERERS: [&str; 3] = [
    "https://www.baidu.com",
    "https://github.com/",
    "https://www.example.com",
];

pub const DEFAULT_POOL_SIZE: usize = 4;
const GENERATION_ATTEMPTS: usize = 32;

/// What discovery learned about the client the page expects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadHints {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    /// Preformatted `Cookie` header value
    pub cookie_header: Option<String>,
}

impl DownloadHints {
    pub fn is_empty(&self) -> bool {
        self.user_agent.is_none() && self.referer.is_none() && self.cookie_header.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub referer: Option<String>,
    pub cookie_header: Option<String>,
}

impl Identity {
    pub fn new(user_agent: impl Into<String>, referer: Option<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            referer,
            cookie_header: None,
        }
    }

    /// Headers for this identity, user agent included.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("accept".to_string(), "*/*".to_string()),
            ("accept-language".to_string(), "zh-CN,zh;q=0.9".to_string()),
            ("user-agent".to_string(), self.user_agent.clone()),
        ];
        if let Some(referer) = &self.referer {
            pairs.push(("referer".to_string(), referer.clone()));
        }
        pairs.extend(client_hints(&self.user_agent));
        if let Some(cookie) = &self.cookie_header {
            pairs.push(("cookie".to_string(), cookie.clone()));
        }
        pairs
    }

    /// The header set without the user agent, which clients set separately.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in self.header_pairs() {
            if name == "user-agent" {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => debug!(header = %name, "skipping invalid header"),
            }
        }
        map
    }
}

/// `sec-ch-ua` style hints consistent with a user agent.
pub fn client_hints(user_agent: &str) -> Vec<(String, String)> {
    let version_after = |marker: &str| {
        user_agent
            .split(marker)
            .nth(1)
            .and_then(|rest| rest.split([' ', ')']).next())
            .unwrap_or("0")
            .to_string()
    };

    let (browser, version) = if user_agent.contains("Edg/") {
        ("Microsoft Edge", version_after("Edg/"))
    } else if user_agent.contains("OPR/") {
        ("Opera", version_after("OPR/"))
    } else if user_agent.contains("Chromium/") {
        ("Chromium", version_after("Chromium/"))
    } else if user_agent.contains("Chrome/") {
        ("Google Chrome", version_after("Chrome/"))
    } else if user_agent.contains("Firefox/") {
        ("Firefox", version_after("Firefox/"))
    } else if user_agent.contains("Safari") && user_agent.contains("Version/") {
        ("Safari", version_after("Version/"))
    } else {
        ("Unknown", "0".to_string())
    };
    let major = version.split('.').next().unwrap_or("0");

    let platform = if user_agent.contains("Windows NT") {
        "Windows"
    } else if user_agent.contains("Android") {
        "Android"
    } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        "iOS"
    } else if user_agent.contains("Macintosh") || user_agent.contains("Mac OS X") {
        "macOS"
    } else if user_agent.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    };

    vec![
        (
            "sec-ch-ua".to_string(),
            format!(r#""{browser}";v="{major}", "Not_A Brand";v="99""#),
        ),
        (
            "sec-ch-ua-mobile".to_string(),
            if user_agent.contains("Mobile") { "?1" } else { "?0" }.to_string(),
        ),
        ("sec-ch-ua-platform".to_string(), format!(r#""{platform}""#)),
        ("sec-fetch-dest".to_string(), "empty".to_string()),
        ("sec-fetch-mode".to_string(), "cors".to_string()),
        ("sec-fetch-site".to_string(), "cross-site".to_string()),
    ]
}

/// A random identity. `referers` empty means no referrer header.
pub fn random_identity(referers: &[String]) -> Identity {
    let mut rng = rand::rng();
    let user_agent = USER_AGENTS[rng.random_range(0..USER_AGENTS.len())];
    let referer = if referers.is_empty() {
        None
    } else {
        Some(referers[rng.random_range(0..referers.len())].clone())
    };
    Identity::new(user_agent, referer)
}

#[derive(Debug, Clone)]
pub struct IdentityPool {
    identities: Vec<Identity>,
    active: usize,
}

impl IdentityPool {
    /// Build up to `size` distinct identities.
    ///
    /// A hinted user agent becomes the first identity; a hinted referrer and
    /// cookie header are carried by every identity.
    pub fn build(size: usize, hints: &DownloadHints) -> Self {
        let size = size.max(1);
        let referers: Vec<String> = match &hints.referer {
            Some(referer) => vec![referer.clone()],
            None => EXAMPLE_REFERERS.iter().map(|r| r.to_string()).collect(),
        };

        let mut identities = Vec::with_capacity(size);
        let mut seen = HashSet::new();
        if let Some(user_agent) = hints.user_agent.as_deref().filter(|ua| !ua.trim().is_empty()) {
            let identity = Identity::new(user_agent, hints.referer.clone());
            seen.insert((identity.user_agent.clone(), identity.referer.clone()));
            identities.push(identity);
        }

        let mut attempts = 0;
        while identities.len() < size && attempts < GENERATION_ATTEMPTS {
            attempts += 1;
            let identity = random_identity(&referers);
            if seen.insert((identity.user_agent.clone(), identity.referer.clone())) {
                identities.push(identity);
            }
        }
        if identities.is_empty() {
            identities.push(random_identity(&referers));
        }

        for identity in &mut identities {
            identity.cookie_header = hints.cookie_header.clone();
        }
        Self {
            identities,
            active: 0,
        }
    }

    pub fn from_identities(identities: Vec<Identity>) -> Self {
        let identities = if identities.is_empty() {
            vec![random_identity(&[])]
        } else {
            identities
        };
        Self {
            identities,
            active: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Select the identity for retry round `attempt`.
    pub fn advance(&mut self, attempt: usize) -> &Identity {
        self.active = attempt % self.identities.len();
        &self.identities[self.active]
    }

    pub fn active(&self) -> &Identity {
        &self.identities[self.active]
    }

    pub fn active_index(&self) -> usize {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_hints_follow_user_agent() {
        let hints = client_hints(USER_AGENTS[0]);
        assert!(hints.contains(&(
            "sec-ch-ua".to_string(),
            r#""Google Chrome";v="139", "Not_A Brand";v="99""#.to_string()
        )));
        assert!(hints.contains(&("sec-ch-ua-platform".to_string(), r#""Windows""#.to_string())));

        let mobile = client_hints(USER_AGENTS[8]);
        assert!(mobile.contains(&("sec-ch-ua-mobile".to_string(), "?1".to_string())));
        assert!(mobile.contains(&("sec-ch-ua-platform".to_string(), r#""iOS""#.to_string())));
    }

    #[test]
    fn hinted_identity_comes_first_and_hints_apply_everywhere() {
        let hints = DownloadHints {
            user_agent: Some("hinted-agent".into()),
            referer: Some("https://v.example/watch/1".into()),
            cookie_header: Some("sid=1".into()),
        };
        let pool = IdentityPool::build(4, &hints);
        assert_eq!(pool.active().user_agent, "hinted-agent");
        assert!(pool.len() >= 2);
        let mut seen = HashSet::new();
        for i in 0..pool.len() {
            let mut pool = pool.clone();
            let identity = pool.advance(i).clone();
            assert_eq!(identity.referer.as_deref(), Some("https://v.example/watch/1"));
            assert_eq!(identity.cookie_header.as_deref(), Some("sid=1"));
            assert!(seen.insert(identity.user_agent));
        }
    }

    #[test]
    fn rotation_is_attempt_modulo_size() {
        let mut pool = IdentityPool::from_identities(vec![
            Identity::new("a", None),
            Identity::new("b", None),
            Identity::new("c", None),
        ]);
        assert_eq!(pool.advance(1).user_agent, "b");
        assert_eq!(pool.advance(5).user_agent, "c");
        assert_eq!(pool.advance(6).user_agent, "a");
        assert_eq!(pool.active_index(), 0);
    }

    #[test]
    fn header_map_excludes_user_agent() {
        let mut identity = Identity::new("ua", Some("https://r.example/".into()));
        identity.cookie_header = Some("a=b".into());
        let map = identity.header_map();
        assert!(map.get("user-agent").is_none());
        assert_eq!(map.get("referer").unwrap(), "https://r.example/");
        assert_eq!(map.get("cookie").unwrap(), "a=b");
    }
}
