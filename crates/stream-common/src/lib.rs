//! Plumbing shared by the discovery and download engines: proxy settings,
//! the cooperative stop signal and the rustls-backed HTTP client builder.

pub mod error;
pub mod http;
pub mod proxy;
pub mod stop;

pub use error::CommonError;
pub use http::{ClientOptions, DEFAULT_USER_AGENT, create_client};
pub use proxy::ProxySettings;
pub use stop::StopSignal;
