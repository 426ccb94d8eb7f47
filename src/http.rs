//! Shared HTTP transport used by the channel crawler.
use crate::config::HttpSettings;
use crate::error::Result;
use log::{debug, warn};
use std::sync::OnceLock;
use std::time::Duration;

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn build_client(settings: &HttpSettings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .user_agent(settings.user_agent.clone())
        .gzip(true);

    if let Some(proxy) = &settings.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }

    Ok(builder.build()?)
}

/// Build the process-wide client. Only the first call has any effect.
///
/// A client that cannot be built with the configured proxy falls back to a
/// direct client so startup never stops here.
pub fn init_http_client(settings: &HttpSettings) {
    if HTTP_CLIENT.get().is_some() {
        debug!("HTTP client already initialised");
        return;
    }

    let client = match build_client(settings) {
        Ok(client) => client,
        Err(e) => {
            warn!("Falling back to a direct HTTP client: {e}");
            reqwest::Client::new()
        }
    };
    let _ = HTTP_CLIENT.set(client);
}

pub fn http_client() -> reqwest::Client {
    HTTP_CLIENT.get_or_init(reqwest::Client::new).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_proxy_is_rejected_by_builder() {
        let settings = HttpSettings {
            proxy: Some("http://[::1".to_string()),
            ..HttpSettings::default()
        };
        assert!(build_client(&settings).is_err());
    }

    #[test]
    fn test_init_is_idempotent() {
        init_http_client(&HttpSettings::default());
        init_http_client(&HttpSettings::default());
        let _client = http_client();
    }
}
