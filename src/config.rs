use dotenvy::dotenv;
use envconfig::Envconfig;
use std::time::Duration;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "HOST", default = "127.0.0.1")]
    pub host: String,

    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,

    /// Global switch. When off every flag evaluates as absent and no refresh timer runs.
    #[envconfig(from = "GROWTHBOOK_ENABLED", default = "true")]
    pub enabled: bool,

    #[envconfig(from = "GROWTHBOOK_API_HOST", default = "https://cdn.growthbook.io")]
    pub api_host: String,

    #[envconfig(from = "GROWTHBOOK_CLIENT_KEY")]
    pub client_key: String,

    #[envconfig(from = "GROWTHBOOK_CACHE_ENABLED", default = "true")]
    pub cache_enabled: bool,

    #[envconfig(from = "GROWTHBOOK_CACHE_TTL_SECONDS", default = "60")]
    pub cache_ttl_seconds: u64,

    #[envconfig(from = "GROWTHBOOK_FETCH_TIMEOUT_SECONDS", default = "10")]
    pub fetch_timeout_seconds: u64,

    #[envconfig(from = "GROWTHBOOK_WEBHOOK_SECRET")]
    pub webhook_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, envconfig::Error> {
        let _ = dotenv().is_ok();

        Self::init_from_env()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn features_endpoint(&self) -> String {
        format!(
            "{}/api/features/{}",
            self.api_host.trim_end_matches('/'),
            self.client_key
        )
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }

    /// The refresh timer only runs when evaluation and caching are both on.
    pub fn refresh_timer_enabled(&self) -> bool {
        self.enabled && self.cache_enabled
    }

    /// A blank secret is treated the same as no secret. Anything else is used
    /// verbatim as the HMAC key.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}

#[cfg(test)]
pub(crate) fn test_config(api_host: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        enabled: true,
        api_host: api_host.to_string(),
        client_key: "sdk-test".to_string(),
        cache_enabled: true,
        cache_ttl_seconds: 60,
        fetch_timeout_seconds: 2,
        webhook_secret: None,
    }
}
