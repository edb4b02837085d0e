use std::path::Path;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

pub const FLEET_AUDIENCE_NA: &str = "https://fleet-api.prd.na.vn.cloud.tesla.com/";
pub const FLEET_AUDIENCE_EU: &str = "https://fleet-api.prd.eu.vn.cloud.tesla.com/";

const DEFAULT_AUTH_BASE_URL: &str = "https://auth.tesla.com";
const DEFAULT_CLIENT_ID: &str = "ownerapi";
const DEFAULT_REDIRECT_URI: &str = "https://auth.tesla.com/void/callback";
const DEFAULT_STREAMING_URL: &str = "wss://streaming.vn.teslamotors.com/streaming/";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 1000;

/// Columns subscribed to when the caller does not pick any. The server
/// prepends a timestamp to every data update on its own.
pub const DEFAULT_STREAM_COLUMNS: [&str; 12] = [
    "speed",
    "odometer",
    "soc",
    "elevation",
    "est_heading",
    "est_lat",
    "est_lng",
    "power",
    "shift_state",
    "range",
    "est_range",
    "heading",
];

const CONFIG_FILE_PATH: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base: String,
    pub http_proxy: String,
    pub https_proxy: String,
    pub request_timeout_secs: u64,
    pub oauth: OAuthConfig,
    pub streaming: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: String,
    pub auth_base_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    pub columns: Vec<String>,
    pub drain_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base: format!("{FLEET_AUDIENCE_NA}api/1"),
            http_proxy: String::new(),
            https_proxy: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            oauth: OAuthConfig::default(),
            streaming: StreamConfig::default(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        OAuthConfig {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "offline_access".to_string(),
            ],
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            url: DEFAULT_STREAMING_URL.to_string(),
            columns: DEFAULT_STREAM_COLUMNS.iter().map(|c| c.to_string()).collect(),
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Defaults, overridden by `config.toml` in the working directory and
    /// then by environment variables.
    pub fn load() -> Self {
        Self::load_from(Path::new(CONFIG_FILE_PATH))
    }

    /// Like [`Config::load`] with an explicit file. A missing or malformed
    /// file leaves the defaults in place.
    pub fn load_from(path: &Path) -> Self {
        let mut config = Config::default();

        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<Config>(&content) {
                    Ok(file_config) => config = file_config,
                    Err(e) => warn!("Ignoring malformed {}: {e}", path.display()),
                },
                Err(e) => warn!("Failed to read {}: {e}", path.display()),
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_base) = lookup("FLEET_API_BASE") {
            self.api_base = api_base.trim_end_matches('/').to_string();
        }
        if let Some(auth_base) = lookup("FLEET_AUTH_BASE") {
            self.oauth.auth_base_url = auth_base.trim_end_matches('/').to_string();
        }
        if let Some(client_id) = lookup("FLEET_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }
        if let Some(redirect_uri) = lookup("FLEET_REDIRECT_URI") {
            self.oauth.redirect_uri = redirect_uri;
        }
        if let Some(streaming_url) = lookup("FLEET_STREAMING_URL") {
            self.streaming.url = streaming_url;
        }
        if let Some(http_proxy) = lookup("HTTP_PROXY") {
            self.http_proxy = http_proxy;
        }
        if let Some(https_proxy) = lookup("HTTPS_PROXY") {
            self.https_proxy = https_proxy;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl OAuthConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.auth_base_url.trim_end_matches('/'), path)
    }

    pub fn authorize_url(&self) -> String {
        self.endpoint("/oauth2/v3/authorize")
    }

    pub fn token_url(&self) -> String {
        self.endpoint("/oauth2/v3/token")
    }

    pub fn captcha_url(&self) -> String {
        self.endpoint("/captcha")
    }

    pub fn mfa_factors_url(&self) -> String {
        self.endpoint("/oauth2/v3/authorize/mfa/factors")
    }

    pub fn mfa_verify_url(&self) -> String {
        self.endpoint("/oauth2/v3/authorize/mfa/verify")
    }

    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

impl StreamConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_target_north_america() {
        let config = Config::default();
        assert_eq!(
            config.api_base,
            "https://fleet-api.prd.na.vn.cloud.tesla.com/api/1"
        );
        assert_eq!(config.streaming.columns.len(), 12);
        assert!(!config.streaming.columns.iter().any(|c| c == "timestamp"));
        assert_eq!(config.streaming.drain_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FLEET_API_BASE", "http://localhost:9000/api/1/"),
            ("FLEET_AUTH_BASE", "http://localhost:9001/"),
            ("FLEET_STREAMING_URL", "ws://localhost:9002/streaming/"),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_base, "http://localhost:9000/api/1");
        assert_eq!(
            config.oauth.token_url(),
            "http://localhost:9001/oauth2/v3/token"
        );
        assert_eq!(config.streaming.url, "ws://localhost:9002/streaming/");
        assert_eq!(config.oauth.client_id, "ownerapi");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_base = "https://fleet-api.prd.eu.vn.cloud.tesla.com/api/1"

            [streaming]
            columns = ["speed", "soc"]
            "#,
        )
        .expect("parse");
        assert_eq!(config.streaming.columns, vec!["speed", "soc"]);
        assert_eq!(config.streaming.url, DEFAULT_STREAMING_URL);
        assert_eq!(config.oauth.scope(), "openid email offline_access");
    }

    #[test]
    fn file_values_are_loaded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "request_timeout_secs = 5\n[oauth]\nclient_id = \"fleet-cli\"\n",
        )
        .expect("write");

        let config = Config::load_from(&path);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.oauth.client_id, "fleet-cli");
        assert_eq!(config.oauth.redirect_uri, DEFAULT_REDIRECT_URI);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "request_timeout_secs = \"soon\"").expect("write");

        let config = Config::load_from(&path);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }
}
