use std::{collections::HashMap, time::Duration};

use serde::Deserialize;

use crate::auth::EmailAllowList;
use crate::device::DeviceEndpoint;

pub const DEFAULT_SECRET_KEY: &str = "my-secret-key-for-development";
pub const GOOGLE_DISCOVERY_URL: &str =
    "https://accounts.google.com/.well-known/openid-configuration";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    #[serde(default = "default_true")]
    pub debug: bool,
    #[serde(default)]
    pub google_client_id: Option<String>,
    #[serde(default)]
    pub google_client_secret: Option<String>,
    #[serde(default = "default_discovery_url")]
    pub google_discovery_url: String,
    #[serde(default = "default_tv_ip")]
    pub android_tv_ip: String,
    #[serde(default = "default_tv_port")]
    pub android_tv_port: u16,
    #[serde(default = "default_adb_server_addr")]
    pub adb_server_addr: String,
    #[serde(default = "default_broker_timeout_ms")]
    pub broker_timeout_ms: u64,
    #[serde(default)]
    pub allowed_emails: Option<String>,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_device_idle_ttl_secs")]
    pub device_idle_ttl_secs: u64,
    #[serde(default)]
    pub rust_log: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            bind_addr: default_bind_addr(),
            public_base_url: default_public_base_url(),
            secret_key: default_secret_key(),
            debug: default_true(),
            google_client_id: None,
            google_client_secret: None,
            google_discovery_url: default_discovery_url(),
            android_tv_ip: default_tv_ip(),
            android_tv_port: default_tv_port(),
            adb_server_addr: default_adb_server_addr(),
            broker_timeout_ms: default_broker_timeout_ms(),
            allowed_emails: None,
            session_ttl_secs: default_session_ttl_secs(),
            device_idle_ttl_secs: default_device_idle_ttl_secs(),
            rust_log: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default().separator("__"))
    }

    /// Same as [`AppConfig::from_env`] but reads the given variables instead of the process env.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, config::ConfigError> {
        Self::from_environment(
            config::Environment::default()
                .separator("__")
                .source(Some(vars)),
        )
    }

    fn from_environment(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map(AppConfig::normalize)
    }

    fn normalize(mut self) -> Self {
        self.google_client_id = Self::normalize_opt(self.google_client_id.take());
        self.google_client_secret = Self::normalize_opt(self.google_client_secret.take());
        self.allowed_emails = Self::normalize_opt(self.allowed_emails.take());
        self.rust_log = Self::normalize_opt(self.rust_log.take());
        self.public_base_url = self.public_base_url.trim().trim_end_matches('/').to_string();
        self.android_tv_ip = self.android_tv_ip.trim().to_string();
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn device_endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint::new(self.android_tv_ip.clone(), self.android_tv_port)
    }

    pub fn allow_list(&self) -> EmailAllowList {
        EmailAllowList::parse(self.allowed_emails.as_deref().unwrap_or_default())
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.public_base_url)
    }

    pub fn secure_cookies(&self) -> bool {
        self.public_base_url.starts_with("https://")
    }

    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_SECRET_KEY
    }

    pub fn log_filter(&self) -> String {
        match &self.rust_log {
            Some(filter) => filter.clone(),
            None if self.debug => "info,tv_remote=debug,adb_broker=debug".into(),
            None => "info".into(),
        }
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_millis(self.broker_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// `None` disables idle eviction of device sessions.
    pub fn device_idle_ttl(&self) -> Option<Duration> {
        (self.device_idle_ttl_secs > 0).then(|| Duration::from_secs(self.device_idle_ttl_secs))
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_secret_key() -> String {
    DEFAULT_SECRET_KEY.to_string()
}

fn default_true() -> bool {
    true
}

fn default_discovery_url() -> String {
    GOOGLE_DISCOVERY_URL.to_string()
}

fn default_tv_ip() -> String {
    "192.168.1.100".to_string()
}

fn default_tv_port() -> u16 {
    5555
}

fn default_adb_server_addr() -> String {
    adb_broker::DEFAULT_BROKER_ADDR.to_string()
}

fn default_broker_timeout_ms() -> u64 {
    10_000
}

fn default_session_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_device_idle_ttl_secs() -> u64 {
    30 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = AppConfig::from_vars(HashMap::new()).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:5000");
        assert_eq!(cfg.device_endpoint().to_string(), "192.168.1.100:5555");
        assert_eq!(cfg.adb_server_addr, "127.0.0.1:5037");
        assert!(cfg.debug);
        assert!(cfg.uses_default_secret());
        assert!(cfg.allow_list().is_empty());
        assert_eq!(cfg.device_idle_ttl(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn reads_device_and_allow_list() {
        let cfg = AppConfig::from_vars(vars(&[
            ("ANDROID_TV_IP", " 10.0.0.20 "),
            ("ANDROID_TV_PORT", "5556"),
            ("ALLOWED_EMAILS", "alice@example.com, Bob@Example.com"),
            ("DEBUG", "false"),
            ("DEVICE_IDLE_TTL_SECS", "0"),
            ("PUBLIC_BASE_URL", "https://tv.example.com/"),
            ("GOOGLE_CLIENT_ID", "  "),
        ]))
        .unwrap();
        assert_eq!(cfg.device_endpoint().to_string(), "10.0.0.20:5556");
        assert!(cfg.allow_list().is_allowed("bob@example.com"));
        assert!(!cfg.debug);
        assert_eq!(cfg.log_filter(), "info");
        assert_eq!(cfg.device_idle_ttl(), None);
        assert_eq!(cfg.redirect_uri(), "https://tv.example.com/auth/callback");
        assert!(cfg.secure_cookies());
        assert!(cfg.google_client_id.is_none());
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(AppConfig::from_vars(vars(&[("ANDROID_TV_PORT", "tv")])).is_err());
    }
}
