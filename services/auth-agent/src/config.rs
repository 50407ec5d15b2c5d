//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `OIDC_ISSUER` and `OIDC_CLIENT_ID` override the `[provider]` section so
//! the same file can serve several realms.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use session::AuthConfig;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub flow: FlowConfig,
    pub backend: BackendConfig,
}

/// Identity provider client registration
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    /// Realm base URL, e.g. `https://id.example.com/realms/market`
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub client_id: String,
    /// Defaults to the loopback callback of this agent
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Sign-up page when the provider does not follow Keycloak's layout
    #[serde(default)]
    pub registration_page: Option<String>,
}

/// Loopback HTTP listener for deep links and UI actions
#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Token storage settings
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    /// Keyring service name
    #[serde(default = "default_service")]
    pub service: String,
    /// File used when no keyring is available
    #[serde(default = "default_fallback_path")]
    pub fallback_path: PathBuf,
}

/// Flow bounds
#[derive(Debug, Deserialize)]
pub struct FlowConfig {
    #[serde(default = "default_request_ready_timeout")]
    pub request_ready_timeout_secs: u64,
    /// Unset waits for the user indefinitely
    #[serde(default)]
    pub redirect_timeout_secs: Option<u64>,
    /// Per-request bound on provider and backend calls
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

/// Marketplace backend collaborator
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_profile_path")]
    pub profile_path: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7890))
}

fn default_callback_path() -> String {
    "/callback".into()
}

fn default_max_connections() -> usize {
    64
}

fn default_service() -> String {
    oidc_auth::constants::KEYRING_SERVICE.into()
}

fn default_fallback_path() -> PathBuf {
    PathBuf::from("auth-agent-tokens.json")
}

fn default_request_ready_timeout() -> u64 {
    oidc_auth::constants::REQUEST_READY_TIMEOUT.as_secs()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_profile_path() -> String {
    "/api/users".into()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            callback_path: default_callback_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            service: default_service(),
            fallback_path: default_fallback_path(),
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            request_ready_timeout_secs: default_request_ready_timeout(),
            redirect_timeout_secs: None,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn require_http(name: &str, value: &str) -> common::Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {value:?}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(issuer) = std::env::var("OIDC_ISSUER") {
            config.provider.issuer = issuer;
        }
        if let Ok(client_id) = std::env::var("OIDC_CLIENT_ID") {
            config.provider.client_id = client_id;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.provider.issuer.trim().is_empty() {
            return Err(common::Error::Config(
                "provider.issuer is missing (set it or OIDC_ISSUER)".into(),
            ));
        }
        require_http("provider.issuer", &self.provider.issuer)?;

        if self.provider.client_id.trim().is_empty() {
            return Err(common::Error::Config(
                "provider.client_id is missing (set it or OIDC_CLIENT_ID)".into(),
            ));
        }

        if !self.listener.callback_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "callback_path must start with '/', got: {:?}",
                self.listener.callback_path
            )));
        }

        if self.listener.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.flow.request_ready_timeout_secs == 0 {
            return Err(common::Error::Config(
                "request_ready_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.flow.redirect_timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "redirect_timeout_secs must be greater than 0 when set".into(),
            ));
        }
        if self.flow.http_timeout_secs == 0 {
            return Err(common::Error::Config(
                "http_timeout_secs must be greater than 0".into(),
            ));
        }

        require_http("backend.base_url", &self.backend.base_url)?;
        Ok(())
    }

    /// Redirect URI registered with the provider.
    pub fn redirect_uri(&self) -> String {
        match &self.provider.redirect_uri {
            Some(uri) => uri.clone(),
            None => format!(
                "http://{}{}",
                self.listener.listen_addr, self.listener.callback_path
            ),
        }
    }

    /// Full URL of the backend's profile-creation endpoint.
    pub fn profile_url(&self) -> String {
        format!(
            "{}/{}",
            self.backend.base_url.trim_end_matches('/'),
            self.backend.profile_path.trim_start_matches('/')
        )
    }

    pub fn auth_config(&self) -> AuthConfig {
        let mut auth = AuthConfig::new(self.provider.client_id.clone(), self.redirect_uri());
        auth.scopes = self.provider.scopes.clone();
        auth.request_ready_timeout = Duration::from_secs(self.flow.request_ready_timeout_secs);
        auth.redirect_timeout = self.flow.redirect_timeout_secs.map(Duration::from_secs);
        auth
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.flow.http_timeout_secs)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-agent.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_overrides() {
        unsafe {
            remove_env("OIDC_ISSUER");
            remove_env("OIDC_CLIENT_ID");
        }
    }

    fn valid_toml() -> &'static str {
        r#"
[provider]
issuer = "https://id.example.com/realms/market"
client_id = "market-app"

[backend]
base_url = "https://api.example.com/"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("auth-agent.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&write_config(&dir, valid_toml())).unwrap();

        assert_eq!(config.provider.client_id, "market-app");
        assert_eq!(config.listener.listen_addr, default_listen_addr());
        assert_eq!(config.listener.callback_path, "/callback");
        assert_eq!(config.listener.max_connections, 64);
        assert_eq!(config.storage.service, "marketplace-auth");
        assert_eq!(config.flow.request_ready_timeout_secs, 15);
        assert!(config.flow.redirect_timeout_secs.is_none());
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.redirect_uri(), "http://127.0.0.1:7890/callback");
        assert_eq!(config.profile_url(), "https://api.example.com/api/users");
    }

    #[test]
    fn test_auth_config_carries_flow_bounds() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let toml = r#"
[provider]
issuer = "https://id.example.com/realms/market"
client_id = "market-app"
redirect_uri = "marketplace://auth/callback"
scopes = ["openid", "email"]

[flow]
request_ready_timeout_secs = 5
redirect_timeout_secs = 300
http_timeout_secs = 10

[backend]
base_url = "https://api.example.com"
"#;
        let config = Config::load(&write_config(&dir, toml)).unwrap();
        let auth = config.auth_config();
        assert_eq!(auth.redirect_uri, "marketplace://auth/callback");
        assert_eq!(auth.scopes, vec!["openid", "email"]);
        assert_eq!(auth.request_ready_timeout, Duration::from_secs(5));
        assert_eq!(auth.redirect_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe {
            set_env("OIDC_ISSUER", "https://other.example.com/realms/test");
            set_env("OIDC_CLIENT_ID", "test-app");
        }
        let config = Config::load(&path).unwrap();
        clear_overrides();

        assert_eq!(config.provider.issuer, "https://other.example.com/realms/test");
        assert_eq!(config.provider.client_id, "test-app");
    }

    #[test]
    fn test_client_id_from_env_only() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let toml = r#"
[provider]
issuer = "https://id.example.com/realms/market"

[backend]
base_url = "https://api.example.com"
"#;
        let path = write_config(&dir, toml);

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("client_id"));

        unsafe { set_env("OIDC_CLIENT_ID", "from-env") };
        let config = Config::load(&path).unwrap();
        clear_overrides();
        assert_eq!(config.provider.client_id, "from-env");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/auth-agent.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&write_config(&dir, "not valid {{{{ toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();

        let cases = [
            ("issuer = \"ftp://id.example.com\"", "", "issuer"),
            ("", "[listener]\ncallback_path = \"callback\"", "callback_path"),
            ("", "[listener]\nmax_connections = 0", "max_connections"),
            ("", "[flow]\nrequest_ready_timeout_secs = 0", "request_ready_timeout_secs"),
            ("", "[flow]\nredirect_timeout_secs = 0", "redirect_timeout_secs"),
            ("", "[flow]\nhttp_timeout_secs = 0", "http_timeout_secs"),
        ];
        for (provider_extra, section, needle) in cases {
            let issuer = if provider_extra.is_empty() {
                "issuer = \"https://id.example.com/realms/market\""
            } else {
                provider_extra
            };
            let toml = format!(
                "[provider]\n{issuer}\nclient_id = \"app\"\n\n{section}\n\n[backend]\nbase_url = \"https://api.example.com\"\n"
            );
            let err = Config::load(&write_config(&dir, &toml)).unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "expected error about {needle}, got: {err}"
            );
        }
    }

    #[test]
    fn test_resolve_path_cli_takes_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/from/env.toml") };
        let path = Config::resolve_path(Some("/from/cli.toml"));
        assert_eq!(path, PathBuf::from("/from/cli.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_env_fallback() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/from/env.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/from/env.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("auth-agent.toml"));
    }
}
