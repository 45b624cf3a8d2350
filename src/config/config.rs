//! DSIS configuration
//!
//! `Config` is the optional, file-backed form read from TOML; `to_runtime`
//! fills gaps from `DSIS_*` environment variables and validates the result
//! into a `DsisConfig`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MODEL_VERSION: &str = "5000107";
pub const DEFAULT_DSIS_SITE: &str = "qa";
pub const NATIVE_MODEL: &str = "OW5000";
pub const COMMON_MODEL: &str = "OpenWorksCommonModel";
const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONFIG_FILE: &str = "dsis.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("'{0}' must be a non-empty string")]
    Missing(&'static str),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// DSIS API environments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Qa,
    Prod,
}

impl Environment {
    /// Gateway base URL for this environment
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Dev => "https://api-dev.gateway.equinor.com",
            Environment::Qa => "https://api-test.gateway.equinor.com",
            Environment::Prod => "https://api.gateway.equinor.com",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "qa" => Ok(Environment::Qa),
            "prod" => Ok(Environment::Prod),
            other => Err(ConfigError::Invalid(format!(
                "unknown environment '{}', expected dev, qa or prod",
                other
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Dev => "dev",
            Environment::Qa => "qa",
            Environment::Prod => "prod",
        };
        f.write_str(name)
    }
}

/// Credentials for the dual-token flow and the two APIM products
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub access_app_id: String,
    pub dsis_username: String,
    pub dsis_password: String,
    pub subscription_key_dsauth: String,
    pub subscription_key_dsdata: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("access_app_id", &self.access_app_id)
            .field("dsis_username", &self.dsis_username)
            .finish_non_exhaustive()
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct DsisConfig {
    pub environment: Environment,
    pub credentials: Credentials,
    pub model_name: String,
    pub model_version: String,
    pub dsis_site: String,
    /// Replaces the environment's gateway URL (proxies, test servers)
    pub base_url: Option<String>,
    /// Replaces `https://login.microsoftonline.com`
    pub login_url: Option<String>,
    pub timeout: Duration,
}

impl DsisConfig {
    /// Create and validate a configuration
    pub fn new(
        environment: Environment,
        credentials: Credentials,
        model_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            environment,
            credentials,
            model_name: model_name.into(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            dsis_site: DEFAULT_DSIS_SITE.to_string(),
            base_url: None,
            login_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Configuration for native model data (`OW5000`)
    pub fn for_native_model(
        environment: Environment,
        credentials: Credentials,
    ) -> Result<Self, ConfigError> {
        Self::new(environment, credentials, NATIVE_MODEL)
    }

    /// Configuration for common model data (`OpenWorksCommonModel`)
    pub fn for_common_model(
        environment: Environment,
        credentials: Credentials,
    ) -> Result<Self, ConfigError> {
        Self::new(environment, credentials, COMMON_MODEL)
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    pub fn with_dsis_site(mut self, site: impl Into<String>) -> Self {
        self.dsis_site = site.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = Some(login_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check that every required value is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.credentials;
        let required = [
            ("tenant_id", &c.tenant_id),
            ("client_id", &c.client_id),
            ("client_secret", &c.client_secret),
            ("access_app_id", &c.access_app_id),
            ("dsis_username", &c.dsis_username),
            ("dsis_password", &c.dsis_password),
            ("subscription_key_dsauth", &c.subscription_key_dsauth),
            ("subscription_key_dsdata", &c.subscription_key_dsdata),
            ("model_name", &self.model_name),
            ("model_version", &self.model_version),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        Ok(())
    }

    /// Gateway base URL, without trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
            .trim_end_matches('/')
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/dsauth/v1/token", self.base_url())
    }

    pub fn data_endpoint(&self) -> String {
        format!("{}/dsdata/v1", self.base_url())
    }

    /// Azure AD authority for the tenant
    pub fn authority(&self) -> String {
        let login = self
            .login_url
            .as_deref()
            .unwrap_or(DEFAULT_LOGIN_URL)
            .trim_end_matches('/');
        format!("{}/{}", login, self.credentials.tenant_id)
    }

    /// OAuth2 scope for the access application
    pub fn scope(&self) -> String {
        format!("{}/.default", self.credentials.access_app_id)
    }
}

/// File-backed configuration; every value is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub environment: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_app_id: Option<String>,
    pub dsis_username: Option<String>,
    pub dsis_password: Option<String>,
    pub subscription_key_dsauth: Option<String>,
    pub subscription_key_dsdata: Option<String>,
    pub model_name: Option<String>,
    pub model_version: Option<String>,
    pub dsis_site: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `$DSIS_CONFIG` or `./dsis.toml`; a missing default file yields an empty config
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("DSIS_CONFIG") {
            return Self::load(path);
        }

        let path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::load(path)
        } else {
            tracing::debug!("No {} found, relying on environment", DEFAULT_CONFIG_FILE);
            Ok(Self::default())
        }
    }

    /// Resolve against the process environment and validate
    pub fn to_runtime(&self) -> Result<DsisConfig, ConfigError> {
        self.resolve(|key| std::env::var(key).ok())
    }

    fn resolve<F>(&self, env: F) -> Result<DsisConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |value: &Option<String>, key: &str| -> String {
            value
                .clone()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| env(key))
                .unwrap_or_default()
        };

        let environment = match pick(&self.environment, "DSIS_ENVIRONMENT") {
            name if name.is_empty() => Environment::Dev,
            name => name.parse()?,
        };

        let credentials = Credentials {
            tenant_id: pick(&self.tenant_id, "DSIS_TENANT_ID"),
            client_id: pick(&self.client_id, "DSIS_CLIENT_ID"),
            client_secret: pick(&self.client_secret, "DSIS_CLIENT_SECRET"),
            access_app_id: pick(&self.access_app_id, "DSIS_ACCESS_APP_ID"),
            dsis_username: pick(&self.dsis_username, "DSIS_USERNAME"),
            dsis_password: pick(&self.dsis_password, "DSIS_PASSWORD"),
            subscription_key_dsauth: pick(
                &self.subscription_key_dsauth,
                "DSIS_SUBSCRIPTION_KEY_DSAUTH",
            ),
            subscription_key_dsdata: pick(
                &self.subscription_key_dsdata,
                "DSIS_SUBSCRIPTION_KEY_DSDATA",
            ),
        };

        let model_name = match pick(&self.model_name, "DSIS_MODEL_NAME") {
            name if name.is_empty() => NATIVE_MODEL.to_string(),
            name => name,
        };

        let mut config = DsisConfig::new(environment, credentials, model_name)?;

        let version = pick(&self.model_version, "DSIS_MODEL_VERSION");
        if !version.is_empty() {
            config.model_version = version;
        }
        let site = pick(&self.dsis_site, "DSIS_SITE");
        if !site.is_empty() {
            config.dsis_site = site;
        }
        let base_url = pick(&self.base_url, "DSIS_BASE_URL");
        if !base_url.is_empty() {
            config.base_url = Some(base_url);
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn credentials() -> Credentials {
        Credentials {
            tenant_id: "tenant".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            access_app_id: "app".to_string(),
            dsis_username: "user".to_string(),
            dsis_password: "pass".to_string(),
            subscription_key_dsauth: "k1".to_string(),
            subscription_key_dsdata: "k2".to_string(),
        }
    }

    #[test]
    fn test_endpoints() {
        let config = DsisConfig::for_native_model(Environment::Dev, credentials()).unwrap();
        assert_eq!(config.model_name, "OW5000");
        assert_eq!(config.model_version, "5000107");
        assert_eq!(
            config.token_endpoint(),
            "https://api-dev.gateway.equinor.com/dsauth/v1/token"
        );
        assert_eq!(
            config.data_endpoint(),
            "https://api-dev.gateway.equinor.com/dsdata/v1"
        );
        assert_eq!(config.authority(), "https://login.microsoftonline.com/tenant");
        assert_eq!(config.scope(), "app/.default");
    }

    #[test]
    fn test_base_url_override() {
        let config = DsisConfig::for_common_model(Environment::Prod, credentials())
            .unwrap()
            .with_base_url("http://localhost:8080/");
        assert_eq!(config.model_name, "OpenWorksCommonModel");
        assert_eq!(config.data_endpoint(), "http://localhost:8080/dsdata/v1");
    }

    #[test]
    fn test_missing_credential() {
        let mut creds = credentials();
        creds.dsis_password = "  ".to_string();
        let err = DsisConfig::for_native_model(Environment::Qa, creds).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("dsis_password")));
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!(" qa ".parse::<Environment>().unwrap(), Environment::Qa);
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Qa.to_string(), "qa");
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("pass"));
    }

    #[test]
    fn test_resolve_prefers_file_over_env() {
        let config = Config::from_toml(
            r#"
            environment = "qa"
            tenant_id = "file-tenant"
            model_version = "42"
            timeout_secs = 5
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("DSIS_TENANT_ID", "env-tenant"),
            ("DSIS_CLIENT_ID", "client"),
            ("DSIS_CLIENT_SECRET", "secret"),
            ("DSIS_ACCESS_APP_ID", "app"),
            ("DSIS_USERNAME", "user"),
            ("DSIS_PASSWORD", "pass"),
            ("DSIS_SUBSCRIPTION_KEY_DSAUTH", "k1"),
            ("DSIS_SUBSCRIPTION_KEY_DSDATA", "k2"),
            ("DSIS_SITE", "prod"),
        ]
        .into_iter()
        .collect();

        let runtime = config
            .resolve(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(runtime.environment, Environment::Qa);
        assert_eq!(runtime.credentials.tenant_id, "file-tenant");
        assert_eq!(runtime.credentials.client_id, "client");
        assert_eq!(runtime.model_name, "OW5000");
        assert_eq!(runtime.model_version, "42");
        assert_eq!(runtime.dsis_site, "prod");
        assert_eq!(runtime.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_resolve_reports_missing_value() {
        let err = Config::default().resolve(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("tenant_id")));
    }
}
