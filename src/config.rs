//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub jit: JitConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub tenant: String,
    pub redirect_port: u16,
    pub login_timeout_seconds: u64,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub management_base_url: String,
    pub login_base_url: String,
}

/// Defaults applied to JIT rules the tool creates.
#[derive(Debug, Clone, Deserialize)]
pub struct JitConfig {
    pub default_address_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config: Config =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            config.oauth.tenant = tenant;
        }

        if let Ok(port) = env::var("AZURE_REDIRECT_PORT") {
            config.oauth.redirect_port = port
                .parse()
                .with_context(|| format!("AZURE_REDIRECT_PORT is not a valid port: {}", port))?;
        }

        if let Ok(url) = env::var("AZURE_MANAGEMENT_URL") {
            config.api.management_base_url = url;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<()> {
        if self.oauth.client_id.trim().is_empty() {
            anyhow::bail!(
                "Azure AD client_id not configured. Set AZURE_CLIENT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.tenant.trim().is_empty() {
            anyhow::bail!(
                "Azure AD tenant not configured. Set AZURE_TENANT_ID environment variable \
                 or update config.toml"
            );
        }

        if self.oauth.redirect_port == 0 {
            anyhow::bail!("OAuth redirect port must be non-zero");
        }

        Ok(())
    }

    /// Get the authorization URL for Azure AD.
    pub fn auth_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.api.login_base_url.trim_end_matches('/'),
            self.oauth.tenant
        )
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.api.login_base_url.trim_end_matches('/'),
            self.oauth.tenant
        )
    }

    /// The loopback redirect URI registered for the OAuth flow.
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.oauth.redirect_port)
    }
}

#[cfg(test)]
pub(crate) fn test_config(management_base_url: &str) -> Config {
    Config {
        app: AppConfig {
            name: "azurejit".into(),
            version: "0.1.0".into(),
        },
        oauth: OAuthConfig {
            client_id: "test-client".into(),
            tenant: "test-tenant".into(),
            redirect_port: 28491,
            login_timeout_seconds: 5,
            scopes: ScopesConfig {
                scopes: vec![
                    "https://management.azure.com/.default".into(),
                    "offline_access".into(),
                ],
            },
        },
        api: ApiConfig {
            management_base_url: management_base_url.into(),
            login_base_url: "https://login.microsoftonline.com".into(),
        },
        jit: JitConfig {
            default_address_prefix: "*".into(),
        },
        logging: LoggingConfig {
            level: "info".into(),
        },
    }
}
