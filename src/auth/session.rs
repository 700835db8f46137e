//! Sign-in session: silent refresh from the credential cache, with an
//! interactive browser login as fallback.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::callback_server::{CallbackResult, CallbackServer};
use crate::auth::oauth::{parse_callback_url, OAuth2Client, PkceChallenge, TokenResponse};
use crate::config::Config;
use crate::error::{AppError, AuthError, TokenStoreError};
use crate::token_store::{self, SecureString};

/// An authenticated Management API session.
#[derive(Debug)]
pub struct Session {
    pub access_token: SecureString,
    pub expires_at: DateTime<Utc>,
}

/// Identity details read from the access token claims.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountInfo {
    pub upn: Option<String>,
    pub unique_name: Option<String>,
    pub preferred_username: Option<String>,
    #[serde(rename = "tid")]
    pub tenant_id: Option<String>,
}

impl AccountInfo {
    /// Decode the (unverified) payload segment of a JWT access token.
    ///
    /// Only used for display; the token is validated by Azure on every call.
    pub fn from_access_token(token: &str) -> Option<Self> {
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn display_name(&self) -> &str {
        self.upn
            .as_deref()
            .or(self.preferred_username.as_deref())
            .or(self.unique_name.as_deref())
            .unwrap_or("unknown account")
    }
}

/// Sign in, preferring the cached refresh token.
pub async fn sign_in(config: &Config, oauth_client: &OAuth2Client) -> Result<Session, AppError> {
    match token_store::get_refresh_token() {
        Ok(refresh_token) => match oauth_client.refresh_token(&refresh_token).await {
            Ok(response) => {
                info!("Signed in silently with cached credentials");
                return Ok(finish(response));
            }
            Err(e) => {
                warn!("Cached credentials rejected, falling back to browser login: {}", e);
                if let Err(e) = token_store::delete_all() {
                    warn!("Failed to clear cached credentials: {}", e);
                }
            }
        },
        Err(TokenStoreError::NotFound) => debug!("No cached credentials"),
        Err(e) => warn!("Could not read cached credentials: {}", e),
    }

    interactive_sign_in(config, oauth_client).await
}

/// Run the browser-based authorization code flow.
async fn interactive_sign_in(
    config: &Config,
    oauth_client: &OAuth2Client,
) -> Result<Session, AppError> {
    info!("Starting browser sign-in");

    let pkce = PkceChallenge::new();
    let (auth_url, expected_state) = oauth_client.generate_auth_url(&pkce)?;

    let server = CallbackServer::bind(config.oauth.redirect_port)
        .map_err(|e| AuthError::CallbackServer(format!("Failed to start server: {}", e)))?;

    eprintln!("Opening browser for Azure sign-in. If it does not open, visit:\n\n  {}\n", auth_url);
    if let Err(e) = open::that(auth_url.as_str()) {
        warn!("Failed to open browser: {}", e);
    }

    let timeout = std::time::Duration::from_secs(config.oauth.login_timeout_seconds);
    let result = tokio::task::spawn_blocking(move || server.wait(timeout))
        .await
        .map_err(|e| AuthError::CallbackServer(e.to_string()))?;

    let callback_url = match result {
        CallbackResult::Success(url) => url,
        CallbackResult::TimedOut => return Err(AuthError::CallbackTimeout.into()),
        CallbackResult::Error(e) => return Err(AuthError::CallbackServer(e).into()),
    };

    let (code, state) = parse_callback_url(&callback_url)?;
    if state != expected_state {
        return Err(AuthError::StateValidationFailed.into());
    }

    let response = oauth_client.exchange_code(&code, &pkce.verifier).await?;
    Ok(finish(response))
}

/// Cache the new refresh token and build the session.
fn finish(response: TokenResponse) -> Session {
    if let Some(refresh_token) = &response.refresh_token {
        // A failed cache write only costs a browser login next time
        if let Err(e) = token_store::store_refresh_token(refresh_token) {
            warn!("Failed to cache refresh token: {}", e);
        }
    }

    let expires_at = Utc::now() + Duration::seconds(response.expires_in as i64);
    let account = AccountInfo::from_access_token(&response.access_token);

    match &account {
        Some(account) => info!(
            "Signed in as {} (tenant {}), token valid for {}",
            account.display_name(),
            account.tenant_id.as_deref().unwrap_or("unknown"),
            format_duration(expires_at - Utc::now())
        ),
        None => info!(
            "Signed in, token valid for {}",
            format_duration(expires_at - Utc::now())
        ),
    }

    Session {
        access_token: SecureString::new(response.access_token),
        expires_at,
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{}.{}.sig", header, payload)
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(30)), "< 1 min");
        assert_eq!(format_duration(Duration::minutes(45)), "45 min");
        assert_eq!(format_duration(Duration::hours(1)), "1 hour");
        assert_eq!(format_duration(Duration::hours(2)), "2 hours");
        assert_eq!(format_duration(Duration::minutes(90)), "1h 30m");
    }

    #[test]
    fn test_account_from_access_token() {
        let token = fake_jwt(serde_json::json!({
            "upn": "ada@contoso.com",
            "unique_name": "ada@contoso.com",
            "tid": "tenant-1",
            "aud": "https://management.azure.com"
        }));

        let account = AccountInfo::from_access_token(&token).unwrap();
        assert_eq!(account.display_name(), "ada@contoso.com");
        assert_eq!(account.tenant_id.as_deref(), Some("tenant-1"));
    }

    #[test]
    fn test_account_from_guest_token() {
        let token = fake_jwt(serde_json::json!({ "unique_name": "live.com#bob@example.com" }));
        let account = AccountInfo::from_access_token(&token).unwrap();
        assert_eq!(account.display_name(), "live.com#bob@example.com");
    }

    #[test]
    fn test_account_from_opaque_token() {
        assert!(AccountInfo::from_access_token("not-a-jwt").is_none());
    }
}
