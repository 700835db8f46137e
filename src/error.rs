//! Error types for the azurejit application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Credential store error: {0}")]
    TokenStore(#[from] TokenStoreError),

    #[error("Azure API error: {0}")]
    Arm(#[from] ArmError),

    #[error("JIT error: {0}")]
    Jit(#[from] JitError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("Callback server error: {0}")]
    CallbackServer(String),
}

/// Errors from the local refresh-token cache.
#[derive(Error, Debug)]
pub enum TokenStoreError {
    #[error("Failed to store token: {0}")]
    StoreFailed(String),

    #[error("Failed to retrieve token: {0}")]
    RetrieveFailed(String),

    #[error("Failed to delete token: {0}")]
    DeleteFailed(String),

    #[error("Token not found in credential store")]
    NotFound,
}

/// Azure Resource Manager request errors.
#[derive(Error, Debug)]
pub enum ArmError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unauthorized (token expired)")]
    Unauthorized,

    #[error("Forbidden (insufficient permissions)")]
    Forbidden,
}

/// Errors in the JIT access flow itself.
#[derive(Error, Debug)]
pub enum JitError {
    #[error("VM '{0}' not found in any accessible subscription")]
    VmNotFound(String),

    #[error("Invalid duration '{0}': expected whole hours between 1 and 24")]
    InvalidDuration(String),

    #[error("Requested {requested}h exceeds the policy maximum of {max} for port {port}")]
    DurationExceedsPolicy { port: u16, requested: u32, max: String },

    #[error("Duration required but no interactive terminal is available; pass --time")]
    PromptUnavailable,

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Malformed resource id: {0}")]
    MalformedResourceId(String),
}

impl AppError {
    /// Returns a user-friendly message for the final warning line.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(AuthError::OAuthFailed(desc)) => format!("Sign-in failed: {}", desc),
            Self::Auth(AuthError::CallbackTimeout) => {
                "Sign-in timed out. Please try again.".to_string()
            }
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error during sign-in. Please try again.".to_string()
            }
            Self::Auth(_) => "Login failed. Please try again.".to_string(),
            Self::TokenStore(_) => "Failed to access cached credentials.".to_string(),
            Self::Arm(ArmError::Unauthorized) => {
                "Session expired. Run again to sign in.".to_string()
            }
            Self::Arm(ArmError::Forbidden) => {
                "Insufficient permissions for this operation.".to_string()
            }
            Self::Arm(ArmError::Network(_)) => "Network error. Check your connection.".to_string(),
            Self::Arm(e) => format!("Azure request failed: {}", e),
            Self::Jit(e) => e.to_string(),
            Self::Config(msg) => format!("Configuration error: {}", msg),
        }
    }

    /// Returns true if the cached credentials should be discarded.
    pub fn requires_sign_out(&self) -> bool {
        matches!(
            self,
            Self::Auth(AuthError::TokenRefreshFailed(_)) | Self::Arm(ArmError::Unauthorized)
        )
    }
}
