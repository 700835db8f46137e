//! Azure AD authentication module.
//!
//! Provides OAuth2 with PKCE authentication, the loopback callback server,
//! and the sign-in session with cached refresh tokens.

pub mod callback_server;
pub mod oauth;
pub mod session;
