//! Refresh-token cache used for silent sign-in.
//!
//! The macOS Keychain is used where available; other platforms fall back to a
//! file in the user's config directory.

pub mod secure;

#[cfg(not(target_os = "macos"))]
mod file;
#[cfg(target_os = "macos")]
mod keychain;

#[cfg(not(target_os = "macos"))]
use self::file as backend;
#[cfg(target_os = "macos")]
use self::keychain as backend;

use crate::error::TokenStoreError;
use zeroize::Zeroizing;

pub use secure::SecureString;

/// Store the refresh token.
pub fn store_refresh_token(token: &str) -> Result<(), TokenStoreError> {
    backend::store_refresh_token(token)
}

/// Retrieve the refresh token.
///
/// Returns a `Zeroizing<String>` that will be securely cleared when dropped.
pub fn get_refresh_token() -> Result<Zeroizing<String>, TokenStoreError> {
    backend::get_refresh_token()
}

/// Delete all cached credentials.
pub fn delete_all() -> Result<(), TokenStoreError> {
    backend::delete_all()
}
