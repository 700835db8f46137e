//! File backend for the refresh-token cache on platforms without a Keychain.
//!
//! The token lives in `<config dir>/azurejit/refresh_token`, readable by the
//! owner only on Unix.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::TokenStoreError;

/// Cache file name.
const TOKEN_FILE: &str = "refresh_token";

/// Get the path to the token cache file.
pub fn token_path() -> Option<PathBuf> {
    ProjectDirs::from("de", "malvik", "azurejit").map(|dirs| dirs.config_dir().join(TOKEN_FILE))
}

fn require_path() -> Result<PathBuf, TokenStoreError> {
    token_path().ok_or_else(|| {
        TokenStoreError::StoreFailed("Could not determine config directory".to_string())
    })
}

/// Store the refresh token on disk.
pub fn store_refresh_token(token: &str) -> Result<(), TokenStoreError> {
    write_token(&require_path()?, token)
}

/// Retrieve the refresh token from disk.
pub fn get_refresh_token() -> Result<Zeroizing<String>, TokenStoreError> {
    read_token(&require_path()?)
}

/// Delete the token cache file, ignoring "not found".
pub fn delete_all() -> Result<(), TokenStoreError> {
    match token_path() {
        Some(path) => delete_token(&path),
        None => Ok(()),
    }
}

pub(crate) fn write_token(path: &Path, token: &str) -> Result<(), TokenStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| TokenStoreError::StoreFailed(e.to_string()))?;
    }

    fs::write(path, token).map_err(|e| TokenStoreError::StoreFailed(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| TokenStoreError::StoreFailed(e.to_string()))?;
    }

    debug!("Stored refresh token at {:?}", path);
    Ok(())
}

pub(crate) fn read_token(path: &Path) -> Result<Zeroizing<String>, TokenStoreError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let token = Zeroizing::new(content.trim().to_string());
            if token.is_empty() {
                Err(TokenStoreError::NotFound)
            } else {
                Ok(token)
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Err(TokenStoreError::NotFound),
        Err(e) => Err(TokenStoreError::RetrieveFailed(e.to_string())),
    }
}

pub(crate) fn delete_token(path: &Path) -> Result<(), TokenStoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TokenStoreError::DeleteFailed(e.to_string())),
    }
}
