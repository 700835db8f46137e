//! macOS Keychain backend for the refresh-token cache.

use crate::error::TokenStoreError;
use security_framework::passwords::{
    delete_generic_password, get_generic_password, set_generic_password,
};
use zeroize::Zeroizing;

/// Keychain service identifier.
const SERVICE: &str = "de.malvik.azurejit.cli";

/// Account name for the stored refresh token.
const ACCOUNT_REFRESH_TOKEN: &str = "azure_refresh_token";

/// Store the refresh token in the Keychain.
pub fn store_refresh_token(token: &str) -> Result<(), TokenStoreError> {
    set_generic_password(SERVICE, ACCOUNT_REFRESH_TOKEN, token.as_bytes())
        .map_err(|e| TokenStoreError::StoreFailed(e.to_string()))
}

/// Retrieve the refresh token from the Keychain.
pub fn get_refresh_token() -> Result<Zeroizing<String>, TokenStoreError> {
    let bytes = get_generic_password(SERVICE, ACCOUNT_REFRESH_TOKEN).map_err(|e| {
        if is_not_found_error(&e) {
            TokenStoreError::NotFound
        } else {
            TokenStoreError::RetrieveFailed(e.to_string())
        }
    })?;

    let token =
        String::from_utf8(bytes).map_err(|e| TokenStoreError::RetrieveFailed(e.to_string()))?;

    Ok(Zeroizing::new(token))
}

/// Delete the stored refresh token, ignoring "not found".
pub fn delete_all() -> Result<(), TokenStoreError> {
    match delete_generic_password(SERVICE, ACCOUNT_REFRESH_TOKEN) {
        Ok(()) => Ok(()),
        Err(e) if is_not_found_error(&e) => Ok(()),
        Err(e) => Err(TokenStoreError::DeleteFailed(e.to_string())),
    }
}

/// Helper to check if a security framework error is "item not found".
fn is_not_found_error(error: &security_framework::base::Error) -> bool {
    // errSecItemNotFound = -25300
    error.code() == -25300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires keychain access"]
    fn test_store_and_delete_refresh_token() {
        store_refresh_token("test_refresh").expect("Failed to store refresh token");

        let retrieved = get_refresh_token().expect("Failed to retrieve token");
        assert_eq!(&*retrieved, "test_refresh");

        delete_all().expect("Failed to delete all");
        assert!(matches!(get_refresh_token(), Err(TokenStoreError::NotFound)));
    }
}
