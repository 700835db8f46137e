//! Makes sure the subscription can serve JIT requests before any policy call.

use tracing::{info, warn};

use super::client::ArmClient;
use crate::error::ArmError;

/// Resource provider that owns JIT network access policies.
pub const SECURITY_PROVIDER: &str = "Microsoft.Security";

/// Outcome of the provider check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    AlreadyRegistered,
    /// Registration was requested; ARM may still be processing it.
    RegistrationRequested(String),
}

/// Ensure `Microsoft.Security` is registered in the subscription, registering it if not.
pub async fn ensure_security_provider(
    client: &ArmClient,
    access_token: &str,
    subscription_id: &str,
) -> Result<ProviderStatus, ArmError> {
    let state = client
        .provider_registration_state(access_token, subscription_id, SECURITY_PROVIDER)
        .await?;

    if state.eq_ignore_ascii_case("Registered") {
        info!("{} provider is registered", SECURITY_PROVIDER);
        return Ok(ProviderStatus::AlreadyRegistered);
    }

    warn!(
        "{} provider is {} in subscription {}, registering",
        SECURITY_PROVIDER, state, subscription_id
    );
    let new_state = client
        .register_provider(access_token, subscription_id, SECURITY_PROVIDER)
        .await?;
    info!("{} provider registration state: {}", SECURITY_PROVIDER, new_state);

    Ok(ProviderStatus::RegistrationRequested(new_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROVIDER_PATH: &str = "/subscriptions/sub-1/providers/Microsoft.Security";

    #[tokio::test]
    async fn test_registered_provider_is_left_alone() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PROVIDER_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "namespace": "Microsoft.Security",
                "registrationState": "Registered"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let status = ensure_security_provider(&client, "token", "sub-1").await.unwrap();
        assert_eq!(status, ProviderStatus::AlreadyRegistered);
    }

    #[tokio::test]
    async fn test_unregistered_provider_triggers_registration() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PROVIDER_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "registrationState": "NotRegistered"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/register", PROVIDER_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "registrationState": "Registering"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let status = ensure_security_provider(&client, "token", "sub-1").await.unwrap();
        assert_eq!(
            status,
            ProviderStatus::RegistrationRequested("Registering".to_string())
        );
    }
}
