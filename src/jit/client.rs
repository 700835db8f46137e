//! Azure Resource Manager client for VM lookup and JIT network access.
//!
//! Uses the Azure Resource Management API for subscriptions, compute and
//! Microsoft.Security resources.

use std::time::Duration as StdDuration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::models::{InitiateRequest, InitiateResponse, JitPolicy, Subscription, VmRef};
use crate::error::{AppError, ArmError, JitError};

/// API version for subscription operations.
const API_VERSION_SUBS: &str = "2022-12-01";

/// API version for compute operations.
const API_VERSION_COMPUTE: &str = "2023-09-01";

/// API version for resource provider operations.
const API_VERSION_PROVIDERS: &str = "2021-04-01";

/// API version for JIT network access policies.
const API_VERSION_JIT: &str = "2020-01-01";

/// Name of the single JIT policy document per resource group and location.
const JIT_POLICY_NAME: &str = "default";

/// HTTP request timeout.
const HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Azure Resource Manager API client.
pub struct ArmClient {
    http_client: Client,
    base_url: String,
}

impl ArmClient {
    /// Create a new client against a management endpoint.
    pub fn new(base_url: &str) -> Result<Self, ArmError> {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(ArmError::Network)?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// List all enabled subscriptions.
    pub async fn list_subscriptions(
        &self,
        access_token: &str,
    ) -> Result<Vec<Subscription>, ArmError> {
        let url = format!(
            "{}/subscriptions?api-version={}",
            self.base_url, API_VERSION_SUBS
        );

        debug!("Fetching subscriptions from {}", url);

        let mut subscriptions = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next {
            let response = self.send(self.http_client.get(&url), access_token).await?;
            let body: ListResponse<SubscriptionItem> = expect_json(response, "list subscriptions").await?;

            subscriptions.extend(
                body.value
                    .into_iter()
                    .filter(|s| s.state == "Enabled")
                    .map(|s| Subscription {
                        subscription_id: s.subscription_id,
                        display_name: s.display_name,
                        state: s.state,
                    }),
            );
            next = body.next_link;
        }

        info!("Found {} enabled subscriptions", subscriptions.len());
        Ok(subscriptions)
    }

    /// List the virtual machines of a subscription.
    pub async fn list_virtual_machines(
        &self,
        access_token: &str,
        subscription_id: &str,
    ) -> Result<Vec<VmRef>, AppError> {
        let url = format!(
            "{}/subscriptions/{}/providers/Microsoft.Compute/virtualMachines?api-version={}",
            self.base_url, subscription_id, API_VERSION_COMPUTE
        );

        let mut vms = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next {
            let response = self.send(self.http_client.get(&url), access_token).await?;
            let body: ListResponse<VirtualMachineItem> =
                expect_json(response, "list virtual machines").await?;

            for item in body.value {
                vms.push(VmRef::from_resource_id(&item.id, &item.location)?);
            }
            next = body.next_link;
        }

        Ok(vms)
    }

    /// Find a VM by name across subscriptions, in order.
    ///
    /// Subscriptions the caller cannot read are skipped; the first match wins.
    pub async fn find_vm(
        &self,
        access_token: &str,
        subscriptions: &[Subscription],
        vm_name: &str,
        resource_group: Option<&str>,
    ) -> Result<VmRef, AppError> {
        let total_subs = subscriptions.len();

        for (idx, sub) in subscriptions.iter().enumerate() {
            info!(
                "Searching subscription {}/{}: {}",
                idx + 1,
                total_subs,
                sub.display_name
            );

            let vms = match self
                .list_virtual_machines(access_token, &sub.subscription_id)
                .await
            {
                Ok(vms) => vms,
                Err(AppError::Arm(ArmError::Forbidden)) => {
                    debug!(
                        "No compute access to subscription {}, skipping",
                        sub.subscription_id
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let found = vms.into_iter().find(|vm| {
                let in_group = match resource_group {
                    Some(rg) => vm.resource_group.eq_ignore_ascii_case(rg),
                    None => true,
                };
                in_group && vm.name.eq_ignore_ascii_case(vm_name)
            });

            if let Some(vm) = found {
                info!(
                    "Found VM {} in resource group {} ({}) of subscription {}",
                    vm.name, vm.resource_group, vm.location, sub.display_name
                );
                return Ok(vm);
            }
        }

        Err(JitError::VmNotFound(vm_name.to_string()).into())
    }

    /// Get the registration state of a resource provider namespace.
    pub async fn provider_registration_state(
        &self,
        access_token: &str,
        subscription_id: &str,
        namespace: &str,
    ) -> Result<String, ArmError> {
        let url = format!(
            "{}/subscriptions/{}/providers/{}?api-version={}",
            self.base_url, subscription_id, namespace, API_VERSION_PROVIDERS
        );

        let response = self.send(self.http_client.get(&url), access_token).await?;
        let body: ProviderResponse = expect_json(response, "get resource provider").await?;
        Ok(body.registration_state)
    }

    /// Ask ARM to register a resource provider namespace.
    pub async fn register_provider(
        &self,
        access_token: &str,
        subscription_id: &str,
        namespace: &str,
    ) -> Result<String, ArmError> {
        let url = format!(
            "{}/subscriptions/{}/providers/{}/register?api-version={}",
            self.base_url, subscription_id, namespace, API_VERSION_PROVIDERS
        );

        let response = self.send(self.http_client.post(&url), access_token).await?;
        let body: ProviderResponse = expect_json(response, "register resource provider").await?;
        Ok(body.registration_state)
    }

    /// Read the JIT policy document covering a VM, if one exists.
    pub async fn get_jit_policy(
        &self,
        access_token: &str,
        vm: &VmRef,
    ) -> Result<Option<JitPolicy>, ArmError> {
        let url = self.jit_policy_url(vm, None);
        debug!("Fetching JIT policy from {}", url);

        let response = self.send(self.http_client.get(&url), access_token).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(
                "No JIT policy in resource group {} ({})",
                vm.resource_group, vm.location
            );
            return Ok(None);
        }

        expect_json(response, "get JIT policy").await.map(Some)
    }

    /// Create or replace the JIT policy document covering a VM.
    pub async fn put_jit_policy(
        &self,
        access_token: &str,
        vm: &VmRef,
        policy: &JitPolicy,
    ) -> Result<JitPolicy, ArmError> {
        let url = self.jit_policy_url(vm, None);

        info!(
            "Writing JIT policy for {} VM(s) in resource group {}",
            policy.properties.virtual_machines.len(),
            vm.resource_group
        );

        let response = self
            .send(self.http_client.put(&url).json(policy), access_token)
            .await?;
        expect_json(response, "write JIT policy").await
    }

    /// Submit a JIT access request.
    pub async fn initiate_access(
        &self,
        access_token: &str,
        vm: &VmRef,
        request: &InitiateRequest,
    ) -> Result<InitiateResponse, ArmError> {
        let url = self.jit_policy_url(vm, Some("initiate"));

        let response = self
            .send(self.http_client.post(&url).json(request), access_token)
            .await?;

        if !response.status().is_success() {
            return expect_json(response, "initiate JIT access").await;
        }

        // 202 Accepted may come without a body
        let body = response.text().await.map_err(ArmError::Network)?;
        if body.trim().is_empty() {
            return Ok(InitiateResponse::default());
        }
        serde_json::from_str(&body).map_err(|e| ArmError::InvalidResponse(e.to_string()))
    }

    fn jit_policy_url(&self, vm: &VmRef, action: Option<&str>) -> String {
        let action = action.map(|a| format!("/{}", a)).unwrap_or_default();
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Security/locations/{}/jitNetworkAccessPolicies/{}{}?api-version={}",
            self.base_url,
            vm.subscription_id,
            vm.resource_group,
            vm.location,
            JIT_POLICY_NAME,
            action,
            API_VERSION_JIT
        )
    }

    /// Send a request with bearer auth and a correlation id.
    async fn send(&self, request: RequestBuilder, access_token: &str) -> Result<Response, ArmError> {
        let request_id = Uuid::new_v4();
        let response = request
            .bearer_auth(access_token)
            .header("x-ms-client-request-id", request_id.to_string())
            .send()
            .await
            .map_err(ArmError::Network)?;

        debug!("HTTP {} (client request id {})", response.status(), request_id);
        Ok(response)
    }
}

/// Map a response onto a JSON body or the matching error.
async fn expect_json<T: serde::de::DeserializeOwned>(
    response: Response,
    operation: &str,
) -> Result<T, ArmError> {
    let status = response.status();
    match status.as_u16() {
        200..=299 => response
            .json()
            .await
            .map_err(|e| ArmError::InvalidResponse(e.to_string())),
        401 => Err(ArmError::Unauthorized),
        403 => {
            warn!("Forbidden: {}", operation);
            Err(ArmError::Forbidden)
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            error!("Failed to {}: HTTP {} - {}", operation, status, body);
            Err(ArmError::RequestFailed(format!(
                "{}: HTTP {}{}",
                operation,
                status.as_u16(),
                arm_error_message(&body)
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default()
            )))
        }
    }
}

/// Pull `error.message` out of an ARM error body.
fn arm_error_message(body: &str) -> Option<String> {
    let parsed: ArmErrorResponse = serde_json::from_str(body).ok()?;
    parsed.error.map(|e| e.message)
}

// --- API Response Types ---

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct VirtualMachineItem {
    id: String,
    location: String,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(rename = "registrationState")]
    registration_state: String,
}

#[derive(Debug, Deserialize)]
struct ArmErrorResponse {
    error: Option<ArmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ArmErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "arm-token";

    fn vm_item(sub: &str, rg: &str, name: &str) -> serde_json::Value {
        json!({
            "id": format!("/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}", sub, rg, name),
            "name": name,
            "location": "westeurope"
        })
    }

    fn subs(ids: &[&str]) -> Vec<Subscription> {
        ids.iter()
            .map(|id| Subscription {
                subscription_id: id.to_string(),
                display_name: format!("{}-name", id),
                state: "Enabled".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_list_subscriptions_filters_disabled_and_follows_next_link() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(query_param("api-version", API_VERSION_SUBS))
            .and(header("authorization", "Bearer arm-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "subscriptionId": "sub-1", "displayName": "prod", "state": "Enabled" },
                    { "subscriptionId": "sub-2", "displayName": "old", "state": "Disabled" }
                ],
                "nextLink": format!("{}/page2", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "subscriptionId": "sub-3", "displayName": "dev", "state": "Enabled" }]
            })))
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let subs = client.list_subscriptions(TOKEN).await.unwrap();

        let ids: Vec<_> = subs.iter().map(|s| s.subscription_id.as_str()).collect();
        assert_eq!(ids, vec!["sub-1", "sub-3"]);
    }

    #[tokio::test]
    async fn test_list_subscriptions_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let result = client.list_subscriptions(TOKEN).await;
        assert!(matches!(result, Err(ArmError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_find_vm_skips_forbidden_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Compute/virtualMachines"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-2/providers/Microsoft.Compute/virtualMachines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [vm_item("sub-2", "rg-a", "db01"), vm_item("sub-2", "rg-b", "WEB01")]
            })))
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let vm = client
            .find_vm(TOKEN, &subs(&["sub-1", "sub-2"]), "web01", None)
            .await
            .unwrap();

        assert_eq!(vm.subscription_id, "sub-2");
        assert_eq!(vm.resource_group, "rg-b");
        assert_eq!(vm.location, "westeurope");
    }

    #[tokio::test]
    async fn test_find_vm_respects_resource_group_and_reports_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Compute/virtualMachines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [vm_item("sub-1", "rg-a", "web01")]
            })))
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let result = client
            .find_vm(TOKEN, &subs(&["sub-1"]), "web01", Some("rg-other"))
            .await;

        assert!(matches!(
            result,
            Err(AppError::Jit(JitError::VmNotFound(ref name))) if name == "web01"
        ));
    }

    #[tokio::test]
    async fn test_get_jit_policy_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Security/locations/westeurope/jitNetworkAccessPolicies/default"))
            .and(query_param("api-version", API_VERSION_JIT))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": "ResourceNotFound", "message": "not found" }
            })))
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let vm = VmRef::from_resource_id(vm_item("sub-1", "rg-a", "web01")["id"].as_str().unwrap(), "westeurope").unwrap();

        assert!(client.get_jit_policy(TOKEN, &vm).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initiate_access_posts_request_body() {
        let server = MockServer::start().await;
        let vm = VmRef::from_resource_id(vm_item("sub-1", "rg-a", "web01")["id"].as_str().unwrap(), "westeurope").unwrap();
        let request = InitiateRequest::single(&vm, 22, "198.51.100.4/32", "2026-10-19T15:00:00Z");

        Mock::given(method("POST"))
            .and(path("/subscriptions/sub-1/resourceGroups/rg-a/providers/Microsoft.Security/locations/westeurope/jitNetworkAccessPolicies/default/initiate"))
            .and(body_json(serde_json::to_value(&request).unwrap()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let response = client.initiate_access(TOKEN, &vm, &request).await.unwrap();
        assert!(response.requestor.is_none());
    }

    #[tokio::test]
    async fn test_error_message_surfaces_arm_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": { "code": "Conflict", "message": "Another operation is in progress" }
            })))
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let result = client
            .provider_registration_state(TOKEN, "sub-1", "Microsoft.Security")
            .await;

        match result {
            Err(ArmError::RequestFailed(msg)) => {
                assert!(msg.contains("HTTP 409"));
                assert!(msg.contains("Another operation is in progress"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
