//! The access request flow: locate the VM, make sure a rule exists, open the port.

use tracing::{info, warn};

use super::client::ArmClient;
use super::duration::expiry_from_now;
use super::models::{AccessGrant, InitiateRequest, Protocol};
use super::planner::{build_policy, plan_access, HoursSource, PolicyAction};
use super::preflight::{ensure_security_provider, ProviderStatus};
use super::prompt::HoursPrompt;
use crate::error::AppError;

/// Everything the flow needs from the command line and config.
#[derive(Debug, Clone)]
pub struct AccessParams {
    pub vm_name: String,
    pub port: u16,
    /// Source prefix for this access request and for a rule the flow creates.
    pub address_prefix: String,
    pub hours: Option<u32>,
    pub subscription: Option<String>,
    pub resource_group: Option<String>,
    /// Protocol for a rule the flow creates.
    pub protocol: Protocol,
    pub justification: Option<String>,
}

/// Run the flow once, top to bottom. Every failure is returned to the caller.
pub async fn request_access(
    client: &ArmClient,
    access_token: &str,
    params: &AccessParams,
    prompt: &dyn HoursPrompt,
) -> Result<AccessGrant, AppError> {
    let mut subscriptions = client.list_subscriptions(access_token).await?;
    if let Some(wanted) = &params.subscription {
        subscriptions.retain(|s| {
            s.subscription_id.eq_ignore_ascii_case(wanted)
                || s.display_name.eq_ignore_ascii_case(wanted)
        });
    }

    let vm = client
        .find_vm(
            access_token,
            &subscriptions,
            &params.vm_name,
            params.resource_group.as_deref(),
        )
        .await?;

    if let ProviderStatus::RegistrationRequested(state) =
        ensure_security_provider(client, access_token, &vm.subscription_id).await?
    {
        warn!(
            "Security provider registration is {}; policy calls may fail until it completes",
            state
        );
    }

    let existing = client.get_jit_policy(access_token, &vm).await?;
    let plan = plan_access(existing.as_ref(), &vm, params.port, params.hours)?;
    info!("JIT plan for {} port {}: {:?}", vm.name, params.port, plan);

    let hours = match plan.hours {
        HoursSource::Requested(h) | HoursSource::ExistingRule(h) => h,
        HoursSource::Prompt => prompt.prompt_hours(&vm.name, params.port)?,
    };

    if plan.action.requires_write() {
        match plan.action {
            PolicyAction::CreatePolicy => info!("Creating JIT policy for {}", vm.name),
            PolicyAction::AddVm => info!("Enabling JIT for {} in existing policy", vm.name),
            _ => info!("Adding port {} to JIT policy of {}", params.port, vm.name),
        }

        let policy = build_policy(
            existing,
            &vm,
            params.port,
            params.protocol,
            &params.address_prefix,
            hours,
        );
        let written = client.put_jit_policy(access_token, &vm, &policy).await?;
        if written.vm_entry(&vm).and_then(|e| e.port(params.port)).is_none() {
            warn!("Written policy does not list port {} yet", params.port);
        }
        info!(
            "JIT policy provisioning state: {}",
            written
                .properties
                .provisioning_state
                .as_deref()
                .unwrap_or("unknown")
        );
    }

    let end_time_utc = expiry_from_now(hours);
    let mut request =
        InitiateRequest::single(&vm, params.port, &params.address_prefix, &end_time_utc);
    request.justification = params.justification.clone();

    info!(
        "Requesting access to {} port {} from {} until {}",
        vm.name, params.port, params.address_prefix, end_time_utc
    );
    let response = client.initiate_access(access_token, &vm, &request).await?;

    Ok(AccessGrant {
        vm,
        port: params.port,
        source_prefix: params.address_prefix.clone(),
        hours,
        end_time_utc,
        requestor: response.requestor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ArmError, JitError};
    use crate::jit::prompt::FixedHours;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VM_ID: &str =
        "/subscriptions/sub-1/resourceGroups/rg-web/providers/Microsoft.Compute/virtualMachines/web01";
    const POLICY_PATH: &str = "/subscriptions/sub-1/resourceGroups/rg-web/providers/Microsoft.Security/locations/westeurope/jitNetworkAccessPolicies/default";

    fn params(hours: Option<u32>) -> AccessParams {
        AccessParams {
            vm_name: "web01".into(),
            port: 22,
            address_prefix: "203.0.113.7".into(),
            hours,
            subscription: None,
            resource_group: None,
            protocol: Protocol::Tcp,
            justification: None,
        }
    }

    fn policy_body(ports: serde_json::Value) -> serde_json::Value {
        json!({
            "kind": "Basic",
            "location": "westeurope",
            "properties": { "virtualMachines": [{ "id": VM_ID, "ports": ports }] }
        })
    }

    /// Subscription, VM listing and provider lookups shared by every flow test.
    async fn mount_discovery(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "subscriptionId": "sub-1", "displayName": "prod", "state": "Enabled" }]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Compute/virtualMachines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{ "id": VM_ID, "name": "web01", "location": "westeurope" }]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Security"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "registrationState": "Registered" })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_creates_policy_then_initiates() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;

        Mock::given(method("GET"))
            .and(path(POLICY_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(POLICY_PATH))
            .and(body_partial_json(policy_body(json!([{
                "number": 22,
                "protocol": "TCP",
                "allowedSourceAddressPrefix": "203.0.113.7",
                "maxRequestAccessDuration": "PT4H"
            }]))))
            .respond_with(ResponseTemplate::new(200).set_body_json(policy_body(json!([{
                "number": 22,
                "protocol": "TCP",
                "allowedSourceAddressPrefix": "203.0.113.7",
                "maxRequestAccessDuration": "PT4H"
            }]))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/initiate", POLICY_PATH)))
            .respond_with(
                ResponseTemplate::new(202).set_body_json(json!({ "requestor": "ada@contoso.com" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let grant = request_access(&client, "token", &params(None), &FixedHours(Some(4)))
            .await
            .unwrap();

        assert_eq!(grant.hours, 4);
        assert_eq!(grant.vm.resource_group, "rg-web");
        assert_eq!(grant.source_prefix, "203.0.113.7");
        assert_eq!(grant.requestor.as_deref(), Some("ada@contoso.com"));
        assert!(grant.end_time_utc.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_added_port_rule_is_scoped_to_requested_prefix() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;

        let rdp = json!({
            "number": 3389,
            "protocol": "*",
            "allowedSourceAddressPrefix": "*",
            "maxRequestAccessDuration": "PT3H"
        });
        Mock::given(method("GET"))
            .and(path(POLICY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(policy_body(json!([rdp]))))
            .mount(&server)
            .await;
        let written = policy_body(json!([
            rdp,
            {
                "number": 22,
                "protocol": "TCP",
                "allowedSourceAddressPrefix": "198.51.100.0/24",
                "maxRequestAccessDuration": "PT2H"
            }
        ]));
        Mock::given(method("PUT"))
            .and(path(POLICY_PATH))
            .and(body_partial_json(written.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(written))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/initiate", POLICY_PATH)))
            .and(body_partial_json(json!({
                "virtualMachines": [{
                    "id": VM_ID,
                    "ports": [{ "number": 22, "allowedSourceAddressPrefix": "198.51.100.0/24" }]
                }]
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let mut params = params(Some(2));
        params.address_prefix = "198.51.100.0/24".into();
        let grant = request_access(&client, "token", &params, &FixedHours(None))
            .await
            .unwrap();

        assert_eq!(grant.source_prefix, "198.51.100.0/24");
        assert_eq!(grant.hours, 2);
    }

    #[tokio::test]
    async fn test_existing_rule_skips_write_and_uses_its_duration() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;

        Mock::given(method("GET"))
            .and(path(POLICY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(policy_body(json!([{
                "number": 22,
                "protocol": "*",
                "allowedSourceAddressPrefix": "*",
                "maxRequestAccessDuration": "PT5H"
            }]))))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("{}/initiate", POLICY_PATH)))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        // The prompt must not be consulted
        let grant = request_access(&client, "token", &params(None), &FixedHours(None))
            .await
            .unwrap();

        assert_eq!(grant.hours, 5);
    }

    #[tokio::test]
    async fn test_prompt_unavailable_aborts_before_write() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;

        Mock::given(method("GET"))
            .and(path(POLICY_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let result = request_access(&client, "token", &params(None), &FixedHours(None)).await;

        assert!(matches!(result, Err(AppError::Jit(JitError::PromptUnavailable))));
    }

    #[tokio::test]
    async fn test_subscription_filter_excludes_everything() {
        let server = MockServer::start().await;
        mount_discovery(&server).await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let mut params = params(Some(2));
        params.subscription = Some("sub-9".into());

        let result = request_access(&client, "token", &params, &FixedHours(None)).await;
        assert!(matches!(result, Err(AppError::Jit(JitError::VmNotFound(_)))));
    }

    #[tokio::test]
    async fn test_expired_token_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = ArmClient::new(&server.uri()).unwrap();
        let result = request_access(&client, "token", &params(Some(1)), &FixedHours(None)).await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Arm(ArmError::Unauthorized)));
        assert!(err.requires_sign_out());
    }
}
