//! JIT data models: resolved VM references, policy documents and access requests.
//!
//! Policy and request types mirror the `Microsoft.Security/jitNetworkAccessPolicies`
//! wire format (2020-01-01), so they serialize directly as request bodies.

use serde::{Deserialize, Serialize};

use crate::error::JitError;

/// Policy kind used when creating a new policy document.
pub const POLICY_KIND: &str = "Basic";

/// Azure subscription info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription ID (GUID).
    pub subscription_id: String,

    /// Display name.
    pub display_name: String,

    /// Subscription state (e.g., "Enabled").
    pub state: String,
}

/// A virtual machine located by name.
#[derive(Debug, Clone, PartialEq)]
pub struct VmRef {
    /// Full ARM resource id.
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub subscription_id: String,
}

impl VmRef {
    /// Build a reference from an ARM resource id of the form
    /// `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Compute/virtualMachines/{name}`.
    pub fn from_resource_id(id: &str, location: &str) -> Result<Self, JitError> {
        let segments: Vec<&str> = id.trim_matches('/').split('/').collect();

        let value_after = |key: &str| {
            segments
                .iter()
                .position(|s| s.eq_ignore_ascii_case(key))
                .and_then(|i| segments.get(i + 1))
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
        };

        let malformed = || JitError::MalformedResourceId(id.to_string());
        let subscription_id = value_after("subscriptions").ok_or_else(malformed)?;
        let resource_group = value_after("resourceGroups").ok_or_else(malformed)?;
        let name = value_after("virtualMachines").ok_or_else(malformed)?;

        Ok(Self {
            id: id.to_string(),
            name,
            resource_group,
            location: location.to_string(),
            subscription_id,
        })
    }

    /// Whether an id from a policy document refers to this VM.
    ///
    /// ARM does not preserve casing of resource ids consistently.
    pub fn matches_id(&self, other: &str) -> bool {
        self.id.eq_ignore_ascii_case(other)
    }
}

/// Protocol of a JIT port rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Any,
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "*",
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

/// A `jitNetworkAccessPolicies/default` document for one resource group and location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JitPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub properties: JitPolicyProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JitPolicyProperties {
    #[serde(default)]
    pub virtual_machines: Vec<JitVmPolicy>,
    #[serde(default, skip_serializing)]
    pub provisioning_state: Option<String>,
}

/// The entry for a single VM inside a policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JitVmPolicy {
    pub id: String,
    #[serde(default)]
    pub ports: Vec<JitPortRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip_address: Option<String>,
}

impl JitVmPolicy {
    /// The rule for a port number, if any.
    pub fn port(&self, number: u16) -> Option<&JitPortRule> {
        self.ports.iter().find(|p| p.number == number)
    }
}

/// A port rule: what may be opened and for how long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JitPortRule {
    pub number: u16,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_source_address_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_source_address_prefixes: Vec<String>,
    /// ISO-8601 duration, e.g. `PT3H`.
    pub max_request_access_duration: String,
}

impl JitPolicy {
    /// An empty policy document for a VM's resource group and location.
    pub fn new_for(vm: &VmRef) -> Self {
        Self {
            kind: Some(POLICY_KIND.to_string()),
            location: Some(vm.location.clone()),
            properties: JitPolicyProperties {
                virtual_machines: Vec::new(),
                provisioning_state: None,
            },
        }
    }

    /// The entry for a VM, if the policy covers it.
    pub fn vm_entry(&self, vm: &VmRef) -> Option<&JitVmPolicy> {
        self.properties
            .virtual_machines
            .iter()
            .find(|entry| vm.matches_id(&entry.id))
    }

    /// Add a port rule for a VM, creating the VM entry when missing.
    ///
    /// An existing rule for the same port number is left untouched.
    pub fn add_port_rule(&mut self, vm: &VmRef, rule: JitPortRule) {
        let entry = match self
            .properties
            .virtual_machines
            .iter()
            .position(|entry| vm.matches_id(&entry.id))
        {
            Some(idx) => &mut self.properties.virtual_machines[idx],
            None => {
                self.properties.virtual_machines.push(JitVmPolicy {
                    id: vm.id.clone(),
                    ports: Vec::new(),
                    public_ip_address: None,
                });
                let last = self.properties.virtual_machines.len() - 1;
                &mut self.properties.virtual_machines[last]
            }
        };

        if entry.port(rule.number).is_none() {
            entry.ports.push(rule);
        }
    }
}

/// Body of `jitNetworkAccessPolicies/default/initiate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub virtual_machines: Vec<InitiateVm>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateVm {
    pub id: String,
    pub ports: Vec<InitiatePort>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePort {
    pub number: u16,
    pub allowed_source_address_prefix: String,
    /// ISO-8601 UTC timestamp at which access is revoked.
    pub end_time_utc: String,
}

impl InitiateRequest {
    /// A request opening one port on one VM.
    pub fn single(vm: &VmRef, port: u16, source_prefix: &str, end_time_utc: &str) -> Self {
        Self {
            virtual_machines: vec![InitiateVm {
                id: vm.id.clone(),
                ports: vec![InitiatePort {
                    number: port,
                    allowed_source_address_prefix: source_prefix.to_string(),
                    end_time_utc: end_time_utc.to_string(),
                }],
            }],
            justification: None,
        }
    }
}

/// The parts of the initiate response that are reported back to the user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    #[serde(default)]
    pub requestor: Option<String>,
}

/// Outcome of a successful access request.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub vm: VmRef,
    pub port: u16,
    pub source_prefix: String,
    pub hours: u32,
    pub end_time_utc: String,
    pub requestor: Option<String>,
}
