//! Decides which calls an access request needs, given the policy that exists today.

use crate::error::JitError;

use super::duration::{extract_hours, iso8601_minutes, to_iso8601, validate_hours};
use super::models::{JitPolicy, JitPortRule, Protocol, VmRef};

/// What has to happen to the policy before access can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// No policy document exists for the VM's resource group and location.
    CreatePolicy,
    /// A document exists but does not cover this VM.
    AddVm,
    /// The VM is covered but has no rule for the port.
    AddPort,
    /// A rule for the port already exists.
    UseExisting,
}

impl PolicyAction {
    pub fn requires_write(&self) -> bool {
        !matches!(self, Self::UseExisting)
    }
}

/// Where the requested hours come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoursSource {
    /// Given on the command line.
    Requested(u32),
    /// Taken from the existing rule's max request duration.
    ExistingRule(u32),
    /// A rule must be created and no hours were given.
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPlan {
    pub action: PolicyAction,
    pub hours: HoursSource,
}

/// Choose the policy action and hours source for a VM and port.
pub fn plan_access(
    policy: Option<&JitPolicy>,
    vm: &VmRef,
    port: u16,
    requested_hours: Option<u32>,
) -> Result<AccessPlan, JitError> {
    let entry = policy.and_then(|p| p.vm_entry(vm));
    let rule = entry.and_then(|e| e.port(port));

    let action = match (policy, entry, rule) {
        (None, _, _) => PolicyAction::CreatePolicy,
        (Some(_), None, _) => PolicyAction::AddVm,
        (Some(_), Some(_), None) => PolicyAction::AddPort,
        (Some(_), Some(_), Some(_)) => PolicyAction::UseExisting,
    };

    let hours = match (requested_hours, rule) {
        (Some(hours), Some(rule)) => {
            let hours = validate_hours(hours, &hours.to_string())?;
            let raw = &rule.max_request_access_duration;
            // Unparseable maximums are left for the service to enforce.
            if let Some(max_minutes) = iso8601_minutes(raw) {
                if u64::from(hours) * 60 > max_minutes {
                    return Err(JitError::DurationExceedsPolicy {
                        port,
                        requested: hours,
                        max: raw.clone(),
                    });
                }
            }
            HoursSource::Requested(hours)
        }
        (Some(hours), None) => HoursSource::Requested(validate_hours(hours, &hours.to_string())?),
        (None, Some(rule)) => {
            let raw = &rule.max_request_access_duration;
            HoursSource::ExistingRule(validate_hours(extract_hours(raw), raw)?)
        }
        (None, None) => HoursSource::Prompt,
    };

    Ok(AccessPlan { action, hours })
}

/// Build the policy document to write for a plan that requires it.
///
/// Entries for other VMs and other ports are carried over unchanged.
pub fn build_policy(
    existing: Option<JitPolicy>,
    vm: &VmRef,
    port: u16,
    protocol: Protocol,
    source_prefix: &str,
    max_hours: u32,
) -> JitPolicy {
    let mut policy = existing.unwrap_or_else(|| JitPolicy::new_for(vm));
    policy.add_port_rule(
        vm,
        JitPortRule {
            number: port,
            protocol: protocol.as_str().to_string(),
            allowed_source_address_prefix: Some(source_prefix.to_string()),
            allowed_source_address_prefixes: Vec::new(),
            max_request_access_duration: to_iso8601(max_hours),
        },
    );
    policy
}
