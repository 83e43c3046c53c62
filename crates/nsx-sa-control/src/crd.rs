//! The `NSXServiceAccount` custom resource.
//!
//! A CR asks for a Manager principal identity and cluster control plane bound
//! to a VPC; the engine mirrors the outcome into the status, which carries a
//! single `Realized` condition. [`NsxServiceAccountStatus::set_condition`]
//! is the only place the phase and the status reason are derived.

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};

/// Condition type reported on every CR.
pub const REALIZED_CONDITION: &str = "Realized";

/// Condition reason for a successful realization.
pub const REASON_REALIZED: &str = "RealizationSucceeded";

/// Desired state of an `NSXServiceAccount`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[kube(
    group = "nsx.vmware.com",
    version = "v1alpha1",
    kind = "NSXServiceAccount",
    root = "NsxServiceAccount",
    plural = "nsxserviceaccounts"
)]
#[kube(namespaced)]
#[kube(status = "NsxServiceAccountStatus")]
#[serde(rename_all = "camelCase")]
pub struct NsxServiceAccountSpec {
    /// VPC the principal identity administers. Defaults to `<namespace>-default-vpc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_name: Option<String>,
    /// Rotate the client certificate before it expires.
    #[serde(default)]
    pub enable_cert_rotation: bool,
}

/// Coarse outcome derived from the `Realized` condition.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub enum Phase {
    /// All Manager objects and the secret exist.
    Realized,
    /// The last attempt failed before realization.
    Failed,
}

/// Observed state of an `NSXServiceAccount`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NsxServiceAccountStatus {
    /// Coarse outcome, derived from the `Realized` condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Human-readable message of the `Realized` condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Status conditions; only `Realized` is written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Manager policy path of the VPC the identity is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_path: Option<String>,
    /// Manager addresses the workload may connect to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nsx_managers: Vec<String>,
    /// In-cluster proxy in front of the Managers, if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_endpoints: Option<ProxyEndpoints>,
    /// Node ID of the cluster control plane.
    #[serde(rename = "clusterID", skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    /// Kubernetes cluster name as known to the Manager.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    /// Secrets holding the client credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretRef>,
}

/// A status condition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Realized`.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// `True` or `False`.
    pub status: String,
    /// Machine-readable CamelCase reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// CR generation the condition was computed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// RFC 3339 time the condition was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// A `True` `Realized` condition.
    #[must_use]
    pub fn realized(message: impl Into<String>, generation: Option<i64>) -> Self {
        Self::new("True", REASON_REALIZED, message, generation)
    }

    /// A `False` `Realized` condition.
    #[must_use]
    pub fn failed(reason: &str, message: impl Into<String>, generation: Option<i64>) -> Self {
        Self::new("False", reason, message, generation)
    }

    fn new(
        status: &str,
        reason: &str,
        message: impl Into<String>,
        generation: Option<i64>,
    ) -> Self {
        Self {
            condition_type: REALIZED_CONDITION.to_string(),
            status: status.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            observed_generation: generation,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    /// Whether the condition status is `True`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Load balancer addresses and ports of the Manager proxy.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct ProxyEndpoints {
    /// Load balancer ingress addresses.
    #[serde(default)]
    pub addresses: Vec<ProxyAddress>,
    /// Proxied Manager ports.
    #[serde(default)]
    pub ports: Vec<ProxyPort>,
}

impl ProxyEndpoints {
    /// Whether neither addresses nor ports were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.ports.is_empty()
    }
}

/// One load balancer ingress address.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub struct ProxyAddress {
    /// Ingress IP, if assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Ingress hostname, if assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// One proxied port.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub struct ProxyPort {
    /// Service port name (`rest-api` or `nsx-rpc-fwd-proxy`).
    pub name: String,
    /// Port number.
    pub port: i32,
    /// Protocol, e.g. `TCP`.
    pub protocol: String,
}

/// Reference to a secret written for the CR.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub struct SecretRef {
    /// Secret name.
    pub name: String,
    /// Secret namespace.
    pub namespace: String,
}

impl NsxServiceAccountStatus {
    /// Replace the `Realized` condition and derive phase and reason from it.
    ///
    /// The condition's message is the human-readable text; it becomes the
    /// status reason as well so both fields always agree.
    pub fn set_condition(&mut self, condition: Condition) {
        self.phase = Some(if condition.is_true() {
            Phase::Realized
        } else {
            Phase::Failed
        });
        self.reason.clone_from(&condition.message);
        self.conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
    }

    /// The `Realized` condition, if any.
    #[must_use]
    pub fn realized_condition(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == REALIZED_CONDITION)
    }

    /// Whether the CR is realized.
    #[must_use]
    pub fn is_realized(&self) -> bool {
        self.phase == Some(Phase::Realized)
            && self.realized_condition().is_some_and(Condition::is_true)
    }
}

impl NsxServiceAccount {
    /// Whether the status reports a completed realization.
    #[must_use]
    pub fn is_realized(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(NsxServiceAccountStatus::is_realized)
    }

    /// Whether the status reports a failed attempt.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.phase == Some(Phase::Failed))
    }

    /// The VPC name, falling back to `<namespace>-default-vpc`.
    #[must_use]
    pub fn vpc_name(&self) -> String {
        self.spec.vpc_name.clone().unwrap_or_else(|| {
            format!("{}-default-vpc", self.namespace().unwrap_or_default())
        })
    }
}
