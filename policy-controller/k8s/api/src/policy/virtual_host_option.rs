use super::{CorsPolicy, PolicyStatus, PolicyTargetRef, RetryPolicy};
use crate::gateway::HttpHeaderFilter;

/// Options applied to every virtual host of the Gateways (or Gateway
/// listeners) it targets.
#[derive(
    Clone,
    Debug,
    Default,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "policy.gateway.io",
    version = "v1alpha1",
    kind = "VirtualHostOption",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHostOptionSpec {
    pub target_refs: Vec<PolicyTargetRef>,

    #[serde(default)]
    pub options: VirtualHostOptions,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHostOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<HttpHeaderFilter>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<HttpHeaderFilter>,
}
