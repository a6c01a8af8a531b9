use super::{PolicyStatus, PolicyTargetRef};

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
    kind = "ListenerOption",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ListenerOptionSpec {
    pub target_refs: Vec<PolicyTargetRef>,

    #[serde(default)]
    pub options: ListenerOptions,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ListenerOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_connection_buffer_limit_bytes: Option<u32>,
}
