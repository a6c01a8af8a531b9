use super::{CorsPolicy, PolicyStatus, PolicyTargetRef, RetryPolicy};

/// Options applied to the routes of HTTPRoutes, either through target refs or
/// through an `ExtensionRef` filter on a rule.
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
    kind = "RouteOption",
    status = "PolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RouteOptionSpec {
    #[serde(default)]
    pub target_refs: Vec<PolicyTargetRef>,

    #[serde(default)]
    pub options: RouteOptions,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct RouteOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faults: Option<FaultInjection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<RetryPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_rewrite: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_response: Option<DirectResponse>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct FaultInjection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<FaultAbort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<FaultDelay>,
}

#[derive(
    Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct FaultAbort {
    /// Percentage of requests to abort, from 0 to 100.
    pub percentage: u32,
    pub http_status: u16,
}

#[derive(
    Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct FaultDelay {
    pub percentage: u32,
    pub fixed_delay: String,
}

#[derive(
    Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct DirectResponse {
    pub status: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}
