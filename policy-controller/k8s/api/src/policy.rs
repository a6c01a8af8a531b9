//! Option policies (`policy.gateway.io/v1alpha1`) that attach to Gateway API
//! resources.

pub mod listener_option;
pub mod route_option;
pub mod virtual_host_option;

pub use self::{
    listener_option::{ListenerOption, ListenerOptionSpec, ListenerOptions},
    route_option::{RouteOption, RouteOptionSpec, RouteOptions},
    virtual_host_option::{VirtualHostOption, VirtualHostOptionSpec, VirtualHostOptions},
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

pub const GROUP: &str = "policy.gateway.io";

/// Targets a resource, or one named section of it (e.g. a Gateway listener or
/// an HTTPRoute rule). The namespace defaults to the policy's own.
#[derive(
    Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct PolicyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(
    Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Comma-separated retry conditions, e.g. `5xx,reset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_try_timeout: Option<String>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    #[serde(default)]
    pub allow_origin: Vec<String>,

    #[serde(default)]
    pub allow_origin_regex: Vec<String>,

    #[serde(default)]
    pub allow_methods: Vec<String>,

    #[serde(default)]
    pub allow_headers: Vec<String>,

    #[serde(default)]
    pub expose_headers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
}

impl PolicyTargetRef {
    /// Checks whether the target references the given resource type.
    pub fn targets_kind<T>(&self) -> bool
    where
        T: kube::Resource,
        T::DynamicType: Default,
    {
        let group = crate::group::<T>();
        let group_matches = self.group.eq_ignore_ascii_case(&group)
            || (self.group.is_empty() && group == "core");
        group_matches && self.kind.eq_ignore_ascii_case(&crate::kind::<T>())
    }
}
