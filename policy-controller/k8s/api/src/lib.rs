#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod duration;
pub mod gateway;
pub mod policy;

pub use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    NamespaceResourceScope,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    Client, Error,
};

/// Returns the API group of a resource type, using `core` for the core API.
pub fn group<T>() -> String
where
    T: kube::Resource,
    T::DynamicType: Default,
{
    let dt = T::DynamicType::default();
    let group = T::group(&dt);
    if group.is_empty() {
        return "core".to_string();
    }
    group.into_owned()
}

pub fn kind<T>() -> String
where
    T: kube::Resource,
    T::DynamicType: Default,
{
    T::kind(&Default::default()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_groups() {
        assert_eq!(group::<Service>(), "core");
        assert_eq!(kind::<Service>(), "Service");
        assert_eq!(group::<gateway::Gateway>(), "gateway.networking.k8s.io");
        assert_eq!(group::<policy::RouteOption>(), "policy.gateway.io");
        assert_eq!(kind::<gateway::HttpRoute>(), "HTTPRoute");
    }
}
