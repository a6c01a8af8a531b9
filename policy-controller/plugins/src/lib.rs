#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod attached_routes;
mod builtin;
pub mod filters;
mod listener_options;
pub mod policy;
mod route_options;
mod virtual_host_options;


pub use self::{
    attached_routes::AttachedRoutes,
    builtin::BuiltinFilters,
    listener_options::ListenerOptionsPlugin,
    policy::{Policies, PolicySet},
    route_options::RouteOptionsPlugin,
    virtual_host_options::VirtualHostOptionsPlugin,
};
use gateway_policy_controller_core::Registry;
use std::sync::Arc;

/// Builds the registry used by every translation run.
///
/// Plugins run in the order they are added here: built-in Gateway API
/// filters first, so that option policies see (and may conflict with) the
/// actions they set.
pub fn registry(policies: Arc<Policies>) -> Registry {
    Registry::builder()
        .with(BuiltinFilters::default())
        .with(RouteOptionsPlugin::new(policies.clone()))
        .with(VirtualHostOptionsPlugin::new(policies.clone()))
        .with(ListenerOptionsPlugin::new(policies))
        .with(AttachedRoutes::default())
        .build()
}
