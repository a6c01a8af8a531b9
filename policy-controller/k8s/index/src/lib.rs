//! Gateway policy controller index
//!
//! The index holds the Gateway API resources and option policies watched by
//! the controller, converted into the translator's model:
//!
//! - `Gateway`s of the configured class, with their listeners;
//! - `HTTPRoute`s, which attach to Gateways (or listeners) through parent
//!   refs;
//! - `Service`s, which routes name as backends;
//! - `RouteOption`, `VirtualHostOption` and `ListenerOption` policies.
//!
//! Every change to a watched resource publishes a new [`Snapshot`]. A snapshot
//! is never modified once published, so a translation run always observes a
//! consistent set of resources.
//!
//! Resources that cannot be converted (e.g. a route with an invalid regular
//! expression) are logged and left out of the index.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod gateway;
pub mod metrics;
mod policy;
mod routes;

#[cfg(test)]
mod tests;

pub use self::{
    gateway::{convert_gateway, convert_service},
    policy::{convert_listener_option, convert_route_option, convert_virtual_host_option},
    routes::convert_route,
};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use gateway_policy_controller_core::{
    gateway::{Gateway, HttpRoute, Service, TranslationInput},
    ObjectRef,
};
use gateway_policy_controller_k8s_api::{self as k8s, ResourceExt};
use gateway_policy_controller_plugins::{
    policy::{ListenerOption, RouteOption, VirtualHostOption},
    Policies,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

pub type SharedIndex = Arc<RwLock<Index>>;

/// The inputs of one translation run.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub input: TranslationInput,
    pub policies: Arc<Policies>,
}

#[derive(Debug)]
pub struct Index {
    gateway_class: String,

    gateways: HashMap<ObjectRef, Arc<Gateway>>,
    http_routes: HashMap<ObjectRef, Arc<HttpRoute>>,
    services: HashMap<ObjectRef, Service>,
    route_options: HashMap<ObjectRef, Arc<RouteOption>>,
    virtual_host_options: HashMap<ObjectRef, Arc<VirtualHostOption>>,
    listener_options: HashMap<ObjectRef, Arc<ListenerOption>>,

    snapshots: watch::Sender<Arc<Snapshot>>,
}

// === impl Index ===

impl Index {
    /// Creates an index of the Gateways of `gateway_class`, returning a
    /// receiver of its snapshots.
    pub fn shared(gateway_class: impl Into<String>) -> (SharedIndex, watch::Receiver<Arc<Snapshot>>) {
        let (snapshots, rx) = watch::channel(Arc::new(Snapshot::default()));
        let index = Self {
            gateway_class: gateway_class.into(),
            gateways: HashMap::default(),
            http_routes: HashMap::default(),
            services: HashMap::default(),
            route_options: HashMap::default(),
            virtual_host_options: HashMap::default(),
            listener_options: HashMap::default(),
            snapshots,
        };
        (Arc::new(RwLock::new(index)), rx)
    }

    fn publish(&self) {
        let input = TranslationInput {
            gateways: self.gateways.values().cloned().collect(),
            http_routes: self.http_routes.values().cloned().collect(),
            services: self
                .services
                .iter()
                .map(|(id, svc)| (id.clone(), svc.clone()))
                .collect(),
        };
        let policies = Policies {
            route_options: self.route_options.values().cloned().collect(),
            virtual_host_options: self.virtual_host_options.values().cloned().collect(),
            listener_options: self.listener_options.values().cloned().collect(),
        };
        tracing::trace!(
            gateways = input.gateways.len(),
            services = input.services.len(),
            "Publishing snapshot"
        );
        self.snapshots.send_replace(Arc::new(Snapshot {
            input,
            policies: Arc::new(policies),
        }));
    }
}

/// Replaces the indexed value for `id`, or removes it if the resource could
/// not be converted. Returns true if the index changed.
fn update<T>(
    index: &mut HashMap<ObjectRef, T>,
    id: ObjectRef,
    converted: Result<T>,
) -> bool {
    match converted {
        Ok(value) => {
            index.insert(id, value);
            true
        }
        Err(error) => {
            tracing::info!(
                %error,
                ns = %id.namespace,
                name = %id.name,
                kind = %id.kind,
                "Ignoring {}",
                id.kind,
            );
            index.remove(&id).is_some()
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::gateway::Gateway> for Index {
    fn apply(&mut self, gateway: k8s::gateway::Gateway) {
        let id = ObjectRef::gateway(gateway.namespace().unwrap_or_default(), gateway.name_unchecked());
        if gateway.spec.gateway_class_name != self.gateway_class {
            tracing::debug!(
                ns = %id.namespace,
                name = %id.name,
                class = %gateway.spec.gateway_class_name,
                "Ignoring Gateway of another class"
            );
            if self.gateways.remove(&id).is_some() {
                self.publish();
            }
            return;
        }

        let converted = convert_gateway(gateway).map(Arc::new);
        if update(&mut self.gateways, id, converted) {
            self.publish();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.gateways.remove(&ObjectRef::gateway(namespace, name)).is_some() {
            self.publish();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::gateway::HttpRoute> for Index {
    fn apply(&mut self, route: k8s::gateway::HttpRoute) {
        let id = ObjectRef::http_route(route.namespace().unwrap_or_default(), route.name_unchecked());
        let converted = convert_route(route).map(Arc::new);
        if update(&mut self.http_routes, id, converted) {
            self.publish();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.http_routes.remove(&ObjectRef::http_route(namespace, name)).is_some() {
            self.publish();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::Service> for Index {
    fn apply(&mut self, service: k8s::Service) {
        let id = ObjectRef::service(service.namespace().unwrap_or_default(), service.name_unchecked());
        if update(&mut self.services, id, convert_service(service)) {
            self.publish();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        if self.services.remove(&ObjectRef::service(namespace, name)).is_some() {
            self.publish();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::policy::RouteOption> for Index {
    fn apply(&mut self, option: k8s::policy::RouteOption) {
        let id = RouteOption::object_ref(option.namespace().unwrap_or_default(), option.name_unchecked());
        let converted = convert_route_option(option).map(Arc::new);
        if update(&mut self.route_options, id, converted) {
            self.publish();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = RouteOption::object_ref(namespace, name);
        if self.route_options.remove(&id).is_some() {
            self.publish();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::policy::VirtualHostOption> for Index {
    fn apply(&mut self, option: k8s::policy::VirtualHostOption) {
        let id = VirtualHostOption::object_ref(
            option.namespace().unwrap_or_default(),
            option.name_unchecked(),
        );
        let converted = convert_virtual_host_option(option).map(Arc::new);
        if update(&mut self.virtual_host_options, id, converted) {
            self.publish();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = VirtualHostOption::object_ref(namespace, name);
        if self.virtual_host_options.remove(&id).is_some() {
            self.publish();
        }
    }
}

impl kubert::index::IndexNamespacedResource<k8s::policy::ListenerOption> for Index {
    fn apply(&mut self, option: k8s::policy::ListenerOption) {
        let id = ListenerOption::object_ref(
            option.namespace().unwrap_or_default(),
            option.name_unchecked(),
        );
        let converted = convert_listener_option(option).map(Arc::new);
        if update(&mut self.listener_options, id, converted) {
            self.publish();
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ListenerOption::object_ref(namespace, name);
        if self.listener_options.remove(&id).is_some() {
            self.publish();
        }
    }
}
