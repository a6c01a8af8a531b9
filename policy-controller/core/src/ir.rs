//! The proxy-facing intermediate representation produced by translation.

use crate::{
    filter_stage::{StagedFilter, TypedConfig},
    gateway::{HeaderModifier, Protocol, RequestRedirect, RouteMatch, UrlRewrite},
    target_ref::ObjectRef,
};
pub use http::StatusCode;
use std::{collections::BTreeMap, time::Duration};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayIr {
    pub gateway: ObjectRef,
    pub listeners: Vec<ListenerIr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerIr {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub virtual_hosts: Vec<VirtualHostIr>,
    /// The listener's HTTP filter chain, in order.
    pub http_filters: Vec<StagedFilter>,
    pub per_connection_buffer_limit_bytes: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VirtualHostIr {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<RouteIr>,
    pub request_headers: HeaderModifier,
    pub response_headers: HeaderModifier,
    pub retry: Option<RetryPolicy>,
    pub typed_per_filter_config: BTreeMap<String, TypedConfig>,
    /// Filters that must be present in the listener chain for this virtual
    /// host's configuration to take effect.
    pub required_filters: Vec<StagedFilter>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteIr {
    pub name: String,
    pub source: ObjectRef,
    pub matcher: RouteMatch,
    /// Unset until a backend, redirect or direct response is chosen.
    pub action: Option<Action>,
    pub rewrite: Option<UrlRewrite>,
    pub request_headers: HeaderModifier,
    pub response_headers: HeaderModifier,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub typed_per_filter_config: BTreeMap<String, TypedConfig>,
    /// Filters that must be present in the listener chain for this route's
    /// configuration to take effect.
    pub required_filters: Vec<StagedFilter>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Forward(Vec<WeightedBackend>),
    Redirect(RequestRedirect),
    DirectResponse(DirectResponse),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightedBackend {
    pub service: ObjectRef,
    pub port: u16,
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectResponse {
    pub status: StatusCode,
    pub body: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub per_try_timeout: Option<Duration>,
    pub retry_on: Vec<String>,
}

// === impl Action ===

impl Action {
    /// The fail-closed action used in place of any output that could not be
    /// translated.
    pub fn internal_error() -> Self {
        Self::DirectResponse(DirectResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: None,
        })
    }

    pub fn is_internal_error(&self) -> bool {
        *self == Self::internal_error()
    }
}

// === impl RouteIr ===

impl RouteIr {
    pub fn new(name: impl Into<String>, source: ObjectRef, matcher: RouteMatch) -> Self {
        Self {
            name: name.into(),
            source,
            matcher,
            action: None,
            rewrite: None,
            request_headers: HeaderModifier::default(),
            response_headers: HeaderModifier::default(),
            timeout: None,
            retry: None,
            typed_per_filter_config: BTreeMap::new(),
            required_filters: Vec::new(),
        }
    }

    /// Replaces the route with the internal error sentinel, keeping only its
    /// identity and matcher.
    pub fn fail(&mut self) {
        let name = std::mem::take(&mut self.name);
        let matcher = std::mem::replace(&mut self.matcher, RouteMatch::default_prefix());
        let mut failed = Self::new(name, self.source.clone(), matcher);
        failed.action = Some(Action::internal_error());
        *self = failed;
    }

    pub fn is_failed(&self) -> bool {
        self.action.as_ref().is_some_and(Action::is_internal_error)
    }
}

// === impl VirtualHostIr ===

impl VirtualHostIr {
    /// Fails every route and drops the virtual host's own configuration.
    pub fn fail(&mut self) {
        let Self {
            name,
            domains,
            mut routes,
            ..
        } = std::mem::take(self);
        for route in &mut routes {
            route.fail();
        }
        *self = Self {
            name,
            domains,
            routes,
            ..Default::default()
        };
    }
}

// === impl ListenerIr ===

impl ListenerIr {
    /// Fails every virtual host. Filters only required by the failed
    /// configuration are removed from the chain.
    pub fn fail(&mut self) {
        for vh in &mut self.virtual_hosts {
            vh.fail();
        }
        self.http_filters.clear();
        self.per_connection_buffer_limit_bytes = None;
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteIr> {
        self.virtual_hosts.iter().flat_map(|vh| vh.routes.iter())
    }
}
