use crate::{
    attachment::{Attachable, AttachmentIndex},
    target_ref::{ObjectRef, TargetRef},
};
use chrono::{offset::Utc, DateTime};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

/// The resources read by a single translation run.
///
/// An input value is never modified once built; a change to any watched
/// resource produces a new input.
#[derive(Debug, Default)]
pub struct TranslationInput {
    pub gateways: Vec<Arc<Gateway>>,
    pub http_routes: AttachmentIndex<HttpRoute>,
    pub services: BTreeMap<ObjectRef, Service>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gateway {
    pub id: ObjectRef,
    pub class_name: String,
    pub listeners: Vec<Listener>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listener {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub hostname: Option<String>,
    pub allowed_routes: AllowedRoutes,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Http,
    Https,
}

/// The namespaces from which routes may attach to a listener.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllowedRoutes {
    #[default]
    Same,
    All,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub id: ObjectRef,
    pub ports: BTreeSet<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRoute {
    pub id: ObjectRef,
    pub parent_refs: Vec<TargetRef>,
    pub hostnames: Vec<String>,
    pub rules: Vec<HttpRouteRule>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpRouteRule {
    pub name: Option<String>,
    pub matches: Vec<RouteMatch>,
    pub filters: Vec<RouteFilter>,
    pub backends: Vec<BackendRef>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteMatch {
    pub path: Option<PathMatch>,
    pub headers: Vec<HeaderMatch>,
    pub query_params: Vec<QueryParamMatch>,
    pub method: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeaderMatch {
    Exact(String, String),
    Regex(String, String),
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryParamMatch {
    Exact(String, String),
    Regex(String, String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteFilter {
    RequestHeaderModifier(HeaderModifier),
    ResponseHeaderModifier(HeaderModifier),
    RequestRedirect(RequestRedirect),
    UrlRewrite(UrlRewrite),
    ExtensionRef(LocalObjectRef),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeaderModifier {
    pub add: Vec<(String, String)>,
    pub set: Vec<(String, String)>,
    pub remove: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RequestRedirect {
    pub scheme: Option<String>,
    pub hostname: Option<String>,
    pub path: Option<PathModifier>,
    pub port: Option<u16>,
    pub status: Option<http::StatusCode>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct UrlRewrite {
    pub hostname: Option<String>,
    pub path: Option<PathModifier>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathModifier {
    Full(String),
    Prefix(String),
}

/// A reference to a resource in the same namespace as the referrer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalObjectRef {
    pub group: String,
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendRef {
    pub target: ObjectRef,
    pub port: Option<u16>,
    pub weight: u32,
}

// === impl TranslationInput ===

impl TranslationInput {
    pub fn gateway(&self, id: &ObjectRef) -> Option<&Arc<Gateway>> {
        self.gateways.iter().find(|gw| gw.id == *id)
    }
}

// === impl Gateway ===

impl Gateway {
    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.name == name)
    }

    pub fn has_listener(&self, name: &str) -> bool {
        self.listener(name).is_some()
    }
}

// === impl Listener ===

impl Listener {
    pub fn allows_namespace(&self, gateway_ns: &str, route_ns: &str) -> bool {
        match self.allowed_routes {
            AllowedRoutes::All => true,
            AllowedRoutes::Same => gateway_ns == route_ns,
        }
    }
}

// === impl RouteMatch ===

impl RouteMatch {
    /// The match used for rules that do not declare any.
    pub fn default_prefix() -> Self {
        Self {
            path: Some(PathMatch::Prefix("/".to_string())),
            ..Default::default()
        }
    }
}

// === impl HttpRoute ===

impl Attachable for HttpRoute {
    fn id(&self) -> &ObjectRef {
        &self.id
    }

    fn target_refs(&self) -> &[TargetRef] {
        &self.parent_refs
    }

    fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.creation_timestamp
    }
}

// === impl HeaderModifier ===

impl HeaderModifier {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.set.is_empty() && self.remove.is_empty()
    }

    /// Appends another modifier's edits after this one's.
    pub fn extend(&mut self, other: &HeaderModifier) {
        self.add.extend(other.add.iter().cloned());
        self.set.extend(other.set.iter().cloned());
        self.remove.extend(other.remove.iter().cloned());
    }
}

// === impl LocalObjectRef ===

impl LocalObjectRef {
    pub fn is_kind(&self, group: &str, kind: &str) -> bool {
        self.group.eq_ignore_ascii_case(group) && self.kind.eq_ignore_ascii_case(kind)
    }

    pub fn in_namespace(&self, namespace: &str) -> ObjectRef {
        ObjectRef::new(&self.group, &self.kind, namespace, &self.name)
    }
}
