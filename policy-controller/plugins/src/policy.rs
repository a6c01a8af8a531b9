//! Option policies that attach to routes, gateways and listeners.

use chrono::{offset::Utc, DateTime};
use gateway_policy_controller_core::{
    gateway::HeaderModifier,
    ir::{DirectResponse, RetryPolicy},
    Attachable, AttachmentIndex, ObjectRef, PluginError, TargetRef,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

pub const POLICY_GROUP: &str = "policy.gateway.io";
pub const ROUTE_OPTION_KIND: &str = "RouteOption";
pub const VIRTUAL_HOST_OPTION_KIND: &str = "VirtualHostOption";
pub const LISTENER_OPTION_KIND: &str = "ListenerOption";

/// An option policy: a set of options of type `O` along with the targets it
/// attaches to.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy<O> {
    pub id: ObjectRef,
    pub target_refs: Vec<TargetRef>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub options: O,
}

/// A kind of option policy.
pub trait Options {
    const KIND: &'static str;
}

pub type RouteOption = Policy<RouteOptions>;
pub type VirtualHostOption = Policy<VirtualHostOptions>;
pub type ListenerOption = Policy<ListenerOptions>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteOptions {
    pub fault: Option<FaultInjection>,
    pub cors: Option<CorsPolicy>,
    pub timeout: Option<Duration>,
    pub retries: Option<RetryPolicy>,
    pub prefix_rewrite: Option<String>,
    pub direct_response: Option<DirectResponse>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualHostOptions {
    pub retries: Option<RetryPolicy>,
    pub cors: Option<CorsPolicy>,
    pub request_headers: Option<HeaderModifier>,
    pub response_headers: Option<HeaderModifier>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListenerOptions {
    pub per_connection_buffer_limit_bytes: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultInjection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort: Option<FaultAbort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<FaultDelay>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultAbort {
    pub percentage: u32,
    pub http_status: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultDelay {
    pub percentage: u32,
    pub fixed_delay: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    pub allow_origins: Vec<String>,
    pub allow_origin_regex: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<Duration>,
    pub allow_credentials: bool,
}

/// The policies of one kind, indexed both by target and by identity.
///
/// Policies without any target refs are only reachable by identity, e.g.
/// through a route's extension ref.
#[derive(Debug)]
pub struct PolicySet<O> {
    by_target: AttachmentIndex<Policy<O>>,
    by_id: BTreeMap<ObjectRef, Arc<Policy<O>>>,
}

/// Every option policy known to a translation run.
#[derive(Debug, Default)]
pub struct Policies {
    pub route_options: PolicySet<RouteOptions>,
    pub virtual_host_options: PolicySet<VirtualHostOptions>,
    pub listener_options: PolicySet<ListenerOptions>,
}

/// Takes each field of `from` that is unset in `into`. Returns true if any
/// field was taken.
macro_rules! merge_fields {
    ($into:expr, $from:expr, $($field:ident),+ $(,)?) => {{
        let mut taken = false;
        $(
            if $into.$field.is_none() && $from.$field.is_some() {
                $into.$field = $from.$field.clone();
                taken = true;
            }
        )+
        taken
    }};
}

// === impl Policy ===

impl<O: Options> Policy<O> {
    /// Identifies a policy of this kind.
    pub fn object_ref(namespace: impl Into<String>, name: impl Into<String>) -> ObjectRef {
        ObjectRef::new(POLICY_GROUP, O::KIND, namespace, name)
    }
}

impl<O> Attachable for Policy<O> {
    fn id(&self) -> &ObjectRef {
        &self.id
    }

    fn target_refs(&self) -> &[TargetRef] {
        &self.target_refs
    }

    fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.creation_timestamp
    }
}

// === impl RouteOptions ===

impl Options for RouteOptions {
    const KIND: &'static str = ROUTE_OPTION_KIND;
}

impl RouteOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow-merges a lower-precedence set of options into this one.
    pub fn merge_from(&mut self, other: &Self) -> bool {
        merge_fields!(
            self,
            other,
            fault,
            cors,
            timeout,
            retries,
            prefix_rewrite,
            direct_response,
        )
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        if let Some(fault) = &self.fault {
            fault.validate()?;
        }
        if let Some(cors) = &self.cors {
            cors.validate()?;
        }
        if let Some(retries) = &self.retries {
            validate_retries(retries)?;
        }
        if let Some(prefix) = &self.prefix_rewrite {
            if !prefix.starts_with('/') {
                return Err(PluginError::Malformed(format!(
                    "prefix rewrite {prefix:?} must start with '/'"
                )));
            }
        }
        Ok(())
    }
}

// === impl VirtualHostOptions ===

impl Options for VirtualHostOptions {
    const KIND: &'static str = VIRTUAL_HOST_OPTION_KIND;
}

impl VirtualHostOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shallow-merges a lower-precedence set of options into this one.
    pub fn merge_from(&mut self, other: &Self) -> bool {
        merge_fields!(self, other, retries, cors, request_headers, response_headers)
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        if let Some(cors) = &self.cors {
            cors.validate()?;
        }
        if let Some(retries) = &self.retries {
            validate_retries(retries)?;
        }
        Ok(())
    }
}

// === impl ListenerOptions ===

impl Options for ListenerOptions {
    const KIND: &'static str = LISTENER_OPTION_KIND;
}

impl ListenerOptions {
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.per_connection_buffer_limit_bytes == Some(0) {
            return Err(PluginError::Malformed(
                "perConnectionBufferLimitBytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// === impl FaultInjection ===

impl FaultInjection {
    fn validate(&self) -> Result<(), PluginError> {
        if self.abort.is_none() && self.delay.is_none() {
            return Err(PluginError::Malformed(
                "fault injection requires an abort or a delay".to_string(),
            ));
        }
        if let Some(abort) = &self.abort {
            validate_percentage(abort.percentage)?;
            if !(200..600).contains(&abort.http_status) {
                return Err(PluginError::Malformed(format!(
                    "fault abort status {} is not a valid HTTP status",
                    abort.http_status
                )));
            }
        }
        if let Some(delay) = &self.delay {
            validate_percentage(delay.percentage)?;
        }
        Ok(())
    }
}

fn validate_percentage(percentage: u32) -> Result<(), PluginError> {
    if percentage > 100 {
        return Err(PluginError::Malformed(format!(
            "fault percentage {percentage} exceeds 100"
        )));
    }
    Ok(())
}

fn validate_retries(retries: &RetryPolicy) -> Result<(), PluginError> {
    if retries.attempts == 0 {
        return Err(PluginError::Malformed(
            "retry policy requires at least one attempt".to_string(),
        ));
    }
    Ok(())
}

// === impl CorsPolicy ===

impl CorsPolicy {
    fn validate(&self) -> Result<(), PluginError> {
        if self.allow_origins.is_empty() && self.allow_origin_regex.is_empty() {
            return Err(PluginError::Malformed(
                "CORS policy must allow at least one origin".to_string(),
            ));
        }
        Ok(())
    }
}

// === impl PolicySet ===

impl<O> Default for PolicySet<O> {
    fn default() -> Self {
        Self {
            by_target: AttachmentIndex::default(),
            by_id: BTreeMap::new(),
        }
    }
}

impl<O> FromIterator<Arc<Policy<O>>> for PolicySet<O> {
    fn from_iter<I: IntoIterator<Item = Arc<Policy<O>>>>(iter: I) -> Self {
        let mut set = Self::default();
        for policy in iter {
            set.by_target.insert(policy.clone());
            set.by_id.insert(policy.id.clone(), policy);
        }
        set
    }
}

impl<O> PolicySet<O> {
    pub fn get(&self, id: &ObjectRef) -> Option<&Arc<Policy<O>>> {
        self.by_id.get(id)
    }

    /// Iterates over all policies, ordered by identity.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Policy<O>>> {
        self.by_id.values()
    }

    pub fn by_target(&self) -> &AttachmentIndex<Policy<O>> {
        &self.by_target
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
