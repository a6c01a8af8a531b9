//! Conditions accumulated over one translation run.
//!
//! Each unit of translation writes through its own [`Reporter`], scoped to a
//! resource and optionally to one of its parents. Reporters are merged into
//! the run's [`ReportMap`] once the unit completes. A scope without
//! conditions is healthy.

use crate::target_ref::{AttachmentKey, ObjectRef};
use std::{collections::BTreeMap, fmt};

pub mod condition_type {
    pub const ACCEPTED: &str = "Accepted";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    pub const PROGRAMMED: &str = "Programmed";
    pub const PARTIALLY_INVALID: &str = "PartiallyInvalid";
}

pub mod reason {
    pub const ACCEPTED: &str = "Accepted";
    pub const RESOLVED_REFS: &str = "ResolvedRefs";
    pub const PROGRAMMED: &str = "Programmed";
    pub const BACKEND_NOT_FOUND: &str = "BackendNotFound";
    pub const INCOMPATIBLE_FILTERS: &str = "IncompatibleFilters";
    pub const NO_MATCHING_PARENT: &str = "NoMatchingParent";
    pub const NO_MATCHING_LISTENER_HOSTNAME: &str = "NoMatchingListenerHostname";
    pub const NOT_ALLOWED_BY_LISTENERS: &str = "NotAllowedByListeners";
    pub const UNSUPPORTED_VALUE: &str = "UnsupportedValue";
    pub const INVALID: &str = "Invalid";
    pub const CONFLICTED: &str = "Conflicted";
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

/// Identifies what a set of conditions describes: a resource, or a resource
/// relative to one of its parents (e.g. a route's parent Gateway listener).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeKey {
    pub resource: ObjectRef,
    pub parent: Option<AttachmentKey>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeReport {
    conditions: BTreeMap<String, Condition>,
    attached_routes: Option<u32>,
}

/// Collects conditions for exactly one scope during one run.
#[derive(Debug)]
pub struct Reporter {
    scope: ScopeKey,
    report: ScopeReport,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportMap {
    scopes: BTreeMap<ScopeKey, ScopeReport>,
}

// === impl ConditionStatus ===

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Condition ===

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

// === impl ScopeKey ===

impl ScopeKey {
    pub fn resource(resource: ObjectRef) -> Self {
        Self {
            resource,
            parent: None,
        }
    }

    pub fn parent(resource: ObjectRef, parent: AttachmentKey) -> Self {
        Self {
            resource,
            parent: Some(parent),
        }
    }

    /// The scope of a single Gateway listener.
    pub fn listener(gateway: &ObjectRef, listener: &str) -> Self {
        Self::parent(
            gateway.clone(),
            AttachmentKey::section(gateway.clone(), listener),
        )
    }

    /// Returns the listener name if this is a listener scope.
    pub fn listener_name(&self) -> Option<&str> {
        match &self.parent {
            Some(AttachmentKey { target, section }) if *target == self.resource => {
                section.as_deref()
            }
            _ => None,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource)?;
        if let Some(parent) = &self.parent {
            write!(f, " (parent {}", parent.target)?;
            if let Some(section) = parent.section.as_deref() {
                write!(f, ":{section}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

// === impl ScopeReport ===

impl ScopeReport {
    /// Sets a condition, replacing any previous condition of the same type.
    pub fn set_condition(&mut self, condition: Condition) {
        self.conditions.insert(condition.type_.clone(), condition);
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.get(type_)
    }

    /// Iterates over conditions, ordered by type.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.conditions.values()
    }

    pub fn set_attached_routes(&mut self, count: u32) {
        self.attached_routes = Some(count);
    }

    pub fn attached_routes(&self) -> Option<u32> {
        self.attached_routes
    }

    /// A scope is healthy unless one of its conditions is explicitly false.
    pub fn is_healthy(&self) -> bool {
        self.conditions.values().all(|c| match c.type_.as_str() {
            // This condition is reported positively when something is wrong.
            condition_type::PARTIALLY_INVALID => c.status != ConditionStatus::True,
            _ => c.status != ConditionStatus::False,
        })
    }

    fn merge(&mut self, other: ScopeReport) {
        for condition in other.conditions.into_values() {
            self.set_condition(condition);
        }
        if let Some(count) = other.attached_routes {
            self.attached_routes = Some(count);
        }
    }
}

// === impl Reporter ===

impl Reporter {
    pub fn new(scope: ScopeKey) -> Self {
        Self {
            scope,
            report: ScopeReport::default(),
        }
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn set_condition(&mut self, condition: Condition) {
        tracing::debug!(
            scope = %self.scope,
            condition = %condition.type_,
            status = %condition.status,
            reason = %condition.reason,
            message = %condition.message,
            "Setting condition"
        );
        self.report.set_condition(condition);
    }

    pub fn set_attached_routes(&mut self, count: u32) {
        self.report.set_attached_routes(count);
    }

    pub fn report(&self) -> &ScopeReport {
        &self.report
    }
}

// === impl ReportMap ===

impl ReportMap {
    /// Merges a finished unit's reporter.
    ///
    /// The scope is recorded even when no conditions were set so that status
    /// writers know the resource was translated in this run.
    pub fn merge(&mut self, reporter: Reporter) {
        let Reporter { scope, report } = reporter;
        self.scopes.entry(scope).or_default().merge(report);
    }

    pub fn extend(&mut self, reporters: impl IntoIterator<Item = Reporter>) {
        for reporter in reporters {
            self.merge(reporter);
        }
    }

    pub fn get(&self, scope: &ScopeKey) -> Option<&ScopeReport> {
        self.scopes.get(scope)
    }

    /// Returns the report for a scope, creating an empty one if needed.
    pub fn scope_mut(&mut self, scope: ScopeKey) -> &mut ScopeReport {
        self.scopes.entry(scope).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScopeKey, &ScopeReport)> {
        self.scopes.iter()
    }

    /// Iterates over every scope that describes `resource`.
    pub fn for_resource<'a>(
        &'a self,
        resource: &'a ObjectRef,
    ) -> impl Iterator<Item = (&'a ScopeKey, &'a ScopeReport)> + 'a {
        self.scopes
            .iter()
            .filter(move |(scope, _)| scope.resource == *resource)
    }

    /// Iterates over the distinct resources with at least one scope.
    pub fn resources(&self) -> impl Iterator<Item = &ObjectRef> {
        let mut last = None;
        self.scopes.keys().filter_map(move |scope| {
            if last == Some(&scope.resource) {
                return None;
            }
            last = Some(&scope.resource);
            Some(&scope.resource)
        })
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
