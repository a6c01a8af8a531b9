//! Builds resource statuses from the reports of a translation run.
//!
//! Positive conditions are implied: a scope reports only what went wrong, and
//! every condition type a resource is expected to carry is filled in as
//! `True` when the scope did not set it. A condition keeps its previous
//! `lastTransitionTime` unless its status changed.

use chrono::{DateTime, Utc};
use gateway_policy_controller_core::{
    report::{condition_type, reason, ScopeReport},
    target_ref::GATEWAY_API_GROUP,
    AttachmentKey, ObjectRef, ReportMap, ScopeKey,
};
use gateway_policy_controller_k8s_api::{
    self as k8s,
    gateway::{
        GatewayStatus, HttpRouteStatus, ListenerStatus, ParentReference, RouteGroupKind,
        RouteParentStatus,
    },
    policy::PolicyStatus,
};

const ROUTE_CONDITIONS: &[(&str, &str)] = &[
    (condition_type::ACCEPTED, reason::ACCEPTED),
    (condition_type::RESOLVED_REFS, reason::RESOLVED_REFS),
];

const GATEWAY_CONDITIONS: &[(&str, &str)] = &[
    (condition_type::ACCEPTED, reason::ACCEPTED),
    (condition_type::PROGRAMMED, reason::PROGRAMMED),
];

const LISTENER_CONDITIONS: &[(&str, &str)] = &[
    (condition_type::ACCEPTED, reason::ACCEPTED),
    (condition_type::PROGRAMMED, reason::PROGRAMMED),
    (condition_type::RESOLVED_REFS, reason::RESOLVED_REFS),
];

const POLICY_CONDITIONS: &[(&str, &str)] = &[(condition_type::ACCEPTED, reason::ACCEPTED)];

/// The time and generation stamped on new conditions.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Stamp {
    pub now: DateTime<Utc>,
    pub generation: Option<i64>,
}

pub(crate) fn gateway_status(
    id: &ObjectRef,
    reports: &ReportMap,
    current: Option<&GatewayStatus>,
    stamp: Stamp,
) -> GatewayStatus {
    let existing = current.map(|s| s.conditions.as_slice()).unwrap_or_default();

    let mut conditions = conditions(
        reports.get(&ScopeKey::resource(id.clone())),
        GATEWAY_CONDITIONS,
        existing,
        stamp,
    );
    // Conditions of types this controller does not manage are left as-is.
    conditions.extend(
        existing
            .iter()
            .filter(|c| !GATEWAY_CONDITIONS.iter().any(|(t, _)| *t == c.type_))
            .cloned(),
    );
    conditions.sort_by(|a, b| a.type_.cmp(&b.type_));

    let listeners = reports
        .for_resource(id)
        .filter_map(|(scope, report)| {
            let name = scope.listener_name()?;
            let existing = current
                .and_then(|s| s.listeners.iter().find(|l| l.name == name))
                .map(|l| l.conditions.as_slice())
                .unwrap_or_default();
            Some(ListenerStatus {
                name: name.to_string(),
                attached_routes: report
                    .attached_routes()
                    .map(|n| i32::try_from(n).unwrap_or(i32::MAX))
                    .unwrap_or(0),
                supported_kinds: vec![RouteGroupKind {
                    group: Some(GATEWAY_API_GROUP.to_string()),
                    kind: "HTTPRoute".to_string(),
                }],
                conditions: self::conditions(Some(report), LISTENER_CONDITIONS, existing, stamp),
            })
        })
        .collect();

    GatewayStatus {
        conditions,
        listeners,
    }
}

/// Builds an HTTPRoute's status with one entry per parent this controller
/// reported on. Parent entries written by other controllers are kept.
pub(crate) fn http_route_status(
    id: &ObjectRef,
    controller_name: &str,
    reports: &ReportMap,
    current: Option<&HttpRouteStatus>,
    stamp: Stamp,
) -> HttpRouteStatus {
    let current = current.map(|s| s.parents.as_slice()).unwrap_or_default();

    let mut parents = current
        .iter()
        .filter(|p| p.controller_name != controller_name)
        .cloned()
        .collect::<Vec<_>>();

    for (scope, report) in reports.for_resource(id) {
        let Some(parent) = scope.parent.as_ref() else {
            continue;
        };
        let parent_ref = parent_ref(parent);
        let existing = current
            .iter()
            .find(|p| p.controller_name == controller_name && p.parent_ref == parent_ref)
            .map(|p| p.conditions.as_slice())
            .unwrap_or_default();
        parents.push(RouteParentStatus {
            conditions: self::conditions(Some(report), ROUTE_CONDITIONS, existing, stamp),
            parent_ref,
            controller_name: controller_name.to_string(),
        });
    }

    HttpRouteStatus { parents }
}

pub(crate) fn policy_status(
    id: &ObjectRef,
    reports: &ReportMap,
    current: Option<&PolicyStatus>,
    stamp: Stamp,
) -> PolicyStatus {
    let existing = current.map(|s| s.conditions.as_slice()).unwrap_or_default();
    PolicyStatus {
        conditions: conditions(
            reports.get(&ScopeKey::resource(id.clone())),
            POLICY_CONDITIONS,
            existing,
            stamp,
        ),
    }
}

fn parent_ref(AttachmentKey { target, section }: &AttachmentKey) -> ParentReference {
    ParentReference {
        group: Some(target.group.clone()),
        kind: Some(target.kind.clone()),
        namespace: Some(target.namespace.clone()),
        name: target.name.clone(),
        section_name: section.clone(),
        port: None,
    }
}

/// Converts a scope's conditions, filling in the implied positive ones.
fn conditions(
    report: Option<&ScopeReport>,
    defaults: &[(&str, &str)],
    existing: &[k8s::Condition],
    Stamp { now, generation }: Stamp,
) -> Vec<k8s::Condition> {
    let mut conditions = report
        .into_iter()
        .flat_map(|r| r.conditions())
        .map(|c| (c.type_.clone(), c.status.to_string(), c.reason.clone(), c.message.clone()))
        .collect::<Vec<_>>();
    for (type_, reason) in defaults {
        if !conditions.iter().any(|(t, ..)| t == type_) {
            conditions.push((
                type_.to_string(),
                "True".to_string(),
                reason.to_string(),
                String::new(),
            ));
        }
    }
    conditions.sort_by(|a, b| a.0.cmp(&b.0));

    conditions
        .into_iter()
        .map(|(type_, status, reason, message)| {
            let last_transition_time = existing
                .iter()
                .find(|c| c.type_ == type_ && c.status == status)
                .map(|c| c.last_transition_time.clone())
                .unwrap_or(k8s::Time(now));
            k8s::Condition {
                last_transition_time,
                message,
                observed_generation: generation,
                reason,
                status,
                type_,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_policy_controller_core::{Condition, ConditionStatus, Reporter};
    use pretty_assertions::assert_eq;

    fn stamp() -> Stamp {
        Stamp {
            now: DateTime::<Utc>::MIN_UTC,
            generation: Some(3),
        }
    }

    fn k8s_condition(type_: &str, status: &str, reason: &str, message: &str) -> k8s::Condition {
        k8s::Condition {
            last_transition_time: k8s::Time(DateTime::<Utc>::MIN_UTC),
            message: message.to_string(),
            observed_generation: Some(3),
            reason: reason.to_string(),
            status: status.to_string(),
            type_: type_.to_string(),
        }
    }

    #[test]
    fn route_parents_fill_in_positive_conditions() {
        let route = ObjectRef::http_route("apps", "web");
        let gw = ObjectRef::gateway("apps", "gw");
        let mut reporter = Reporter::new(ScopeKey::parent(
            route.clone(),
            AttachmentKey::section(gw.clone(), "http"),
        ));
        reporter.set_condition(Condition::new(
            condition_type::RESOLVED_REFS,
            ConditionStatus::False,
            reason::BACKEND_NOT_FOUND,
            "Service apps/missing not found",
        ));
        let mut reports = ReportMap::default();
        reports.merge(reporter);

        let foreign = RouteParentStatus {
            parent_ref: ParentReference {
                name: "mesh".to_string(),
                ..Default::default()
            },
            controller_name: "example.com/other".to_string(),
            conditions: vec![],
        };
        let current = HttpRouteStatus {
            parents: vec![foreign.clone()],
        };

        let status = http_route_status(
            &route,
            "policy.gateway.io/controller",
            &reports,
            Some(&current),
            stamp(),
        );

        assert_eq!(
            status.parents,
            vec![
                foreign,
                RouteParentStatus {
                    parent_ref: ParentReference {
                        group: Some(GATEWAY_API_GROUP.to_string()),
                        kind: Some("Gateway".to_string()),
                        namespace: Some("apps".to_string()),
                        name: "gw".to_string(),
                        section_name: Some("http".to_string()),
                        port: None,
                    },
                    controller_name: "policy.gateway.io/controller".to_string(),
                    conditions: vec![
                        k8s_condition("Accepted", "True", "Accepted", ""),
                        k8s_condition(
                            "ResolvedRefs",
                            "False",
                            "BackendNotFound",
                            "Service apps/missing not found"
                        ),
                    ],
                },
            ]
        );
    }

    #[test]
    fn unchanged_conditions_keep_their_transition_time() {
        let policy = ObjectRef::new("policy.gateway.io", "RouteOption", "apps", "opts");
        let mut reports = ReportMap::default();
        reports.merge(Reporter::new(ScopeKey::resource(policy.clone())));

        let earlier = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut accepted = k8s_condition("Accepted", "True", "Accepted", "");
        accepted.last_transition_time = k8s::Time(earlier);
        accepted.observed_generation = Some(2);
        let current = PolicyStatus {
            conditions: vec![accepted],
        };

        let status = policy_status(&policy, &reports, Some(&current), stamp());
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time, k8s::Time(earlier));
        assert_eq!(status.conditions[0].observed_generation, Some(3));

        // A status change resets the transition time.
        let mut reporter = Reporter::new(ScopeKey::resource(policy.clone()));
        reporter.set_condition(Condition::new(
            condition_type::ACCEPTED,
            ConditionStatus::False,
            reason::INVALID,
            "fault percentage 150 exceeds 100",
        ));
        reports.merge(reporter);
        let status = policy_status(&policy, &reports, Some(&current), stamp());
        assert_eq!(
            status.conditions,
            vec![k8s_condition(
                "Accepted",
                "False",
                "Invalid",
                "fault percentage 150 exceeds 100"
            )]
        );
    }

    #[test]
    fn gateways_report_listeners_and_keep_foreign_conditions() {
        let gw = ObjectRef::gateway("apps", "gw");
        let mut reports = ReportMap::default();
        reports.merge(Reporter::new(ScopeKey::resource(gw.clone())));
        let mut listener = Reporter::new(ScopeKey::listener(&gw, "http"));
        listener.set_attached_routes(2);
        reports.merge(listener);

        let current = GatewayStatus {
            conditions: vec![k8s_condition("Ready", "True", "Ready", "")],
            listeners: vec![],
        };

        let status = gateway_status(&gw, &reports, Some(&current), stamp());
        assert_eq!(
            status.conditions,
            vec![
                k8s_condition("Accepted", "True", "Accepted", ""),
                k8s_condition("Programmed", "True", "Programmed", ""),
                k8s_condition("Ready", "True", "Ready", ""),
            ]
        );
        assert_eq!(status.listeners.len(), 1);
        assert_eq!(status.listeners[0].name, "http");
        assert_eq!(status.listeners[0].attached_routes, 2);
        assert_eq!(
            status.listeners[0]
                .conditions
                .iter()
                .map(|c| c.type_.as_str())
                .collect::<Vec<_>>(),
            vec!["Accepted", "Programmed", "ResolvedRefs"]
        );
    }
}
