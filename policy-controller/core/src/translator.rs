//! Translates gateways, their listeners and attached routes into the proxy
//! IR by folding each unit of work through the registered plugins.
//!
//! Plugin failures are confined to the unit being translated: the unit is
//! reported and replaced with a fail-closed sentinel while every sibling unit
//! translates normally. Only invariant violations abort a run.

use crate::{
    attachment::Attachment,
    filter_stage::{self, FilterConfig, FilterStage, StagedFilter, WellKnownStage},
    gateway::{
        Gateway, HttpRoute, HttpRouteRule, Listener, PathMatch, RouteMatch, TranslationInput,
    },
    ir::{Action, GatewayIr, ListenerIr, RouteIr, VirtualHostIr, WeightedBackend},
    plugin::{
        Applied, ListenerContext, PluginError, PostTranslationContext, Registered, Registry,
        RouteContext, VirtualHostContext,
    },
    report::{condition_type, reason, Condition, ConditionStatus, ReportMap, Reporter, ScopeKey},
    target_ref::{AttachmentKey, CORE_GROUP},
};
use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::{debug, debug_span, warn};

pub const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";

/// The terminal filter of every HTTP filter chain.
#[derive(Debug, Default, serde::Serialize)]
pub struct RouterFilter {}

#[derive(Debug)]
pub struct Translation {
    pub gateways: Vec<GatewayIr>,
    pub reports: ReportMap,
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("plugin {plugin} violated an invariant translating {scope}: {error}")]
    Invariant {
        plugin: &'static str,
        scope: String,
        #[source]
        error: PluginError,
    },
}

/// A translated route along with what is needed to order it within its
/// virtual host.
struct RouteEntry {
    route: Arc<HttpRoute>,
    rule_index: usize,
    match_index: usize,
    ir: RouteIr,
}

impl FilterConfig for RouterFilter {
    const TYPE_URL: &'static str =
        "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
}

/// Runs a full translation of `input`.
///
/// The returned report map is built from scratch: a scope without
/// conditions translated successfully in this run.
pub fn translate(
    registry: &Registry,
    input: &TranslationInput,
) -> Result<Translation, TranslateError> {
    let mut reports = ReportMap::default();

    let mut gateways = input.gateways.iter().collect::<Vec<_>>();
    gateways.sort_by(|a, b| a.id.cmp(&b.id));

    let mut translated = Vec::with_capacity(gateways.len());
    for gateway in gateways {
        let _span = debug_span!("gateway", gateway = %gateway.id).entered();
        translated.push(translate_gateway(registry, input, gateway, &mut reports)?);
    }

    report_unmatched_parents(input, &mut reports);

    let mut ctx = PostTranslationContext::new(input, &translated);
    for Registered { name, plugin } in registry.post_translation_plugins() {
        if let Err(error) = plugin.apply_post_translation(&mut ctx) {
            if error.is_invariant() {
                return Err(TranslateError::Invariant {
                    plugin: *name,
                    scope: "post-translation".to_string(),
                    error,
                });
            }
            warn!(plugin = %name, %error, "Post-translation plugin failed");
        }
    }
    reports.extend(ctx.into_reporters());

    for Registered { name, plugin } in registry.status_plugins() {
        if let Err(error) = plugin.apply_status(&mut reports, input) {
            if error.is_invariant() {
                return Err(TranslateError::Invariant {
                    plugin: *name,
                    scope: "status".to_string(),
                    error,
                });
            }
            warn!(plugin = %name, %error, "Status plugin failed");
        }
    }

    Ok(Translation {
        gateways: translated,
        reports,
    })
}

fn translate_gateway(
    registry: &Registry,
    input: &TranslationInput,
    gateway: &Gateway,
    reports: &mut ReportMap,
) -> Result<GatewayIr, TranslateError> {
    reports.merge(Reporter::new(ScopeKey::resource(gateway.id.clone())));

    // A route parent that targets the whole gateway is accepted if any
    // listener accepts it, so rejections are only reported once all listeners
    // have been considered.
    let mut attached = BTreeSet::new();
    let mut rejected = BTreeMap::new();

    let mut listeners = Vec::with_capacity(gateway.listeners.len());
    for listener in &gateway.listeners {
        let _span = debug_span!("listener", listener = %listener.name).entered();
        listeners.push(translate_listener(
            registry,
            input,
            gateway,
            listener,
            reports,
            &mut attached,
            &mut rejected,
        )?);
    }

    for (scope, condition) in rejected {
        if !attached.contains(&scope) {
            let mut reporter = Reporter::new(scope);
            reporter.set_condition(condition);
            reports.merge(reporter);
        }
    }

    Ok(GatewayIr {
        gateway: gateway.id.clone(),
        listeners,
    })
}

fn translate_listener(
    registry: &Registry,
    input: &TranslationInput,
    gateway: &Gateway,
    listener: &Listener,
    reports: &mut ReportMap,
    attached: &mut BTreeSet<ScopeKey>,
    rejected: &mut BTreeMap<ScopeKey, Condition>,
) -> Result<ListenerIr, TranslateError> {
    let listener_scope = ScopeKey::listener(&gateway.id, &listener.name);

    // A route may name the listener through several parent refs, e.g. the
    // whole gateway and the listener's section. It is translated once per
    // listener and reported on every parent that attached it.
    let mut accepted = Vec::<(Arc<HttpRoute>, Vec<String>, Vec<ScopeKey>)>::new();
    let mut by_route = BTreeMap::<_, usize>::new();
    let candidates = input
        .http_routes
        .resolve(&gateway.id, Some(&listener.name))
        .ordered();
    for Attachment {
        target,
        section,
        resource: route,
    } in candidates
    {
        let scope = ScopeKey::parent(
            route.id.clone(),
            AttachmentKey { target, section },
        );

        if !listener.allows_namespace(&gateway.id.namespace, &route.id.namespace) {
            rejected.entry(scope).or_insert_with(|| {
                Condition::new(
                    condition_type::ACCEPTED,
                    ConditionStatus::False,
                    reason::NOT_ALLOWED_BY_LISTENERS,
                    format!(
                        "Listener {} does not allow routes from namespace {}",
                        listener.name, route.id.namespace
                    ),
                )
            });
            continue;
        }

        let Some(hostnames) = intersect_hostnames(listener.hostname.as_deref(), &route.hostnames)
        else {
            rejected.entry(scope).or_insert_with(|| {
                Condition::new(
                    condition_type::ACCEPTED,
                    ConditionStatus::False,
                    reason::NO_MATCHING_LISTENER_HOSTNAME,
                    "No hostnames match the parent listener",
                )
            });
            continue;
        };
        attached.insert(scope.clone());
        reports.merge(Reporter::new(scope.clone()));

        match by_route.get(&route.id) {
            Some(&i) => accepted[i].2.push(scope),
            None => {
                by_route.insert(route.id.clone(), accepted.len());
                accepted.push((route, hostnames, vec![scope]));
            }
        }
    }

    let mut hosts = BTreeMap::<String, Vec<RouteEntry>>::new();
    for (route, hostnames, scopes) in accepted {
        for (rule_index, rule) in route.rules.iter().enumerate() {
            let matches: Vec<Option<&RouteMatch>> = if rule.matches.is_empty() {
                vec![None]
            } else {
                rule.matches.iter().map(Some).collect()
            };
            for (match_index, route_match) in matches.into_iter().enumerate() {
                let mut reporter = Reporter::new(scopes[0].clone());
                let ir = translate_route(
                    registry,
                    input,
                    RouteUnit {
                        gateway,
                        listener,
                        route: &route,
                        rule,
                        rule_index,
                        match_index,
                        route_match,
                    },
                    &mut reporter,
                )?;
                for scope in &scopes[1..] {
                    let mut copy = Reporter::new(scope.clone());
                    for condition in reporter.report().conditions() {
                        copy.set_condition(condition.clone());
                    }
                    reports.merge(copy);
                }
                reports.merge(reporter);

                for host in &hostnames {
                    hosts.entry(host.clone()).or_default().push(RouteEntry {
                        route: route.clone(),
                        rule_index,
                        match_index,
                        ir: ir.clone(),
                    });
                }
            }
        }
    }

    let mut virtual_hosts = Vec::with_capacity(hosts.len());
    for (host, mut entries) in hosts {
        entries.sort_by(route_precedence);
        let vh = VirtualHostIr {
            name: format!("{}~{}", listener.name, host),
            domains: vec![host],
            routes: entries.into_iter().map(|e| e.ir).collect(),
            ..Default::default()
        };

        let mut reporter = Reporter::new(listener_scope.clone());
        let mut ctx = VirtualHostContext {
            gateway,
            listener,
            reporter: &mut reporter,
        };
        let (vh, errors) = fold(
            registry.virtual_host_plugins(),
            &mut ctx,
            vh,
            |Registered { plugin, .. }, ctx, vh| plugin.apply_virtual_host(ctx, vh),
            VirtualHostIr::fail,
            |ctx| ctx.reporter.scope().to_string(),
        )?;
        report_errors(&mut reporter, &errors, false);
        reports.merge(reporter);
        virtual_hosts.push(vh);
    }

    let mut http_filters = Vec::new();
    for vh in &virtual_hosts {
        http_filters.extend(vh.required_filters.iter().cloned());
        for route in vh.routes.iter().filter(|r| !r.is_failed()) {
            http_filters.extend(route.required_filters.iter().cloned());
        }
    }
    let ir = ListenerIr {
        name: listener.name.clone(),
        port: listener.port,
        protocol: listener.protocol,
        virtual_hosts,
        http_filters,
        per_connection_buffer_limit_bytes: None,
    };

    let mut reporter = Reporter::new(listener_scope);
    let mut ctx = ListenerContext {
        gateway,
        listener,
        reporter: &mut reporter,
    };
    let (mut ir, errors) = fold(
        registry.listener_plugins(),
        &mut ctx,
        ir,
        |Registered { plugin, .. }, ctx, ir| plugin.apply_listener(ctx, ir),
        ListenerIr::fail,
        |ctx| ctx.reporter.scope().to_string(),
    )?;
    report_errors(&mut reporter, &errors, true);
    reports.merge(reporter);

    let router = StagedFilter::new(
        ROUTER_FILTER_NAME,
        &RouterFilter::default(),
        FilterStage::after(WellKnownStage::Route),
    )
    .map_err(|error| TranslateError::Invariant {
        plugin: "translator",
        scope: gateway.id.to_string(),
        error,
    })?;
    let mut filters = std::mem::take(&mut ir.http_filters);
    filters.push(router);
    ir.http_filters = filter_stage::sort_dedup(filters);

    debug!(
        virtual_hosts = ir.virtual_hosts.len(),
        filters = ir.http_filters.len(),
        "Translated listener"
    );
    Ok(ir)
}

struct RouteUnit<'a> {
    gateway: &'a Gateway,
    listener: &'a Listener,
    route: &'a HttpRoute,
    rule: &'a HttpRouteRule,
    rule_index: usize,
    match_index: usize,
    route_match: Option<&'a RouteMatch>,
}

fn translate_route(
    registry: &Registry,
    input: &TranslationInput,
    unit: RouteUnit<'_>,
    reporter: &mut Reporter,
) -> Result<RouteIr, TranslateError> {
    let RouteUnit {
        gateway,
        listener,
        route,
        rule,
        rule_index,
        match_index,
        route_match,
    } = unit;

    let name = format!(
        "{}-{}-rule-{rule_index}-match-{match_index}",
        route.id.namespace, route.id.name
    );
    let mut ir = RouteIr::new(
        name,
        route.id.clone(),
        route_match.cloned().unwrap_or_else(RouteMatch::default_prefix),
    );
    ir.timeout = rule.timeout;

    let mut errors = Vec::new();
    match resolve_backends(input, rule) {
        Ok(action) => ir.action = action,
        Err(error) => {
            ir.fail();
            errors.push(error);
        }
    }

    let mut ctx = RouteContext {
        gateway,
        listener,
        route,
        rule,
        rule_index,
        route_match,
        reporter: &mut *reporter,
    };
    let (mut ir, plugin_errors) = fold(
        registry.route_plugins(),
        &mut ctx,
        ir,
        |Registered { plugin, .. }, ctx, ir| plugin.apply_route(ctx, ir),
        RouteIr::fail,
        |ctx| ctx.reporter.scope().to_string(),
    )?;
    errors.extend(plugin_errors);

    if !errors.is_empty() {
        ir.fail();
        report_errors(reporter, &errors, false);
    } else if ir.action.is_none() {
        ir.fail();
        reporter.set_condition(Condition::new(
            condition_type::PARTIALLY_INVALID,
            ConditionStatus::True,
            reason::UNSUPPORTED_VALUE,
            format!("Dropped Rule: rule {rule_index} has no action specified"),
        ));
    }

    Ok(ir)
}

/// Threads `output` through every plugin in order.
///
/// A plugin error fails the output and is collected, and the remaining
/// plugins still run. The output is failed again after the fold so that
/// later plugins cannot resurrect it. Invariant violations stop the fold.
fn fold<P: ?Sized, C, T>(
    plugins: &[Registered<P>],
    ctx: &mut C,
    mut output: T,
    apply: impl Fn(&Registered<P>, &mut C, T) -> Applied<T>,
    fail: impl Fn(&mut T),
    describe: impl Fn(&C) -> String,
) -> Result<(T, Vec<PluginError>), TranslateError> {
    let mut errors = Vec::new();
    for registered in plugins {
        let Applied { output: next, result } = apply(registered, ctx, output);
        output = next;
        if let Err(error) = result {
            if error.is_invariant() {
                return Err(TranslateError::Invariant {
                    plugin: registered.name,
                    scope: describe(ctx),
                    error,
                });
            }
            debug!(plugin = %registered.name, %error, "Plugin failed");
            fail(&mut output);
            errors.push(error);
        }
    }
    if !errors.is_empty() {
        fail(&mut output);
    }
    Ok((output, errors))
}

/// Records one condition per condition type for a failed unit.
fn report_errors(reporter: &mut Reporter, errors: &[PluginError], listener: bool) {
    if errors.is_empty() {
        return;
    }

    let mut unresolved = Vec::new();
    let mut incompatible = Vec::new();
    for error in errors {
        match error {
            PluginError::NotFound(msg) => unresolved.push(msg.as_str()),
            PluginError::Conflict(msg) | PluginError::Malformed(msg) => {
                incompatible.push(msg.as_str())
            }
            PluginError::Invariant(_) => {}
        }
    }

    if !incompatible.is_empty() {
        reporter.set_condition(Condition::new(
            condition_type::ACCEPTED,
            ConditionStatus::False,
            reason::INCOMPATIBLE_FILTERS,
            incompatible.join("; "),
        ));
    }
    if !unresolved.is_empty() {
        reporter.set_condition(Condition::new(
            condition_type::RESOLVED_REFS,
            ConditionStatus::False,
            reason::BACKEND_NOT_FOUND,
            unresolved.join("; "),
        ));
    }
    if listener {
        let messages = errors.iter().map(ToString::to_string).collect::<Vec<_>>();
        reporter.set_condition(Condition::new(
            condition_type::PROGRAMMED,
            ConditionStatus::False,
            reason::INVALID,
            messages.join("; "),
        ));
    }
}

fn resolve_backends(
    input: &TranslationInput,
    rule: &HttpRouteRule,
) -> Result<Option<Action>, PluginError> {
    if rule.backends.is_empty() {
        return Ok(None);
    }

    let mut missing = Vec::new();
    let mut backends = Vec::with_capacity(rule.backends.len());
    for backend in &rule.backends {
        let target = &backend.target;
        if !target.is_kind(CORE_GROUP, "Service") {
            missing.push(format!("unsupported backend kind {}", target.kind));
            continue;
        }
        let Some(service) = input.services.get(target) else {
            missing.push(format!(
                "Service {}/{} not found",
                target.namespace, target.name
            ));
            continue;
        };
        let Some(port) = backend.port else {
            missing.push(format!(
                "backend Service {}/{} requires a port",
                target.namespace, target.name
            ));
            continue;
        };
        if !service.ports.contains(&port) {
            missing.push(format!(
                "Service {}/{} has no port {port}",
                target.namespace, target.name
            ));
            continue;
        }
        if backend.weight > 0 {
            backends.push(WeightedBackend {
                service: target.clone(),
                port,
                weight: backend.weight,
            });
        }
    }

    if !missing.is_empty() {
        return Err(PluginError::NotFound(missing.join("; ")));
    }

    // Every backend has a zero weight: no request may be forwarded.
    if backends.is_empty() {
        return Ok(Some(Action::internal_error()));
    }

    Ok(Some(Action::Forward(backends)))
}

fn report_unmatched_parents(input: &TranslationInput, reports: &mut ReportMap) {
    for gateway in &input.gateways {
        for Attachment {
            target,
            section,
            resource: route,
        } in input
            .http_routes
            .inert(&gateway.id, |s| gateway.has_listener(s))
        {
            let message = format!(
                "No listener named {} on Gateway {}/{}",
                section.as_deref().unwrap_or_default(),
                gateway.id.namespace,
                gateway.id.name
            );
            let mut reporter = Reporter::new(ScopeKey::parent(
                route.id.clone(),
                AttachmentKey { target, section },
            ));
            reporter.set_condition(Condition::new(
                condition_type::ACCEPTED,
                ConditionStatus::False,
                reason::NO_MATCHING_PARENT,
                message,
            ));
            reports.merge(reporter);
        }
    }
}

/// Returns the effective hostnames of a route on a listener, or `None` if
/// none intersect.
fn intersect_hostnames(listener: Option<&str>, route: &[String]) -> Option<Vec<String>> {
    let hosts = match (listener, route.is_empty()) {
        (None, true) => return Some(vec!["*".to_string()]),
        (Some(listener), true) => return Some(vec![listener.to_string()]),
        (None, false) => route.iter().cloned().collect::<BTreeSet<_>>(),
        (Some(listener), false) => route
            .iter()
            .filter_map(|host| intersect_hostname(listener, host))
            .collect::<BTreeSet<_>>(),
    };
    if hosts.is_empty() {
        return None;
    }
    Some(hosts.into_iter().collect())
}

fn intersect_hostname(listener: &str, route: &str) -> Option<String> {
    if listener.eq_ignore_ascii_case(route) {
        return Some(route.to_string());
    }
    match (listener.strip_prefix('*'), route.strip_prefix('*')) {
        (Some(suffix), None) if route.ends_with(suffix) => Some(route.to_string()),
        (None, Some(suffix)) if listener.ends_with(suffix) => Some(listener.to_string()),
        (Some(l), Some(r)) if l.ends_with(r) => Some(listener.to_string()),
        (Some(l), Some(r)) if r.ends_with(l) => Some(route.to_string()),
        _ => None,
    }
}

/// Orders routes within a virtual host from most to least specific match,
/// then by age and identity of the owning route.
fn route_precedence(a: &RouteEntry, b: &RouteEntry) -> Ordering {
    fn path_rank(m: &RouteMatch) -> (u8, Reverse<usize>) {
        match &m.path {
            Some(PathMatch::Exact(p)) => (0, Reverse(p.len())),
            Some(PathMatch::Prefix(p)) => (1, Reverse(p.len())),
            Some(PathMatch::Regex(p)) => (2, Reverse(p.len())),
            None => (3, Reverse(0)),
        }
    }

    fn specificity(m: &RouteMatch) -> impl Ord {
        (
            path_rank(m),
            Reverse(m.method.is_some()),
            Reverse(m.headers.len()),
            Reverse(m.query_params.len()),
        )
    }

    fn created(e: &RouteEntry) -> (bool, Option<chrono::DateTime<chrono::Utc>>) {
        let ts = e.route.creation_timestamp;
        (ts.is_none(), ts)
    }

    specificity(&a.ir.matcher)
        .cmp(&specificity(&b.ir.matcher))
        .then_with(|| created(a).cmp(&created(b)))
        .then_with(|| a.route.id.cmp(&b.route.id))
        .then_with(|| a.rule_index.cmp(&b.rule_index))
        .then_with(|| a.match_index.cmp(&b.match_index))
}

#[cfg(test)]
mod tests;
