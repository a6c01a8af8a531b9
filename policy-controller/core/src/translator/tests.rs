use super::*;
use crate::{
    gateway::{AllowedRoutes, BackendRef, Protocol, Service},
    ir::StatusCode,
    plugin::{Capabilities, ListenerPlugin, Plugin, RoutePlugin},
    target_ref::{ObjectRef, TargetRef, GATEWAY_API_GROUP},
};
use maplit::btreeset;
use pretty_assertions::assert_eq;

const NS: &str = "apps";

fn listener(name: &str, hostname: Option<&str>) -> Listener {
    Listener {
        name: name.to_string(),
        port: 80,
        protocol: Protocol::Http,
        hostname: hostname.map(Into::into),
        allowed_routes: AllowedRoutes::Same,
    }
}

fn gateway(listeners: Vec<Listener>) -> Arc<Gateway> {
    Arc::new(Gateway {
        id: ObjectRef::gateway(NS, "gw"),
        class_name: "test".to_string(),
        listeners,
        creation_timestamp: None,
    })
}

fn parent(section: Option<&str>) -> TargetRef {
    let parent = TargetRef::new(GATEWAY_API_GROUP, "Gateway", "gw");
    match section {
        Some(s) => parent.with_section(s),
        None => parent,
    }
}

fn route(name: &str, parent: TargetRef, rules: Vec<HttpRouteRule>) -> Arc<HttpRoute> {
    Arc::new(HttpRoute {
        id: ObjectRef::http_route(NS, name),
        parent_refs: vec![parent],
        hostnames: vec![],
        rules,
        creation_timestamp: None,
    })
}

fn forward(service: &str, port: u16) -> HttpRouteRule {
    HttpRouteRule {
        backends: vec![BackendRef {
            target: ObjectRef::service(NS, service),
            port: Some(port),
            weight: 1,
        }],
        ..Default::default()
    }
}

fn input(gateways: Vec<Arc<Gateway>>, routes: Vec<Arc<HttpRoute>>) -> TranslationInput {
    let web = ObjectRef::service(NS, "web");
    TranslationInput {
        gateways,
        http_routes: routes.into_iter().collect(),
        services: [(
            web.clone(),
            Service {
                id: web,
                ports: btreeset![8080],
            },
        )]
        .into_iter()
        .collect(),
    }
}

fn route_scope(name: &str, section: Option<&str>) -> ScopeKey {
    let gw = ObjectRef::gateway(NS, "gw");
    let key = match section {
        Some(s) => AttachmentKey::section(gw, s),
        None => AttachmentKey::whole(gw),
    };
    ScopeKey::parent(ObjectRef::http_route(NS, name), key)
}

fn routes_of(translation: &Translation) -> Vec<&RouteIr> {
    translation.gateways[0].listeners[0].routes().collect()
}

/// Fails every route whose name starts with `bad`.
struct RejectBad(PluginError);

impl RoutePlugin for RejectBad {
    fn apply_route(&self, ctx: &mut RouteContext<'_>, route: RouteIr) -> Applied<RouteIr> {
        if ctx.route.id.name.starts_with("bad") {
            return Applied::err(route, self.0.clone());
        }
        Applied::ok(route)
    }
}

impl Plugin for RejectBad {
    const NAME: &'static str = "reject-bad";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.route(self);
    }
}

/// Sets a direct response on every route, so that later plugins can be seen
/// to run after a failure.
struct Respond;

impl RoutePlugin for Respond {
    fn apply_route(&self, _: &mut RouteContext<'_>, mut route: RouteIr) -> Applied<RouteIr> {
        route.action = Some(Action::DirectResponse(crate::ir::DirectResponse {
            status: StatusCode::OK,
            body: None,
        }));
        Applied::ok(route)
    }
}

impl Plugin for Respond {
    const NAME: &'static str = "respond";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.route(self);
    }
}

#[derive(serde::Serialize)]
struct Fault;

impl FilterConfig for Fault {
    const TYPE_URL: &'static str = "type.googleapis.com/test.Fault";
}

struct RequireFault;

impl RoutePlugin for RequireFault {
    fn apply_route(&self, _: &mut RouteContext<'_>, mut route: RouteIr) -> Applied<RouteIr> {
        match StagedFilter::new("test.fault", &Fault, FilterStage::during(WellKnownStage::Fault)) {
            Ok(filter) => {
                route.required_filters.push(filter);
                Applied::ok(route)
            }
            Err(error) => Applied::err(route, error),
        }
    }
}

impl Plugin for RequireFault {
    const NAME: &'static str = "require-fault";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.route(self);
    }
}

struct BreakListener;

impl ListenerPlugin for BreakListener {
    fn apply_listener(
        &self,
        _: &mut ListenerContext<'_>,
        listener: ListenerIr,
    ) -> Applied<ListenerIr> {
        Applied::err(listener, PluginError::Malformed("bad listener".to_string()))
    }
}

impl Plugin for BreakListener {
    const NAME: &'static str = "break-listener";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.listener(self);
    }
}

/// Decorates every route before failing it.
struct DecorateThenConflict;

impl RoutePlugin for DecorateThenConflict {
    fn apply_route(&self, _: &mut RouteContext<'_>, mut route: RouteIr) -> Applied<RouteIr> {
        route.timeout = Some(std::time::Duration::from_secs(7));
        route.request_headers.set.push(("x-env".to_string(), "prod".to_string()));
        match (
            StagedFilter::new("test.fault", &Fault, FilterStage::during(WellKnownStage::Fault)),
            crate::filter_stage::TypedConfig::encode(&Fault),
        ) {
            (Ok(filter), Ok(config)) => {
                route.required_filters.push(filter);
                route
                    .typed_per_filter_config
                    .insert("test.fault".to_string(), config);
            }
            (Err(error), _) | (_, Err(error)) => return Applied::err(route, error),
        }
        Applied::err(route, PluginError::Conflict("decorated".to_string()))
    }
}

impl Plugin for DecorateThenConflict {
    const NAME: &'static str = "decorate-then-conflict";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.route(self);
    }
}

#[test]
fn translates_forwarding_route() {
    let registry = Registry::builder().build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![route("good", parent(None), vec![forward("web", 8080)])],
    );

    let translation = translate(&registry, &input).expect("translation must succeed");
    let routes = routes_of(&translation);
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].name, "apps-good-rule-0-match-0");
    assert_eq!(routes[0].matcher, RouteMatch::default_prefix());
    assert_eq!(
        routes[0].action,
        Some(Action::Forward(vec![WeightedBackend {
            service: ObjectRef::service(NS, "web"),
            port: 8080,
            weight: 1,
        }]))
    );

    let report = translation
        .reports
        .get(&route_scope("good", None))
        .expect("route scope must be reported");
    assert!(report.is_healthy());
    assert!(translation
        .reports
        .get(&ScopeKey::listener(&ObjectRef::gateway(NS, "gw"), "http"))
        .is_some());
}

#[test]
fn conflict_fails_closed_and_later_plugins_run() {
    let _trace = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let registry = Registry::builder()
        .with(RejectBad(PluginError::Conflict("redirect collides".to_string())))
        .with(Respond)
        .build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![
            route("bad", parent(None), vec![forward("web", 8080)]),
            route("good", parent(None), vec![forward("web", 8080)]),
        ],
    );

    let translation = translate(&registry, &input).expect("translation must succeed");
    let routes = routes_of(&translation);
    let bad = routes.iter().find(|r| r.source.name == "bad").unwrap();
    let good = routes.iter().find(|r| r.source.name == "good").unwrap();

    // The later plugin ran on the failed route, but cannot revive it.
    assert!(bad.is_failed());
    assert_eq!(
        good.action,
        Some(Action::DirectResponse(crate::ir::DirectResponse {
            status: StatusCode::OK,
            body: None,
        }))
    );

    let report = translation.reports.get(&route_scope("bad", None)).unwrap();
    let accepted = report.condition(condition_type::ACCEPTED).unwrap();
    assert_eq!(accepted.status, ConditionStatus::False);
    assert_eq!(accepted.reason, reason::INCOMPATIBLE_FILTERS);
    assert_eq!(accepted.message, "redirect collides");
    assert!(translation
        .reports
        .get(&route_scope("good", None))
        .unwrap()
        .is_healthy());
}

#[test]
fn missing_backend_is_confined_to_its_route() {
    let registry = Registry::builder().build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![
            route("missing", parent(None), vec![forward("nope", 80)]),
            route("wrong-port", parent(None), vec![forward("web", 9090)]),
            route("good", parent(None), vec![forward("web", 8080)]),
        ],
    );

    let translation = translate(&registry, &input).unwrap();
    for name in ["missing", "wrong-port"] {
        let report = translation.reports.get(&route_scope(name, None)).unwrap();
        let refs = report.condition(condition_type::RESOLVED_REFS).unwrap();
        assert_eq!(refs.status, ConditionStatus::False);
        assert_eq!(refs.reason, reason::BACKEND_NOT_FOUND);
        assert!(report.condition(condition_type::ACCEPTED).is_none());
    }

    let routes = routes_of(&translation);
    assert_eq!(routes.iter().filter(|r| r.is_failed()).count(), 2);
    let good = routes.iter().find(|r| r.source.name == "good").unwrap();
    assert!(matches!(good.action, Some(Action::Forward(_))));
}

#[test]
fn rule_without_action_is_dropped() {
    let registry = Registry::builder().build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![route("empty", parent(None), vec![HttpRouteRule::default()])],
    );

    let translation = translate(&registry, &input).unwrap();
    assert!(routes_of(&translation)[0].is_failed());
    let report = translation.reports.get(&route_scope("empty", None)).unwrap();
    let partial = report.condition(condition_type::PARTIALLY_INVALID).unwrap();
    assert_eq!(partial.status, ConditionStatus::True);
    assert!(partial.message.starts_with("Dropped Rule:"));
}

#[test]
fn invariant_violation_aborts_the_run() {
    let registry = Registry::builder()
        .with(RejectBad(PluginError::Invariant("broken".to_string())))
        .build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![route("bad", parent(None), vec![forward("web", 8080)])],
    );

    let error = translate(&registry, &input).expect_err("translation must fail");
    let TranslateError::Invariant { plugin, .. } = error;
    assert_eq!(plugin, "reject-bad");
}

#[test]
fn router_filter_terminates_the_chain() {
    let registry = Registry::builder().with(RequireFault).build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![
            route("a", parent(None), vec![forward("web", 8080)]),
            route("b", parent(None), vec![forward("web", 8080)]),
        ],
    );

    let translation = translate(&registry, &input).unwrap();
    let names = translation.gateways[0].listeners[0]
        .http_filters
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>();
    // Both routes require the same filter; it is only added once.
    assert_eq!(names, vec!["test.fault", ROUTER_FILTER_NAME]);
}

#[test]
fn listener_failure_fails_all_of_its_routes() {
    let registry = Registry::builder().with(BreakListener).build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![route("good", parent(None), vec![forward("web", 8080)])],
    );

    let translation = translate(&registry, &input).unwrap();
    assert!(routes_of(&translation).iter().all(|r| r.is_failed()));

    let report = translation
        .reports
        .get(&ScopeKey::listener(&ObjectRef::gateway(NS, "gw"), "http"))
        .unwrap();
    assert_eq!(
        report.condition(condition_type::PROGRAMMED).unwrap().status,
        ConditionStatus::False
    );
    assert_eq!(
        report.condition(condition_type::ACCEPTED).unwrap().reason,
        reason::INCOMPATIBLE_FILTERS
    );
}

#[test]
fn unknown_section_reports_no_matching_parent() {
    let registry = Registry::builder().build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![route("lost", parent(Some("https")), vec![forward("web", 8080)])],
    );

    let translation = translate(&registry, &input).unwrap();
    assert_eq!(routes_of(&translation).len(), 0);
    let report = translation
        .reports
        .get(&route_scope("lost", Some("https")))
        .unwrap();
    let accepted = report.condition(condition_type::ACCEPTED).unwrap();
    assert_eq!(accepted.reason, reason::NO_MATCHING_PARENT);
}

#[test]
fn hostnames_must_intersect_some_listener() {
    let registry = Registry::builder().build();
    let mut other = (*route("other", parent(None), vec![forward("web", 8080)])).clone();
    other.hostnames = vec!["other.example.org".to_string()];
    let mut sub = (*route("sub", parent(None), vec![forward("web", 8080)])).clone();
    sub.hostnames = vec!["api.example.com".to_string()];

    let input = input(
        vec![gateway(vec![
            listener("wild", Some("*.example.com")),
            listener("exact", Some("www.example.com")),
        ])],
        vec![Arc::new(other), Arc::new(sub)],
    );

    let translation = translate(&registry, &input).unwrap();
    let report = translation.reports.get(&route_scope("other", None)).unwrap();
    assert_eq!(
        report.condition(condition_type::ACCEPTED).unwrap().reason,
        reason::NO_MATCHING_LISTENER_HOSTNAME
    );

    // Attached through the wildcard listener only; not rejected overall.
    assert!(translation
        .reports
        .get(&route_scope("sub", None))
        .unwrap()
        .is_healthy());
    let wild = &translation.gateways[0].listeners[0];
    assert_eq!(wild.virtual_hosts[0].domains, vec!["api.example.com"]);
    assert!(translation.gateways[0].listeners[1].virtual_hosts.is_empty());
}

#[test]
fn routes_from_other_namespaces_need_permission() {
    let registry = Registry::builder().build();
    let stranger = Arc::new(HttpRoute {
        id: ObjectRef::http_route("elsewhere", "stranger"),
        parent_refs: vec![parent(None).with_namespace(NS)],
        hostnames: vec![],
        rules: vec![forward("web", 8080)],
        creation_timestamp: None,
    });
    let input = input(vec![gateway(vec![listener("http", None)])], vec![stranger]);

    let translation = translate(&registry, &input).unwrap();
    let scope = ScopeKey::parent(
        ObjectRef::http_route("elsewhere", "stranger"),
        AttachmentKey::whole(ObjectRef::gateway(NS, "gw")),
    );
    assert_eq!(
        translation
            .reports
            .get(&scope)
            .unwrap()
            .condition(condition_type::ACCEPTED)
            .unwrap()
            .reason,
        reason::NOT_ALLOWED_BY_LISTENERS
    );
}

#[test]
fn more_specific_matches_sort_first() {
    use crate::gateway::HeaderMatch;

    let registry = Registry::builder().build();
    let matches = vec![
        RouteMatch {
            path: Some(PathMatch::Prefix("/".to_string())),
            ..Default::default()
        },
        RouteMatch {
            path: Some(PathMatch::Prefix("/api".to_string())),
            ..Default::default()
        },
        RouteMatch {
            path: Some(PathMatch::Prefix("/api".to_string())),
            headers: vec![HeaderMatch::Exact("x-canary".to_string(), "1".to_string())],
            ..Default::default()
        },
        RouteMatch {
            path: Some(PathMatch::Exact("/".to_string())),
            ..Default::default()
        },
    ];
    let rule = HttpRouteRule {
        matches,
        ..forward("web", 8080)
    };
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![route("r", parent(None), vec![rule])],
    );

    let translation = translate(&registry, &input).unwrap();
    let names = routes_of(&translation)
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "apps-r-rule-0-match-3",
            "apps-r-rule-0-match-2",
            "apps-r-rule-0-match-1",
            "apps-r-rule-0-match-0",
        ]
    );
}

#[test]
fn hostname_intersection() {
    assert_eq!(intersect_hostname("*.example.com", "a.example.com"), Some("a.example.com".into()));
    assert_eq!(intersect_hostname("a.example.com", "*.example.com"), Some("a.example.com".into()));
    assert_eq!(intersect_hostname("*.example.com", "*.a.example.com"), Some("*.a.example.com".into()));
    assert_eq!(intersect_hostname("*.example.com", "example.com"), None);
    assert_eq!(intersect_hostname("a.example.com", "b.example.com"), None);
    assert_eq!(
        intersect_hostnames(None, &[]),
        Some(vec!["*".to_string()])
    );
}

#[test]
fn failed_routes_keep_only_their_identity() {
    let registry = Registry::builder().with(DecorateThenConflict).build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![route("good", parent(None), vec![forward("web", 8080)])],
    );

    let translation = translate(&registry, &input).unwrap();
    let mut expected = RouteIr::new(
        "apps-good-rule-0-match-0",
        ObjectRef::http_route(NS, "good"),
        RouteMatch::default_prefix(),
    );
    expected.action = Some(Action::internal_error());
    assert_eq!(routes_of(&translation), vec![&expected]);

    let names = translation.gateways[0].listeners[0]
        .http_filters
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec![ROUTER_FILTER_NAME]);
}

#[test]
fn failed_listeners_drop_required_filters() {
    let registry = Registry::builder()
        .with(RequireFault)
        .with(BreakListener)
        .build();
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![route("good", parent(None), vec![forward("web", 8080)])],
    );

    let translation = translate(&registry, &input).unwrap();
    let listener = &translation.gateways[0].listeners[0];
    assert!(listener.routes().all(|r| r.required_filters.is_empty()));
    let names = listener
        .http_filters
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec![ROUTER_FILTER_NAME]);
}

#[test]
fn routes_attached_twice_to_a_listener_are_translated_once() {
    let registry = Registry::builder().build();
    let mut web = (*route("web", parent(None), vec![forward("web", 8080)])).clone();
    web.parent_refs.push(parent(Some("http")));
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![Arc::new(web)],
    );

    let translation = translate(&registry, &input).unwrap();
    let names = routes_of(&translation)
        .into_iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["apps-web-rule-0-match-0"]);

    for section in [None, Some("http")] {
        let report = translation
            .reports
            .get(&route_scope("web", section))
            .expect("every parent is reported");
        assert!(report.is_healthy(), "{section:?}");
    }
}

#[test]
fn route_conditions_are_reported_on_every_parent() {
    let registry = Registry::builder().build();
    let mut missing = (*route("missing", parent(None), vec![forward("nope", 80)])).clone();
    missing.parent_refs.push(parent(Some("http")));
    let input = input(
        vec![gateway(vec![listener("http", None)])],
        vec![Arc::new(missing)],
    );

    let translation = translate(&registry, &input).unwrap();
    assert_eq!(routes_of(&translation).len(), 1);
    for section in [None, Some("http")] {
        let report = translation
            .reports
            .get(&route_scope("missing", section))
            .unwrap();
        let refs = report.condition(condition_type::RESOLVED_REFS).unwrap();
        assert_eq!(refs.reason, reason::BACKEND_NOT_FOUND, "{section:?}");
    }
}
