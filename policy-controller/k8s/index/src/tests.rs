use super::*;
use gateway_policy_controller_core::{
    gateway::{BackendRef, HeaderMatch, PathMatch, Protocol, RouteFilter, RouteMatch},
    target_ref::{CORE_GROUP, GATEWAY_API_GROUP},
    TargetRef,
};
use gateway_policy_controller_k8s_api::{
    gateway as api,
    policy::{self as policy_api, PolicyTargetRef},
    ObjectMeta, ServicePort, ServiceSpec,
};
use kubert::index::IndexNamespacedResource;
use pretty_assertions::assert_eq;
use std::time::Duration;

const CLASS: &str = "gateway-policy";

fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn gateway(name: &str, class: &str) -> api::Gateway {
    api::Gateway {
        metadata: meta("apps", name),
        spec: api::GatewaySpec {
            gateway_class_name: class.to_string(),
            listeners: vec![api::Listener {
                name: "http".to_string(),
                hostname: None,
                port: 8080,
                protocol: "HTTP".to_string(),
                allowed_routes: None,
            }],
        },
        status: None,
    }
}

fn route(name: &str, path: api::HttpPathMatch) -> api::HttpRoute {
    api::HttpRoute {
        metadata: meta("apps", name),
        spec: api::HttpRouteSpec {
            parent_refs: Some(vec![api::ParentReference {
                name: "gw".to_string(),
                section_name: Some("http".to_string()),
                ..Default::default()
            }]),
            hostnames: None,
            rules: Some(vec![api::HttpRouteRule {
                matches: Some(vec![api::HttpRouteMatch {
                    path: Some(path),
                    headers: Some(vec![api::HttpHeaderMatch {
                        r#type: None,
                        name: "X-Canary".to_string(),
                        value: "true".to_string(),
                    }]),
                    ..Default::default()
                }]),
                backend_refs: Some(vec![api::HttpBackendRef {
                    name: "web".to_string(),
                    port: Some(80),
                    ..Default::default()
                }]),
                timeouts: Some(api::HttpRouteTimeouts {
                    request: Some("0s".to_string()),
                }),
                ..Default::default()
            }]),
        },
        status: None,
    }
}

fn service(name: &str, port: i32) -> k8s::Service {
    k8s::Service {
        metadata: meta("apps", name),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn prefix(value: &str) -> api::HttpPathMatch {
    api::HttpPathMatch::PathPrefix {
        value: value.to_string(),
    }
}

#[test]
fn gateways_of_other_classes_are_ignored() {
    let (index, rx) = Index::shared(CLASS);

    index.write().apply(gateway("gw", CLASS));
    index.write().apply(gateway("other", "someone-else"));

    let snapshot = rx.borrow().clone();
    let gateways = snapshot
        .input
        .gateways
        .iter()
        .map(|gw| gw.id.clone())
        .collect::<Vec<_>>();
    assert_eq!(gateways, vec![ObjectRef::gateway("apps", "gw")]);
    assert_eq!(snapshot.input.gateways[0].listeners[0].protocol, Protocol::Http);

    // Moving a Gateway to another class removes it.
    index.write().apply(gateway("gw", "someone-else"));
    assert!(rx.borrow().input.gateways.is_empty());
}

#[test]
fn routes_are_converted_with_defaults() {
    let (index, rx) = Index::shared(CLASS);
    index.write().apply(route("web", prefix("/api")));

    let snapshot = rx.borrow().clone();
    let routes = snapshot
        .input
        .http_routes
        .resources()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(routes.len(), 1);
    let route = &routes[0];

    assert_eq!(
        route.parent_refs,
        vec![TargetRef {
            group: GATEWAY_API_GROUP.to_string(),
            kind: "Gateway".to_string(),
            namespace: None,
            name: "gw".to_string(),
            section: Some("http".to_string()),
        }]
    );
    assert_eq!(
        route.rules[0].matches,
        vec![RouteMatch {
            path: Some(PathMatch::Prefix("/api".to_string())),
            headers: vec![HeaderMatch::Exact("x-canary".to_string(), "true".to_string())],
            ..Default::default()
        }]
    );
    assert_eq!(
        route.rules[0].backends,
        vec![BackendRef {
            target: ObjectRef::new(CORE_GROUP, "Service", "apps", "web"),
            port: Some(80),
            weight: 1,
        }]
    );
    assert_eq!(route.rules[0].timeout, None, "a zero timeout disables it");
}

#[test]
fn invalid_routes_are_removed() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();

    let (index, rx) = Index::shared(CLASS);
    index.write().apply(route("web", prefix("/api")));
    assert_eq!(rx.borrow().input.http_routes.resources().count(), 1);

    index.write().apply(route("web", prefix("api")));
    assert_eq!(rx.borrow().input.http_routes.resources().count(), 0);

    index.write().apply(route(
        "web",
        api::HttpPathMatch::RegularExpression {
            value: "/(unclosed".to_string(),
        },
    ));
    assert_eq!(rx.borrow().input.http_routes.resources().count(), 0);
}

#[test]
fn unsupported_filters_are_rejected() {
    let mut route = route("web", prefix("/"));
    route.spec.rules.as_mut().unwrap()[0].filters = Some(vec![api::HttpRouteFilter::Unsupported]);
    assert!(convert_route(route).is_err());

    let mut redirect = self::route("web", prefix("/"));
    redirect.spec.rules.as_mut().unwrap()[0].filters = Some(vec![
        api::HttpRouteFilter::ExtensionRef {
            extension_ref: api::LocalObjectReference {
                group: "policy.gateway.io".to_string(),
                kind: "RouteOption".to_string(),
                name: "opts".to_string(),
            },
        },
    ]);
    let converted = convert_route(redirect).expect("extension refs are converted");
    assert!(matches!(
        &converted.rules[0].filters[..],
        [RouteFilter::ExtensionRef(ext)] if ext.name == "opts"
    ));
}

#[test]
fn services_are_indexed_by_port() {
    let (index, rx) = Index::shared(CLASS);
    index.write().apply(service("web", 80));

    let id = ObjectRef::service("apps", "web");
    let ports = rx.borrow().input.services[&id].ports.clone();
    assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![80]);

    IndexNamespacedResource::<k8s::Service>::delete(
        &mut *index.write(),
        "apps".to_string(),
        "web".to_string(),
    );
    assert!(rx.borrow().input.services.is_empty());
}

#[test]
fn policies_drop_unsupported_targets() {
    let (index, rx) = Index::shared(CLASS);

    let option = policy_api::RouteOption {
        metadata: meta("apps", "timeouts"),
        spec: policy_api::RouteOptionSpec {
            target_refs: vec![
                PolicyTargetRef {
                    group: GATEWAY_API_GROUP.to_string(),
                    kind: "HTTPRoute".to_string(),
                    name: "web".to_string(),
                    namespace: None,
                    section_name: None,
                },
                PolicyTargetRef {
                    group: String::new(),
                    kind: "Service".to_string(),
                    name: "web".to_string(),
                    namespace: None,
                    section_name: None,
                },
            ],
            options: policy_api::RouteOptions {
                timeout: Some("1m30s".to_string()),
                ..Default::default()
            },
        },
        status: None,
    };
    index.write().apply(option);

    let snapshot = rx.borrow().clone();
    let id = RouteOption::object_ref("apps", "timeouts");
    let policy = snapshot
        .policies
        .route_options
        .get(&id)
        .expect("policy must be indexed");
    assert_eq!(policy.target_refs.len(), 1);
    assert_eq!(policy.target_refs[0].kind, "HTTPRoute");
    assert_eq!(policy.options.timeout, Some(Duration::from_secs(90)));

    let listener_option = policy_api::ListenerOption {
        metadata: meta("apps", "buffers"),
        spec: policy_api::ListenerOptionSpec {
            target_refs: vec![PolicyTargetRef {
                group: GATEWAY_API_GROUP.to_string(),
                kind: "Gateway".to_string(),
                name: "gw".to_string(),
                namespace: None,
                section_name: Some("http".to_string()),
            }],
            options: policy_api::ListenerOptions {
                per_connection_buffer_limit_bytes: Some(1024),
            },
        },
        status: None,
    };
    index.write().apply(listener_option);
    assert_eq!(rx.borrow().policies.listener_options.len(), 1);

    IndexNamespacedResource::<policy_api::RouteOption>::delete(
        &mut *index.write(),
        "apps".to_string(),
        "timeouts".to_string(),
    );
    assert!(rx.borrow().policies.route_options.is_empty());
}

#[test]
fn invalid_policy_durations_are_ignored() {
    let option = policy_api::VirtualHostOption {
        metadata: meta("apps", "retries"),
        spec: policy_api::VirtualHostOptionSpec {
            target_refs: vec![],
            options: policy_api::VirtualHostOptions {
                retries: Some(policy_api::RetryPolicy {
                    retry_on: Some("5xx, reset".to_string()),
                    num_retries: Some(3),
                    per_try_timeout: Some("soon".to_string()),
                }),
                ..Default::default()
            },
        },
        status: None,
    };
    assert!(convert_virtual_host_option(option.clone()).is_err());

    let mut valid = option;
    valid
        .spec
        .options
        .retries
        .as_mut()
        .unwrap()
        .per_try_timeout = Some("250ms".to_string());
    let converted = convert_virtual_host_option(valid).expect("policy must convert");
    let retries = converted.options.retries.expect("retries must be set");
    assert_eq!(retries.retry_on, vec!["5xx".to_string(), "reset".to_string()]);
    assert_eq!(retries.per_try_timeout, Some(Duration::from_millis(250)));
}

#[test]
fn metrics_report_index_sizes() {
    let (index, _rx) = Index::shared(CLASS);
    index.write().apply(gateway("gw", CLASS));
    index.write().apply(route("web", prefix("/")));

    let mut registry = prometheus_client::registry::Registry::default();
    metrics::register(&mut registry, index);
    let mut out = String::new();
    prometheus_client::encoding::text::encode(&mut out, &registry).unwrap();

    assert!(out.contains(r#"gateway_index_size{namespace="apps"} 1"#), "{out}");
    assert!(out.contains(r#"http_route_index_size{namespace="apps"} 1"#), "{out}");
}
