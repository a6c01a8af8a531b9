use anyhow::{anyhow, bail, Result};
use gateway_policy_controller_core::{
    gateway::{
        BackendRef, HeaderMatch, HeaderModifier, HttpRoute, HttpRouteRule, LocalObjectRef,
        PathMatch, PathModifier, QueryParamMatch, RequestRedirect, RouteFilter, RouteMatch,
        UrlRewrite,
    },
    target_ref::{CORE_GROUP, GATEWAY_API_GROUP},
    ObjectRef, TargetRef,
};
use gateway_policy_controller_k8s_api::{duration, gateway as api, ResourceExt, Time};

pub fn convert_route(route: api::HttpRoute) -> Result<HttpRoute> {
    let namespace = route
        .namespace()
        .ok_or_else(|| anyhow!("HTTPRoute must have a namespace"))?;
    let id = ObjectRef::http_route(&namespace, route.name_unchecked());
    let creation_timestamp = route.metadata.creation_timestamp.map(|Time(t)| t);

    let parent_refs = route
        .spec
        .parent_refs
        .into_iter()
        .flatten()
        .map(parent_ref)
        .collect();

    let hostnames = route.spec.hostnames.into_iter().flatten().collect();

    let rules = route
        .spec
        .rules
        .into_iter()
        .flatten()
        .map(|rule| convert_rule(&namespace, rule))
        .collect::<Result<_>>()?;

    Ok(HttpRoute {
        id,
        parent_refs,
        hostnames,
        rules,
        creation_timestamp,
    })
}

/// Parent refs default to a Gateway in the route's namespace.
pub fn parent_ref(
    api::ParentReference {
        group,
        kind,
        namespace,
        name,
        section_name,
        port: _,
    }: api::ParentReference,
) -> TargetRef {
    TargetRef {
        group: group.unwrap_or_else(|| GATEWAY_API_GROUP.to_string()),
        kind: kind.unwrap_or_else(|| "Gateway".to_string()),
        namespace,
        name,
        section: section_name,
    }
}

fn convert_rule(namespace: &str, rule: api::HttpRouteRule) -> Result<HttpRouteRule> {
    let matches = rule
        .matches
        .into_iter()
        .flatten()
        .map(try_match)
        .collect::<Result<_>>()?;

    let filters = rule
        .filters
        .into_iter()
        .flatten()
        .map(filter)
        .collect::<Result<_>>()?;

    let backends = rule
        .backend_refs
        .into_iter()
        .flatten()
        .map(|backend| backend_ref(namespace, backend))
        .collect();

    let timeout = match rule.timeouts.and_then(|t| t.request) {
        Some(timeout) => {
            let timeout = duration::parse(&timeout)?;
            // Zero means "no timeout".
            (!timeout.is_zero()).then_some(timeout)
        }
        None => None,
    };

    Ok(HttpRouteRule {
        name: rule.name,
        matches,
        filters,
        backends,
        timeout,
    })
}

pub fn try_match(
    api::HttpRouteMatch {
        path,
        headers,
        query_params,
        method,
    }: api::HttpRouteMatch,
) -> Result<RouteMatch> {
    let path = path.map(path_match).transpose()?;

    let headers = headers
        .into_iter()
        .flatten()
        .map(header_match)
        .collect::<Result<_>>()?;

    let query_params = query_params
        .into_iter()
        .flatten()
        .map(query_param_match)
        .collect::<Result<_>>()?;

    let method = method
        .map(|m| {
            http::Method::from_bytes(m.as_bytes())
                .map(|m| m.to_string())
                .map_err(|_| anyhow!("invalid HTTP method {m:?}"))
        })
        .transpose()?;

    Ok(RouteMatch {
        path,
        headers,
        query_params,
        method,
    })
}

pub fn path_match(path_match: api::HttpPathMatch) -> Result<PathMatch> {
    match path_match {
        api::HttpPathMatch::Exact { value } | api::HttpPathMatch::PathPrefix { value }
            if !value.starts_with('/') =>
        {
            Err(anyhow!(
                "HttpPathMatch paths must be absolute (begin with `/`); {value:?} is not an absolute path"
            ))
        }
        api::HttpPathMatch::Exact { value } => Ok(PathMatch::Exact(value)),
        api::HttpPathMatch::PathPrefix { value } => Ok(PathMatch::Prefix(value)),
        api::HttpPathMatch::RegularExpression { value } => {
            regex::Regex::new(&value)?;
            Ok(PathMatch::Regex(value))
        }
    }
}

fn header_match(
    api::HttpHeaderMatch {
        r#type,
        name,
        value,
    }: api::HttpHeaderMatch,
) -> Result<HeaderMatch> {
    let name = http::HeaderName::try_from(name.as_str())?.to_string();
    match r#type.unwrap_or_default() {
        api::StringMatchType::Exact => {
            http::HeaderValue::try_from(value.as_str())?;
            Ok(HeaderMatch::Exact(name, value))
        }
        api::StringMatchType::RegularExpression => {
            regex::Regex::new(&value)?;
            Ok(HeaderMatch::Regex(name, value))
        }
    }
}

fn query_param_match(
    api::HttpQueryParamMatch {
        r#type,
        name,
        value,
    }: api::HttpQueryParamMatch,
) -> Result<QueryParamMatch> {
    match r#type.unwrap_or_default() {
        api::StringMatchType::Exact => Ok(QueryParamMatch::Exact(name, value)),
        api::StringMatchType::RegularExpression => {
            regex::Regex::new(&value)?;
            Ok(QueryParamMatch::Regex(name, value))
        }
    }
}

fn filter(filter: api::HttpRouteFilter) -> Result<RouteFilter> {
    Ok(match filter {
        api::HttpRouteFilter::RequestHeaderModifier {
            request_header_modifier,
        } => RouteFilter::RequestHeaderModifier(header_modifier(request_header_modifier)?),
        api::HttpRouteFilter::ResponseHeaderModifier {
            response_header_modifier,
        } => RouteFilter::ResponseHeaderModifier(header_modifier(response_header_modifier)?),
        api::HttpRouteFilter::RequestRedirect { request_redirect } => {
            RouteFilter::RequestRedirect(req_redirect(request_redirect)?)
        }
        api::HttpRouteFilter::UrlRewrite { url_rewrite } => {
            let api::HttpUrlRewriteFilter { hostname, path } = url_rewrite;
            RouteFilter::UrlRewrite(UrlRewrite {
                hostname,
                path: path.map(path_modifier),
            })
        }
        api::HttpRouteFilter::ExtensionRef { extension_ref } => {
            let api::LocalObjectReference { group, kind, name } = extension_ref;
            RouteFilter::ExtensionRef(LocalObjectRef { group, kind, name })
        }
        api::HttpRouteFilter::Unsupported => bail!("unsupported filter type"),
    })
}

pub fn header_modifier(
    api::HttpHeaderFilter { set, add, remove }: api::HttpHeaderFilter,
) -> Result<HeaderModifier> {
    fn header(api::HttpHeader { name, value }: api::HttpHeader) -> Result<(String, String)> {
        let name = http::HeaderName::try_from(name.as_str())?;
        http::HeaderValue::try_from(value.as_str())?;
        Ok((name.to_string(), value))
    }

    Ok(HeaderModifier {
        add: add.into_iter().flatten().map(header).collect::<Result<_>>()?,
        set: set.into_iter().flatten().map(header).collect::<Result<_>>()?,
        remove: remove
            .into_iter()
            .flatten()
            .map(|name| Ok(http::HeaderName::try_from(name.as_str())?.to_string()))
            .collect::<Result<_>>()?,
    })
}

fn req_redirect(
    api::HttpRequestRedirectFilter {
        scheme,
        hostname,
        path,
        port,
        status_code,
    }: api::HttpRequestRedirectFilter,
) -> Result<RequestRedirect> {
    if let Some(scheme) = scheme.as_deref() {
        if scheme != "http" && scheme != "https" {
            bail!("unsupported redirect scheme {scheme:?}");
        }
    }

    let status = status_code
        .map(|code| match code {
            301 | 302 => http::StatusCode::from_u16(code).map_err(Into::into),
            code => Err(anyhow!("unsupported redirect status code {code}")),
        })
        .transpose()?;

    Ok(RequestRedirect {
        scheme,
        hostname,
        path: path.map(path_modifier),
        port: port.filter(|p| *p != 0),
        status,
    })
}

fn path_modifier(path_modifier: api::HttpPathModifier) -> PathModifier {
    match path_modifier {
        api::HttpPathModifier::ReplaceFullPath { replace_full_path } => {
            PathModifier::Full(replace_full_path)
        }
        api::HttpPathModifier::ReplacePrefixMatch {
            replace_prefix_match,
        } => PathModifier::Prefix(replace_prefix_match),
    }
}

/// Backend refs default to a Service in the route's namespace with a weight
/// of 1.
fn backend_ref(
    route_ns: &str,
    api::HttpBackendRef {
        group,
        kind,
        name,
        namespace,
        port,
        weight,
    }: api::HttpBackendRef,
) -> BackendRef {
    let group = group
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| CORE_GROUP.to_string());
    let kind = kind.unwrap_or_else(|| "Service".to_string());
    let namespace = namespace.unwrap_or_else(|| route_ns.to_string());
    BackendRef {
        target: ObjectRef::new(group, kind, namespace, name),
        port,
        weight: weight.unwrap_or(1),
    }
}
