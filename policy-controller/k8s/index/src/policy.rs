use crate::routes::header_modifier;
use anyhow::{anyhow, bail, Result};
use gateway_policy_controller_core::{
    ir::{DirectResponse, RetryPolicy},
    TargetRef,
};
use gateway_policy_controller_k8s_api::{
    duration, gateway as gw,
    policy::{self as api, PolicyTargetRef},
    ResourceExt, Time,
};
use gateway_policy_controller_plugins::policy::{
    CorsPolicy, FaultAbort, FaultDelay, FaultInjection, ListenerOption, ListenerOptions, Options,
    Policy, RouteOption, RouteOptions, VirtualHostOption, VirtualHostOptions,
};

pub fn convert_route_option(option: api::RouteOption) -> Result<RouteOption> {
    let target_refs = target_refs::<gw::HttpRoute, _>(&option, &option.spec.target_refs);
    let api::RouteOptions {
        faults,
        cors,
        timeout,
        retries,
        prefix_rewrite,
        direct_response,
    } = option.spec.options.clone();

    let options = RouteOptions {
        fault: faults.map(fault_injection).transpose()?,
        cors: cors.map(cors_policy).transpose()?,
        timeout: timeout.as_deref().map(duration::parse).transpose()?,
        retries: retries.map(retry_policy).transpose()?,
        prefix_rewrite,
        direct_response: direct_response
            .map(|api::route_option::DirectResponse { status, body }| {
                let status = http::StatusCode::from_u16(status)?;
                Ok::<_, anyhow::Error>(DirectResponse { status, body })
            })
            .transpose()?,
    };
    policy(&option, target_refs, options)
}

pub fn convert_virtual_host_option(option: api::VirtualHostOption) -> Result<VirtualHostOption> {
    let target_refs = target_refs::<gw::Gateway, _>(&option, &option.spec.target_refs);
    let api::VirtualHostOptions {
        retries,
        cors,
        request_headers,
        response_headers,
    } = option.spec.options.clone();

    let options = VirtualHostOptions {
        retries: retries.map(retry_policy).transpose()?,
        cors: cors.map(cors_policy).transpose()?,
        request_headers: request_headers.map(header_modifier).transpose()?,
        response_headers: response_headers.map(header_modifier).transpose()?,
    };
    policy(&option, target_refs, options)
}

pub fn convert_listener_option(option: api::ListenerOption) -> Result<ListenerOption> {
    let target_refs = target_refs::<gw::Gateway, _>(&option, &option.spec.target_refs);
    let api::ListenerOptions {
        per_connection_buffer_limit_bytes,
    } = option.spec.options.clone();
    let options = ListenerOptions {
        per_connection_buffer_limit_bytes,
    };
    policy(&option, target_refs, options)
}

fn policy<R, O>(resource: &R, target_refs: Vec<TargetRef>, options: O) -> Result<Policy<O>>
where
    R: ResourceExt,
    O: Options,
{
    let namespace = resource
        .namespace()
        .ok_or_else(|| anyhow!("{} must have a namespace", O::KIND))?;
    Ok(Policy {
        id: Policy::<O>::object_ref(namespace, resource.name_unchecked()),
        target_refs,
        creation_timestamp: resource.creation_timestamp().map(|Time(t)| t),
        options,
    })
}

/// Converts the target refs of a policy, dropping those that name a kind the
/// policy cannot attach to.
fn target_refs<T, R>(policy: &R, refs: &[PolicyTargetRef]) -> Vec<TargetRef>
where
    R: ResourceExt,
    T: gateway_policy_controller_k8s_api::Resource,
    T::DynamicType: Default,
{
    refs.iter()
        .filter(|target| {
            let supported = target.targets_kind::<T>();
            if !supported {
                tracing::info!(
                    ns = ?policy.namespace(),
                    name = %policy.name_unchecked(),
                    group = %target.group,
                    kind = %target.kind,
                    "Ignoring target ref of an unsupported kind",
                );
            }
            supported
        })
        .map(|target| TargetRef {
            group: target.group.clone(),
            kind: target.kind.clone(),
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            section: target.section_name.clone(),
        })
        .collect()
}

fn fault_injection(fault: api::route_option::FaultInjection) -> Result<FaultInjection> {
    let abort = fault.abort.map(|abort| FaultAbort {
        percentage: abort.percentage,
        http_status: abort.http_status,
    });
    let delay = fault
        .delay
        .map(|delay| {
            Ok::<_, anyhow::Error>(FaultDelay {
                percentage: delay.percentage,
                fixed_delay: duration::parse(&delay.fixed_delay)?,
            })
        })
        .transpose()?;
    Ok(FaultInjection { abort, delay })
}

fn cors_policy(cors: api::CorsPolicy) -> Result<CorsPolicy> {
    for regex in &cors.allow_origin_regex {
        regex::Regex::new(regex)?;
    }
    Ok(CorsPolicy {
        allow_origins: cors.allow_origin,
        allow_origin_regex: cors.allow_origin_regex,
        allow_methods: cors.allow_methods,
        allow_headers: cors.allow_headers,
        expose_headers: cors.expose_headers,
        max_age: cors.max_age.as_deref().map(duration::parse).transpose()?,
        allow_credentials: cors.allow_credentials.unwrap_or(false),
    })
}

fn retry_policy(retry: api::RetryPolicy) -> Result<RetryPolicy> {
    let retry_on = retry
        .retry_on
        .iter()
        .flat_map(|on| on.split(','))
        .map(str::trim)
        .filter(|on| !on.is_empty())
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if retry_on.is_empty() {
        bail!("retry policy must set at least one retry condition");
    }
    Ok(RetryPolicy {
        attempts: retry.num_retries.unwrap_or(1),
        per_try_timeout: retry
            .per_try_timeout
            .as_deref()
            .map(duration::parse)
            .transpose()?,
        retry_on,
    })
}
