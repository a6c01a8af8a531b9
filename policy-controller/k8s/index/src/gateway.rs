use anyhow::{anyhow, bail, Result};
use gateway_policy_controller_core::{
    gateway::{AllowedRoutes, Gateway, Listener, Protocol, Service},
    ObjectRef,
};
use gateway_policy_controller_k8s_api::{self as k8s, gateway as api, ResourceExt, Time};
use std::collections::BTreeSet;

pub fn convert_gateway(gateway: api::Gateway) -> Result<Gateway> {
    let namespace = gateway
        .namespace()
        .ok_or_else(|| anyhow!("Gateway must have a namespace"))?;
    let id = ObjectRef::gateway(namespace, gateway.name_unchecked());
    let creation_timestamp = gateway.metadata.creation_timestamp.map(|Time(t)| t);

    let mut names = BTreeSet::new();
    let listeners = gateway
        .spec
        .listeners
        .into_iter()
        .map(|listener| {
            if !names.insert(listener.name.clone()) {
                bail!("duplicate listener name {:?}", listener.name);
            }
            convert_listener(listener)
        })
        .collect::<Result<_>>()?;

    Ok(Gateway {
        id,
        class_name: gateway.spec.gateway_class_name,
        listeners,
        creation_timestamp,
    })
}

fn convert_listener(
    api::Listener {
        name,
        hostname,
        port,
        protocol,
        allowed_routes,
    }: api::Listener,
) -> Result<Listener> {
    let protocol = match protocol.as_str() {
        "HTTP" => Protocol::Http,
        "HTTPS" => Protocol::Https,
        protocol => bail!("unsupported listener protocol {protocol:?}"),
    };
    if port == 0 {
        bail!("listener {name:?} must have a non-zero port");
    }

    let from = allowed_routes
        .and_then(|a| a.namespaces)
        .and_then(|n| n.from);
    let allowed_routes = match from {
        Some(api::FromNamespaces::All) => AllowedRoutes::All,
        None | Some(api::FromNamespaces::Same) => AllowedRoutes::Same,
        Some(api::FromNamespaces::Selector) => {
            tracing::warn!(listener = %name, "Namespace selectors are not supported; only allowing routes from the same namespace");
            AllowedRoutes::Same
        }
    };

    Ok(Listener {
        name,
        port,
        protocol,
        hostname,
        allowed_routes,
    })
}

pub fn convert_service(service: k8s::Service) -> Result<Service> {
    let namespace = service
        .namespace()
        .ok_or_else(|| anyhow!("Service must have a namespace"))?;
    let id = ObjectRef::service(namespace, service.name_unchecked());
    let ports = service
        .spec
        .into_iter()
        .flat_map(|spec| spec.ports.into_iter().flatten())
        .map(|p| u16::try_from(p.port).map_err(|_| anyhow!("invalid service port {}", p.port)))
        .collect::<Result<_>>()?;
    Ok(Service { id, ports })
}
