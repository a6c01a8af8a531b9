use crate::k8s::{self, ObjectMeta, PatchParams, Resource};
use anyhow::{Context, Result};
use k8s_openapi::api::{apps::v1::Deployment, coordination::v1 as coordv1};
use std::sync::Arc;
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const LEASE_NAME: &str = "gateway-policy-controller-status";
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);

/// Ensures the status write Lease exists and starts competing for it.
///
/// Only the holder of the Lease patches resource statuses.
pub async fn init<T>(
    runtime: &kubert::Runtime<T>,
    ns: &str,
    deployment_name: &str,
    hostname: &str,
) -> Result<watch::Receiver<Arc<kubert::lease::Claim>>> {
    // The controller's Deployment owns the Lease so that it is removed along
    // with the controller.
    let api = k8s::Api::<Deployment>::namespaced(runtime.client(), ns);
    let deployment = api.get(deployment_name).await?;
    let owner = deployment
        .controller_owner_ref(&())
        .context("Deployment must have a name and UID")?;

    let lease = coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(ns.to_string()),
            // A resource version of "0" only creates the Lease if it does not
            // already exist.
            resource_version: Some("0".to_string()),
            owner_references: Some(vec![owner]),
            labels: Some(
                [
                    (
                        "app.kubernetes.io/name".to_string(),
                        "gateway-policy-controller".to_string(),
                    ),
                    (
                        "app.kubernetes.io/component".to_string(),
                        "controller".to_string(),
                    ),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        },
        spec: None,
    };
    let api = k8s::Api::<coordv1::Lease>::namespaced(runtime.client(), ns);
    match api
        .patch(
            LEASE_NAME,
            &PatchParams {
                field_manager: Some("gateway-policy-controller".to_string()),
                ..Default::default()
            },
            &k8s::Patch::Apply(lease),
        )
        .await
    {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        Err(k8s::Error::Api(_)) => tracing::debug!("Lease already exists, no need to create it"),
        Err(error) => {
            return Err(error.into());
        }
    };

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, LEASE_NAME)
        .await?
        .spawn(hostname, params)
        .await?;
    Ok(claims)
}
