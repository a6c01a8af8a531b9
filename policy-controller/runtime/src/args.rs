use crate::{
    index::{self, Index},
    index_list::IndexList,
    k8s::{self, gateway, policy, Client, Resource},
    lease, status,
    translation::{self, TranslationMetrics, Translator},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use tokio::{sync::mpsc, time::Duration};
use tracing::{info_span, Instrument};

const RECONCILIATION_PERIOD: Duration = Duration::from_secs(10);

// The maximum number of status patches to buffer. As a conservative estimate,
// we assume that sending a patch will take at least 1ms, so we set the buffer
// size to be the same as the reconciliation period in milliseconds.
const STATUS_UPDATE_QUEUE_SIZE: usize = RECONCILIATION_PERIOD.as_millis() as usize;

#[derive(Debug, Parser)]
#[clap(
    name = "gateway-policy-controller",
    about = "Translates Gateway API resources and option policies into proxy configuration"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "gateway_policy=info,warn",
        env = "GATEWAY_POLICY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Only Gateways of this class are translated.
    #[clap(long, default_value = "gateway-policy")]
    gateway_class_name: String,

    #[clap(long, default_value = "gateway-policy-controller")]
    controller_deployment_name: String,

    #[clap(long, default_value = "gateway-policy-system")]
    controller_namespace: String,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            gateway_class_name,
            controller_deployment_name,
            controller_namespace,
            patch_timeout_ms,
        } = self;

        // Build the index of Gateway API resources and policies, which
        // publishes a snapshot for translation on every change.
        let (index, snapshots) = Index::shared(gateway_class_name);

        let mut prom = <Registry>::default();
        index::metrics::register(&mut prom, index.clone());
        let resource_status = prom.sub_registry_with_prefix("resource_status");
        let status_metrics = status::ControllerMetrics::register(resource_status);
        let status_index_metrics = status::IndexMetrics::register(resource_status);
        let translation_metrics =
            TranslationMetrics::register(prom.sub_registry_with_prefix("translator"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("Failed to fetch `HOSTNAME` environment variable")?;

        let claims = lease::init(
            &runtime,
            &controller_namespace,
            &controller_deployment_name,
            &hostname,
        )
        .await?;

        // Build the status index which computes resource statuses from the
        // reports of each translation.
        let (updates_tx, updates_rx) = mpsc::channel(STATUS_UPDATE_QUEUE_SIZE);
        let status_index = status::Index::shared(
            hostname.clone(),
            claims.clone(),
            updates_tx,
            status_index_metrics,
        );

        // Spawn resource watches.

        if api_resource_exists::<gateway::Gateway>(&runtime.client()).await {
            let gateways = runtime.watch_all::<gateway::Gateway>(watcher::Config::default());
            let gateways_indexes = IndexList::new(index.clone())
                .push(status_index.clone())
                .shared();
            tokio::spawn(
                kubert::index::namespaced(gateways_indexes, gateways)
                    .instrument(info_span!("gateways")),
            );
        } else {
            tracing::warn!(
                "gateways.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }

        if api_resource_exists::<gateway::HttpRoute>(&runtime.client()).await {
            let http_routes = runtime.watch_all::<gateway::HttpRoute>(watcher::Config::default());
            let http_routes_indexes = IndexList::new(index.clone())
                .push(status_index.clone())
                .shared();
            tokio::spawn(
                kubert::index::namespaced(http_routes_indexes, http_routes)
                    .instrument(info_span!("httproutes")),
            );
        } else {
            tracing::warn!(
                "httproutes.gateway.networking.k8s.io resource kind not found, skipping watches"
            );
        }

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), services).instrument(info_span!("services")),
        );

        let route_options = runtime.watch_all::<policy::RouteOption>(watcher::Config::default());
        let route_options_indexes = IndexList::new(index.clone())
            .push(status_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::namespaced(route_options_indexes, route_options)
                .instrument(info_span!("routeoptions")),
        );

        let virtual_host_options =
            runtime.watch_all::<policy::VirtualHostOption>(watcher::Config::default());
        let virtual_host_options_indexes = IndexList::new(index.clone())
            .push(status_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::namespaced(virtual_host_options_indexes, virtual_host_options)
                .instrument(info_span!("virtualhostoptions")),
        );

        let listener_options =
            runtime.watch_all::<policy::ListenerOption>(watcher::Config::default());
        let listener_options_indexes = IndexList::new(index.clone())
            .push(status_index.clone())
            .shared();
        tokio::spawn(
            kubert::index::namespaced(listener_options_indexes, listener_options)
                .instrument(info_span!("listeneroptions")),
        );

        // Translate every snapshot, publishing proxy configuration and
        // statuses.
        let (translator, config) = Translator::new(status_index.clone(), translation_metrics);
        tokio::spawn(
            translator
                .run(snapshots)
                .instrument(info_span!("translator")),
        );
        tokio::spawn(translation::log_updates(config).instrument(info_span!("config")));

        // Spawn the status Controller reconciliation.
        tokio::spawn(
            status::Index::run(status_index.clone(), RECONCILIATION_PERIOD)
                .instrument(info_span!("status_index")),
        );

        let client = runtime.client();
        let status_controller = status::Controller::new(
            claims,
            client,
            hostname,
            updates_rx,
            Duration::from_millis(patch_timeout_ms),
            status_metrics,
        );
        tokio::spawn(
            status_controller
                .run()
                .instrument(info_span!("status_controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
