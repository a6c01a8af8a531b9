use crate::conditions::{self, Stamp};
use ahash::AHashMap as HashMap;
use gateway_policy_controller_core::{ObjectRef, ReportMap, CONTROLLER_NAME};
use gateway_policy_controller_k8s_api::{
    self as k8s,
    gateway::{Gateway, GatewayStatus, HttpRoute, HttpRouteStatus},
    policy::{ListenerOption, PolicyStatus, RouteOption, VirtualHostOption},
    NamespaceResourceScope, Resource, ResourceExt,
};
use kubert::lease::Claim;
use parking_lot::RwLock;
use prometheus_client::{
    metrics::{counter::Counter, histogram::Histogram},
    registry::{Registry, Unit},
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, sync::Arc};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration, Instant},
};

pub type SharedIndex = Arc<RwLock<Index>>;

/// Applies status patches produced by the [`Index`].
pub struct Controller {
    claims: watch::Receiver<Arc<Claim>>,
    client: k8s::Client,
    name: String,
    updates: mpsc::Receiver<Update>,
    patch_timeout: Duration,
    metrics: ControllerMetrics,
}

#[derive(Clone, Debug)]
pub struct ControllerMetrics {
    patches_applied: Counter,
    patch_failures: Counter,
    patch_timeouts: Counter,
    patch_duration: Histogram,
}

/// Tracks the status of every resource the controller reports on and emits a
/// patch whenever the status computed from the latest translation differs from
/// the one stored in the cluster.
pub struct Index {
    name: String,
    claims: watch::Receiver<Arc<Claim>>,
    updates: mpsc::Sender<Update>,
    metrics: IndexMetrics,

    resources: HashMap<ObjectRef, Observed>,
    /// The reports of the latest translation run, if one has completed.
    reports: Option<Arc<ReportMap>>,
}

#[derive(Clone, Debug)]
pub struct IndexMetrics {
    patches_enqueued: Counter,
    patches_dropped: Counter,
}

#[derive(Debug, PartialEq)]
pub struct Update {
    pub id: ObjectRef,
    pub patch: k8s::Patch<serde_json::Value>,
}

/// The last state of a resource as seen by the watch.
#[derive(Clone, Debug)]
struct Observed {
    generation: Option<i64>,
    status: ObservedStatus,
}

#[derive(Clone, Debug)]
enum ObservedStatus {
    Gateway(Option<GatewayStatus>),
    HttpRoute(Option<HttpRouteStatus>),
    Policy(Option<PolicyStatus>),
}

// === impl Controller ===

impl Controller {
    pub fn new(
        claims: watch::Receiver<Arc<Claim>>,
        client: k8s::Client,
        name: impl ToString,
        updates: mpsc::Receiver<Update>,
        patch_timeout: Duration,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            claims,
            client,
            name: name.to_string(),
            updates,
            patch_timeout,
            metrics,
        }
    }

    pub async fn run(mut self) {
        let patch_params = k8s::PatchParams::apply(CONTROLLER_NAME);

        while let Some(Update { id, patch }) = self.updates.recv().await {
            // Leadership may have been lost while the update was queued.
            if !self.claims.borrow().is_current_for(&self.name) {
                tracing::debug!(%id, "Not the leader; dropping status update");
                continue;
            }

            let start = Instant::now();
            let patched = if id.is_kind(&k8s::group::<Gateway>(), &k8s::kind::<Gateway>()) {
                self.patch_status::<Gateway>(&id, &patch_params, &patch).await.map(|r| r.map(drop))
            } else if id.is_kind(&k8s::group::<HttpRoute>(), &k8s::kind::<HttpRoute>()) {
                self.patch_status::<HttpRoute>(&id, &patch_params, &patch).await.map(|r| r.map(drop))
            } else if id.is_kind(&k8s::group::<RouteOption>(), &k8s::kind::<RouteOption>()) {
                self.patch_status::<RouteOption>(&id, &patch_params, &patch).await.map(|r| r.map(drop))
            } else if id.is_kind(
                &k8s::group::<VirtualHostOption>(),
                &k8s::kind::<VirtualHostOption>(),
            ) {
                self.patch_status::<VirtualHostOption>(&id, &patch_params, &patch)
                    .await.map(|r| r.map(drop))
            } else if id.is_kind(
                &k8s::group::<ListenerOption>(),
                &k8s::kind::<ListenerOption>(),
            ) {
                self.patch_status::<ListenerOption>(&id, &patch_params, &patch)
                    .await.map(|r| r.map(drop))
            } else {
                tracing::error!(%id, "Unexpected resource kind in status update");
                continue;
            };
            self.metrics
                .patch_duration
                .observe(start.elapsed().as_secs_f64());

            match patched {
                Ok(Ok(_)) => {
                    self.metrics.patches_applied.inc();
                }
                Ok(Err(error)) => {
                    self.metrics.patch_failures.inc();
                    tracing::error!(%id, %error, "Patch failed");
                }
                Err(_) => {
                    self.metrics.patch_timeouts.inc();
                    tracing::error!(%id, timeout = ?self.patch_timeout, "Patch timed out");
                }
            }
        }
    }

    async fn patch_status<K>(
        &self,
        id: &ObjectRef,
        params: &k8s::PatchParams,
        patch: &k8s::Patch<serde_json::Value>,
    ) -> Result<Result<K, k8s::Error>, time::error::Elapsed>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
        K: Clone + Debug + DeserializeOwned + Serialize,
    {
        let api = k8s::Api::<K>::namespaced(self.client.clone(), &id.namespace);
        time::timeout(self.patch_timeout, api.patch_status(&id.name, params, patch)).await
    }
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patches_applied = Counter::default();
        prom.register(
            "patches_applied",
            "Count of successful status patches",
            patches_applied.clone(),
        );

        let patch_failures = Counter::default();
        prom.register(
            "patch_failures",
            "Count of failed status patches",
            patch_failures.clone(),
        );

        let patch_timeouts = Counter::default();
        prom.register(
            "patch_timeouts",
            "Count of status patches that timed out",
            patch_timeouts.clone(),
        );

        let patch_duration = Histogram::new([0.01, 0.05, 0.1, 0.5, 1.0, 5.0].into_iter());
        prom.register_with_unit(
            "patch_duration",
            "Time taken to apply status patches",
            Unit::Seconds,
            patch_duration.clone(),
        );

        Self {
            patches_applied,
            patch_failures,
            patch_timeouts,
            patch_duration,
        }
    }
}

// === impl Index ===

impl Index {
    pub fn shared(
        name: impl ToString,
        claims: watch::Receiver<Arc<Claim>>,
        updates: mpsc::Sender<Update>,
        metrics: IndexMetrics,
    ) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            name: name.to_string(),
            claims,
            updates,
            metrics,
            resources: HashMap::default(),
            reports: None,
        }))
    }

    /// Recomputes statuses on a fixed interval so that patches dropped by a
    /// full queue, or skipped while another replica held the lease, are
    /// eventually applied.
    pub async fn run(index: SharedIndex, period: Duration) {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            index.read().reconcile();
        }
    }

    /// Records the reports of a translation run and patches every resource
    /// whose status changed.
    pub fn publish(&mut self, reports: Arc<ReportMap>) {
        self.reports = Some(reports);
        self.reconcile();
    }

    fn is_leader(&self) -> bool {
        self.claims.borrow().is_current_for(&self.name)
    }

    fn reconcile(&self) {
        if !self.is_leader() {
            tracing::trace!(name = %self.name, "Not the leader; skipping reconciliation");
            return;
        }
        for (id, observed) in self.resources.iter() {
            self.reconcile_resource(id, observed);
        }
    }

    fn reconcile_resource(&self, id: &ObjectRef, observed: &Observed) {
        // Nothing is known about the desired state until a translation has run.
        let Some(reports) = self.reports.as_deref() else {
            return;
        };
        if let Some(patch) = make_status_patch(id, observed, reports) {
            self.send(Update {
                id: id.clone(),
                patch,
            });
        }
    }

    fn send(&self, update: Update) {
        let id = update.id.clone();
        match self.updates.try_send(update) {
            Ok(()) => {
                self.metrics.patches_enqueued.inc();
            }
            Err(error) => {
                self.metrics.patches_dropped.inc();
                tracing::warn!(%id, %error, "Failed to enqueue status update");
            }
        }
    }

    fn observe(&mut self, id: ObjectRef, observed: Observed) {
        self.resources.insert(id.clone(), observed.clone());
        if self.is_leader() {
            self.reconcile_resource(&id, &observed);
        }
    }

    fn forget(&mut self, id: &ObjectRef) {
        self.resources.remove(id);
    }
}

/// Computes the status patch for a resource, if its status must change.
fn make_status_patch(
    id: &ObjectRef,
    Observed { generation, status }: &Observed,
    reports: &ReportMap,
) -> Option<k8s::Patch<serde_json::Value>> {
    #[cfg(not(test))]
    let now = chrono::Utc::now();
    #[cfg(test)]
    let now = chrono::DateTime::<chrono::Utc>::MIN_UTC;
    let stamp = Stamp {
        now,
        generation: *generation,
    };

    let reported = reports.for_resource(id).next().is_some();
    let desired = match status {
        ObservedStatus::Gateway(current) => {
            if !reported {
                return None;
            }
            let desired = conditions::gateway_status(id, reports, current.as_ref(), stamp);
            if current.as_ref() == Some(&desired) {
                return None;
            }
            serde_json::to_value(desired)
        }
        ObservedStatus::HttpRoute(current) => {
            // Routes that are no longer translated still need their stale
            // parent entries removed.
            let owned = current.as_ref().is_some_and(|s| {
                s.parents.iter().any(|p| p.controller_name == CONTROLLER_NAME)
            });
            if !reported && !owned {
                return None;
            }
            let desired = conditions::http_route_status(
                id,
                CONTROLLER_NAME,
                reports,
                current.as_ref(),
                stamp,
            );
            if current.as_ref() == Some(&desired) {
                return None;
            }
            serde_json::to_value(desired)
        }
        ObservedStatus::Policy(current) => {
            if !reported {
                return None;
            }
            let desired = conditions::policy_status(id, reports, current.as_ref(), stamp);
            if current.as_ref() == Some(&desired) {
                return None;
            }
            serde_json::to_value(desired)
        }
    };

    match desired {
        Ok(status) => Some(make_patch(id, status)),
        Err(error) => {
            tracing::error!(%id, %error, "Failed to serialize status");
            None
        }
    }
}

fn make_patch(id: &ObjectRef, status: serde_json::Value) -> k8s::Patch<serde_json::Value> {
    k8s::Patch::Merge(serde_json::json!({
        "apiVersion": api_version(id),
        "kind": id.kind,
        "name": id.name,
        "status": status,
    }))
}

fn api_version(id: &ObjectRef) -> String {
    let version = if id.group == k8s::policy::GROUP {
        "v1alpha1"
    } else {
        "v1"
    };
    format!("{}/{version}", id.group)
}

fn object_ref<K>(resource: &K) -> ObjectRef
where
    K: Resource<DynamicType = ()>,
{
    ObjectRef::new(
        k8s::group::<K>(),
        k8s::kind::<K>(),
        resource.namespace().unwrap_or_default(),
        resource.name_unchecked(),
    )
}

fn delete_ref<K>(namespace: String, name: String) -> ObjectRef
where
    K: Resource<DynamicType = ()>,
{
    ObjectRef::new(k8s::group::<K>(), k8s::kind::<K>(), namespace, name)
}

impl kubert::index::IndexNamespacedResource<Gateway> for Index {
    fn apply(&mut self, resource: Gateway) {
        let id = object_ref(&resource);
        let observed = Observed {
            generation: resource.metadata.generation,
            status: ObservedStatus::Gateway(resource.status),
        };
        self.observe(id, observed);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.forget(&delete_ref::<Gateway>(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<HttpRoute> for Index {
    fn apply(&mut self, resource: HttpRoute) {
        let id = object_ref(&resource);
        let observed = Observed {
            generation: resource.metadata.generation,
            status: ObservedStatus::HttpRoute(resource.status),
        };
        self.observe(id, observed);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.forget(&delete_ref::<HttpRoute>(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<RouteOption> for Index {
    fn apply(&mut self, resource: RouteOption) {
        let id = object_ref(&resource);
        let observed = Observed {
            generation: resource.metadata.generation,
            status: ObservedStatus::Policy(resource.status),
        };
        self.observe(id, observed);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.forget(&delete_ref::<RouteOption>(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<VirtualHostOption> for Index {
    fn apply(&mut self, resource: VirtualHostOption) {
        let id = object_ref(&resource);
        let observed = Observed {
            generation: resource.metadata.generation,
            status: ObservedStatus::Policy(resource.status),
        };
        self.observe(id, observed);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.forget(&delete_ref::<VirtualHostOption>(namespace, name));
    }
}

impl kubert::index::IndexNamespacedResource<ListenerOption> for Index {
    fn apply(&mut self, resource: ListenerOption) {
        let id = object_ref(&resource);
        let observed = Observed {
            generation: resource.metadata.generation,
            status: ObservedStatus::Policy(resource.status),
        };
        self.observe(id, observed);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.forget(&delete_ref::<ListenerOption>(namespace, name));
    }
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let patches_enqueued = Counter::default();
        prom.register(
            "patches_enqueued",
            "Count of status patches enqueued for the controller",
            patches_enqueued.clone(),
        );

        let patches_dropped = Counter::default();
        prom.register(
            "patches_dropped",
            "Count of status patches dropped because the queue was full",
            patches_dropped.clone(),
        );

        Self {
            patches_enqueued,
            patches_dropped,
        }
    }
}
