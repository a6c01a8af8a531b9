use crate::{
    core::{self, ir::GatewayIr, Translation},
    index::Snapshot,
    plugins, status,
};
use prometheus_client::{
    metrics::{counter::Counter, histogram::Histogram},
    registry::{Registry, Unit},
};
use std::sync::Arc;
use tokio::{sync::watch, time::Instant};

/// The proxy configuration of every Gateway, ordered by Gateway.
pub type Config = Arc<Vec<GatewayIr>>;

/// Translates each index snapshot into proxy configuration and hands the
/// resulting reports to the status index.
pub struct Translator {
    status: status::SharedIndex,
    config: watch::Sender<Config>,
    metrics: TranslationMetrics,
}

#[derive(Clone, Debug)]
pub struct TranslationMetrics {
    translations: Counter,
    translation_failures: Counter,
    translation_duration: Histogram,
}

// === impl Translator ===

impl Translator {
    pub fn new(
        status: status::SharedIndex,
        metrics: TranslationMetrics,
    ) -> (Self, watch::Receiver<Config>) {
        let (config, rx) = watch::channel(Config::default());
        let translator = Self {
            status,
            config,
            metrics,
        };
        (translator, rx)
    }

    /// Translates every snapshot published by the index until the index is
    /// dropped. Snapshots published while a translation runs are coalesced.
    pub async fn run(self, mut snapshots: watch::Receiver<Arc<Snapshot>>) {
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            self.translate(&snapshot);
            if snapshots.changed().await.is_err() {
                tracing::debug!("Index dropped; stopping translation");
                return;
            }
        }
    }

    pub(crate) fn translate(&self, snapshot: &Snapshot) {
        let registry = plugins::registry(snapshot.policies.clone());

        let start = Instant::now();
        let result = core::translate(&registry, &snapshot.input);
        self.metrics
            .translation_duration
            .observe(start.elapsed().as_secs_f64());

        let Translation { gateways, reports } = match result {
            Ok(translation) => translation,
            Err(error) => {
                // The last good configuration stays in place until the next
                // snapshot translates cleanly.
                self.metrics.translation_failures.inc();
                tracing::error!(%error, "Translation failed");
                return;
            }
        };
        self.metrics.translations.inc();

        let updated = self.config.send_if_modified(|config| {
            if **config == gateways {
                return false;
            }
            *config = Arc::new(gateways);
            true
        });
        tracing::debug!(
            gateways = self.config.borrow().len(),
            scopes = reports.len(),
            updated,
            "Translated"
        );

        self.status.write().publish(Arc::new(reports));
    }
}

/// Logs each proxy configuration update.
pub async fn log_updates(mut config: watch::Receiver<Config>) {
    while config.changed().await.is_ok() {
        let config = config.borrow_and_update().clone();
        for gateway in config.iter() {
            tracing::info!(
                gateway = %gateway.gateway,
                listeners = gateway.listeners.len(),
                virtual_hosts = gateway
                    .listeners
                    .iter()
                    .map(|l| l.virtual_hosts.len())
                    .sum::<usize>(),
                "Proxy configuration updated"
            );
        }
    }
}

// === impl TranslationMetrics ===

impl TranslationMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let translations = Counter::default();
        prom.register(
            "translations",
            "Count of completed translation runs",
            translations.clone(),
        );

        let translation_failures = Counter::default();
        prom.register(
            "translation_failures",
            "Count of translation runs that failed",
            translation_failures.clone(),
        );

        let translation_duration =
            Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0].into_iter());
        prom.register_with_unit(
            "translation_duration",
            "Time taken to translate a snapshot",
            Unit::Seconds,
            translation_duration.clone(),
        );

        Self {
            translations,
            translation_failures,
            translation_duration,
        }
    }
}
