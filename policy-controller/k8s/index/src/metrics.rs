use crate::SharedIndex;
use gateway_policy_controller_core::ObjectRef;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::collections::BTreeMap;

#[derive(Debug)]
struct Instrumented(SharedIndex);

pub fn register(reg: &mut Registry, index: SharedIndex) {
    reg.register_collector(Box::new(Instrumented(index)));
}

/// Counts entries per namespace.
fn by_namespace<'a, T: 'a>(
    entries: impl Iterator<Item = (&'a ObjectRef, T)>,
) -> BTreeMap<&'a str, u32> {
    let mut counts = BTreeMap::new();
    for (id, _) in entries {
        *counts.entry(id.namespace.as_str()).or_default() += 1;
    }
    counts
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let this = self.0.read();

        let sizes = [
            (
                "gateway_index_size",
                "The number of Gateways in the index",
                by_namespace(this.gateways.iter()),
            ),
            (
                "http_route_index_size",
                "The number of HTTPRoutes in the index",
                by_namespace(this.http_routes.iter()),
            ),
            (
                "service_index_size",
                "The number of Services in the index",
                by_namespace(this.services.iter()),
            ),
        ];
        for (name, help, counts) in sizes {
            let mut family = encoder.encode_descriptor(name, help, None, MetricType::Gauge)?;
            for (ns, count) in counts {
                let labels = vec![("namespace", ns)];
                ConstGauge::new(count).encode(family.encode_family(&labels)?)?;
            }
        }

        let policies = [
            ("RouteOption", by_namespace(this.route_options.iter())),
            (
                "VirtualHostOption",
                by_namespace(this.virtual_host_options.iter()),
            ),
            ("ListenerOption", by_namespace(this.listener_options.iter())),
        ];
        let mut family = encoder.encode_descriptor(
            "policy_index_size",
            "The number of option policies in the index",
            None,
            MetricType::Gauge,
        )?;
        for (kind, counts) in policies {
            for (ns, count) in counts {
                let labels = vec![("namespace", ns), ("kind", kind)];
                ConstGauge::new(count).encode(family.encode_family(&labels)?)?;
            }
        }

        Ok(())
    }
}
