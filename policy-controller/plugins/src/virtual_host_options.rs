use crate::{
    filters,
    policy::{Policies, VirtualHostOption, VirtualHostOptions},
};
use gateway_policy_controller_core::{
    gateway::{Gateway, Listener, TranslationInput},
    ir::VirtualHostIr,
    plugin::{Applied, Capabilities, StatusPlugin, VirtualHostContext, VirtualHostPlugin},
    report::{condition_type, reason},
    Attachment, Condition, ConditionStatus, ObjectRef, Plugin, PluginError, ReportMap, ScopeKey,
    TypedConfig,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Applies VirtualHostOption policies to every virtual host of the listeners
/// they attach to.
#[derive(Debug)]
pub struct VirtualHostOptionsPlugin {
    policies: Arc<Policies>,
}

/// The outcome of merging a listener's candidate options.
struct Merged {
    options: VirtualHostOptions,
    contributors: Vec<ObjectRef>,
    shadowed: Vec<ObjectRef>,
}

// === impl VirtualHostOptionsPlugin ===

impl VirtualHostOptionsPlugin {
    pub fn new(policies: Arc<Policies>) -> Self {
        Self { policies }
    }

    fn candidates(&self, gateway: &Gateway, listener: &Listener) -> Vec<Attachment<VirtualHostOption>> {
        self.policies
            .virtual_host_options
            .by_target()
            .resolve(&gateway.id, Some(&listener.name))
            .ordered()
    }

    fn merge(&self, gateway: &Gateway, listener: &Listener) -> Merged {
        let mut merged = Merged {
            options: VirtualHostOptions::default(),
            contributors: Vec::new(),
            shadowed: Vec::new(),
        };
        for Attachment { resource, .. } in self.candidates(gateway, listener) {
            if merged.options.merge_from(&resource.options) {
                merged.contributors.push(resource.id.clone());
            } else if !resource.options.is_empty() {
                merged.shadowed.push(resource.id.clone());
            }
        }
        merged
    }
}

impl Plugin for VirtualHostOptionsPlugin {
    const NAME: &'static str = "virtual-host-options";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.virtual_host(self.clone()).status(self);
    }
}

impl VirtualHostPlugin for VirtualHostOptionsPlugin {
    fn apply_virtual_host(
        &self,
        ctx: &mut VirtualHostContext<'_>,
        mut vh: VirtualHostIr,
    ) -> Applied<VirtualHostIr> {
        let Merged { options, .. } = self.merge(ctx.gateway, ctx.listener);
        if options.is_empty() {
            return Applied::ok(vh);
        }
        if let Err(error) = options.validate() {
            return Applied::err(vh, error);
        }

        let VirtualHostOptions {
            retries,
            cors,
            request_headers,
            response_headers,
        } = options;

        if retries.is_some() {
            vh.retry = retries;
        }
        if let Some(headers) = request_headers {
            vh.request_headers.extend(&headers);
        }
        if let Some(headers) = response_headers {
            vh.response_headers.extend(&headers);
        }
        if let Some(cors) = cors {
            let filter = filters::cors().and_then(|f| Ok((f, TypedConfig::encode(&cors)?)));
            match filter {
                Ok((filter, config)) => {
                    vh.typed_per_filter_config.insert(filter.name.clone(), config);
                    vh.required_filters.push(filter);
                }
                Err(error) => return Applied::err(vh, error),
            }
        }

        Applied::ok(vh)
    }
}

impl StatusPlugin for VirtualHostOptionsPlugin {
    fn apply_status(
        &self,
        reports: &mut ReportMap,
        input: &TranslationInput,
    ) -> Result<(), PluginError> {
        // Policies that contributed to some listener, and the conflicts that
        // kept policies from contributing to others.
        let mut contributed = BTreeSet::new();
        let mut conflicts = BTreeMap::<ObjectRef, Vec<String>>::new();

        for gateway in &input.gateways {
            for listener in &gateway.listeners {
                let merged = self.merge(gateway, listener);
                contributed.extend(merged.contributors.iter().cloned());
                let winners = merged
                    .contributors
                    .iter()
                    .map(|id| format!("{}/{}", id.namespace, id.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                for id in merged.shadowed {
                    let message = format!(
                        "VirtualHostOption '{}/{}' not attached to listener '{}' on Gateway '{}/{}' due to conflict with more specific or older VirtualHostOptions '{}'",
                        id.namespace,
                        id.name,
                        listener.name,
                        gateway.id.namespace,
                        gateway.id.name,
                        winners,
                    );
                    conflicts.entry(id).or_default().push(message);
                }
            }
        }

        for policy in self.policies.virtual_host_options.iter() {
            let condition = status(
                policy,
                contributed.contains(&policy.id),
                conflicts.get(&policy.id).map(Vec::as_slice).unwrap_or_default(),
            );
            reports
                .scope_mut(ScopeKey::resource(policy.id.clone()))
                .set_condition(condition);
        }
        Ok(())
    }
}

fn status(policy: &VirtualHostOption, contributed: bool, conflicts: &[String]) -> Condition {
    if let Err(error) = policy.options.validate() {
        return Condition::new(
            condition_type::ACCEPTED,
            ConditionStatus::False,
            reason::INVALID,
            error.to_string(),
        );
    }
    if !conflicts.is_empty() && !contributed {
        return Condition::new(
            condition_type::ACCEPTED,
            ConditionStatus::False,
            reason::CONFLICTED,
            conflicts.join("; "),
        );
    }
    // A policy that is only partly shadowed is accepted, noting where it does
    // not apply.
    Condition::new(
        condition_type::ACCEPTED,
        ConditionStatus::True,
        reason::ACCEPTED,
        conflicts.join("; "),
    )
}
