use crate::policy::{ListenerOption, Policies};
use gateway_policy_controller_core::{
    gateway::TranslationInput,
    ir::ListenerIr,
    plugin::{Applied, Capabilities, ListenerContext, ListenerPlugin, StatusPlugin},
    report::{condition_type, reason},
    Condition, ConditionStatus, Plugin, PluginError, ReportMap, ScopeKey,
};
use std::sync::Arc;

/// Applies the single highest-precedence ListenerOption to each listener.
#[derive(Debug)]
pub struct ListenerOptionsPlugin {
    policies: Arc<Policies>,
}

// === impl ListenerOptionsPlugin ===

impl ListenerOptionsPlugin {
    pub fn new(policies: Arc<Policies>) -> Self {
        Self { policies }
    }
}

impl Plugin for ListenerOptionsPlugin {
    const NAME: &'static str = "listener-options";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.listener(self.clone()).status(self);
    }
}

impl ListenerPlugin for ListenerOptionsPlugin {
    fn apply_listener(
        &self,
        ctx: &mut ListenerContext<'_>,
        mut listener: ListenerIr,
    ) -> Applied<ListenerIr> {
        let Some(selected) = self
            .policies
            .listener_options
            .by_target()
            .resolve(&ctx.gateway.id, Some(&ctx.listener.name))
            .first()
        else {
            return Applied::ok(listener);
        };

        let options = &selected.resource.options;
        if let Err(error) = options.validate() {
            return Applied::err(listener, error);
        }
        tracing::debug!(
            policy = %selected.resource.id,
            listener = %ctx.listener.name,
            "Applying ListenerOption"
        );
        if options.per_connection_buffer_limit_bytes.is_some() {
            listener.per_connection_buffer_limit_bytes = options.per_connection_buffer_limit_bytes;
        }
        Applied::ok(listener)
    }
}

impl StatusPlugin for ListenerOptionsPlugin {
    fn apply_status(&self, reports: &mut ReportMap, _: &TranslationInput) -> Result<(), PluginError> {
        for policy in self.policies.listener_options.iter() {
            reports
                .scope_mut(ScopeKey::resource(policy.id.clone()))
                .set_condition(accepted(policy));
        }
        Ok(())
    }
}

fn accepted(policy: &ListenerOption) -> Condition {
    match policy.options.validate() {
        Ok(()) => Condition::new(
            condition_type::ACCEPTED,
            ConditionStatus::True,
            reason::ACCEPTED,
            "",
        ),
        Err(error) => Condition::new(
            condition_type::ACCEPTED,
            ConditionStatus::False,
            reason::INVALID,
            error.to_string(),
        ),
    }
}
