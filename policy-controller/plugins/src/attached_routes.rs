use ahash::AHashSet as HashSet;
use gateway_policy_controller_core::{
    ir::ListenerIr,
    plugin::{Capabilities, PostTranslationContext, PostTranslationPlugin},
    Plugin, PluginError, ScopeKey,
};
use std::sync::Arc;

/// Records the number of distinct routes programmed on each listener.
#[derive(Clone, Debug, Default)]
pub struct AttachedRoutes(());

// === impl AttachedRoutes ===

impl Plugin for AttachedRoutes {
    const NAME: &'static str = "attached-routes";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.post_translation(self);
    }
}

impl PostTranslationPlugin for AttachedRoutes {
    fn apply_post_translation(
        &self,
        ctx: &mut PostTranslationContext<'_>,
    ) -> Result<(), PluginError> {
        let gateways = ctx.gateways;
        for gateway in gateways {
            for listener in &gateway.listeners {
                let count = u32::try_from(count_routes(listener))
                    .map_err(|_| PluginError::Invariant("route count overflow".to_string()))?;
                ctx.reporter(ScopeKey::listener(&gateway.gateway, &listener.name))
                    .set_attached_routes(count);
            }
        }
        Ok(())
    }
}

fn count_routes(listener: &ListenerIr) -> usize {
    listener
        .routes()
        .map(|r| &r.source)
        .collect::<HashSet<_>>()
        .len()
}
