//! Applies the filters defined by the Gateway API itself to each route.

use crate::policy::{POLICY_GROUP, ROUTE_OPTION_KIND};
use gateway_policy_controller_core::{
    gateway::{LocalObjectRef, RouteFilter},
    ir::{Action, RouteIr},
    plugin::{Applied, Capabilities, RouteContext, RoutePlugin},
    Plugin, PluginError,
};
use std::sync::Arc;

/// Extension kinds claimed by other plugins.
const CLAIMED_EXTENSIONS: &[(&str, &str)] = &[(POLICY_GROUP, ROUTE_OPTION_KIND)];

#[derive(Clone, Debug, Default)]
pub struct BuiltinFilters(());

// === impl BuiltinFilters ===

impl Plugin for BuiltinFilters {
    const NAME: &'static str = "builtin";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.route(self);
    }
}

impl RoutePlugin for BuiltinFilters {
    fn apply_route(&self, ctx: &mut RouteContext<'_>, mut route: RouteIr) -> Applied<RouteIr> {
        let mut redirected = false;
        let mut rewritten = false;
        let mut result = Ok(());

        for filter in &ctx.rule.filters {
            let applied = match filter {
                RouteFilter::RequestHeaderModifier(modifier) => {
                    route.request_headers.extend(modifier);
                    Ok(())
                }
                RouteFilter::ResponseHeaderModifier(modifier) => {
                    route.response_headers.extend(modifier);
                    Ok(())
                }
                RouteFilter::RequestRedirect(redirect) => {
                    if redirected || rewritten {
                        Err(PluginError::Conflict(
                            "RequestRedirect may not be combined with another RequestRedirect or URLRewrite"
                                .to_string(),
                        ))
                    } else {
                        redirected = true;
                        route.action = Some(Action::Redirect(redirect.clone()));
                        Ok(())
                    }
                }
                RouteFilter::UrlRewrite(rewrite) => {
                    if redirected || rewritten {
                        Err(PluginError::Conflict(
                            "URLRewrite may not be combined with another URLRewrite or RequestRedirect"
                                .to_string(),
                        ))
                    } else {
                        rewritten = true;
                        route.rewrite = Some(rewrite.clone());
                        Ok(())
                    }
                }
                RouteFilter::ExtensionRef(ext) => check_claimed(ext),
            };

            // Every filter is still visited so that later edits are applied
            // consistently; only the first failure is reported.
            if let Err(error) = applied {
                tracing::debug!(route = %ctx.route.id, %error, "Invalid route filter");
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }

        Applied::new(route, result)
    }
}

fn check_claimed(ext: &LocalObjectRef) -> Result<(), PluginError> {
    if CLAIMED_EXTENSIONS
        .iter()
        .any(|(group, kind)| ext.is_kind(group, kind))
    {
        return Ok(());
    }
    Err(PluginError::Malformed(format!(
        "unsupported ExtensionRef {}.{} {}",
        ext.kind, ext.group, ext.name
    )))
}
