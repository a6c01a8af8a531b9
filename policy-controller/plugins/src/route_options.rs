use crate::{
    filters,
    policy::{Policies, RouteOption, RouteOptions, POLICY_GROUP, ROUTE_OPTION_KIND},
};
use gateway_policy_controller_core::{
    gateway::{PathModifier, RouteFilter, TranslationInput, UrlRewrite},
    ir::{Action, RouteIr},
    plugin::{Applied, Capabilities, RouteContext, RoutePlugin, StatusPlugin},
    report::{condition_type, reason},
    Condition, ConditionStatus, FilterConfig, Plugin, PluginError, ReportMap, ScopeKey,
    StagedFilter, TypedConfig,
};
use std::sync::Arc;

/// Applies RouteOption policies to routes.
///
/// A rule may reference a single RouteOption through an `ExtensionRef`
/// filter. Its options take precedence over RouteOptions attached to the
/// route (or to the rule, by section name) through target refs.
#[derive(Debug)]
pub struct RouteOptionsPlugin {
    policies: Arc<Policies>,
}

// === impl RouteOptionsPlugin ===

impl RouteOptionsPlugin {
    pub fn new(policies: Arc<Policies>) -> Self {
        Self { policies }
    }

    fn options(&self, ctx: &RouteContext<'_>) -> Result<RouteOptions, PluginError> {
        let refs = ctx
            .rule
            .filters
            .iter()
            .filter_map(|f| match f {
                RouteFilter::ExtensionRef(ext) if ext.is_kind(POLICY_GROUP, ROUTE_OPTION_KIND) => {
                    Some(ext)
                }
                _ => None,
            })
            .collect::<Vec<_>>();

        let mut options = match refs.as_slice() {
            [] => RouteOptions::default(),
            [ext] => {
                let id = ext.in_namespace(&ctx.route.id.namespace);
                let policy = self.policies.route_options.get(&id).ok_or_else(|| {
                    PluginError::NotFound(format!(
                        "RouteOption {}/{} not found",
                        id.namespace, id.name
                    ))
                })?;
                policy.options.clone()
            }
            refs => {
                return Err(PluginError::Conflict(format!(
                    "at most one RouteOption ExtensionRef may be set on a rule, found {}",
                    refs.len()
                )))
            }
        };

        let attached = self
            .policies
            .route_options
            .by_target()
            .resolve(&ctx.route.id, ctx.rule.name.as_deref())
            .ordered();
        for attachment in attached {
            options.merge_from(&attachment.resource.options);
        }

        Ok(options)
    }
}

impl Plugin for RouteOptionsPlugin {
    const NAME: &'static str = "route-options";

    fn register(self: Arc<Self>, caps: &mut Capabilities) {
        caps.route(self.clone()).status(self);
    }
}

impl RoutePlugin for RouteOptionsPlugin {
    fn apply_route(&self, ctx: &mut RouteContext<'_>, route: RouteIr) -> Applied<RouteIr> {
        let options = match self.options(ctx) {
            Ok(options) => options,
            Err(error) => return Applied::err(route, error),
        };
        if options.is_empty() {
            return Applied::ok(route);
        }
        apply(options, route)
    }
}

fn apply(options: RouteOptions, mut route: RouteIr) -> Applied<RouteIr> {
    if let Err(error) = options.validate() {
        return Applied::err(route, error);
    }

    let RouteOptions {
        fault,
        cors,
        timeout,
        retries,
        prefix_rewrite,
        direct_response,
    } = options;

    let redirected = matches!(route.action, Some(Action::Redirect(_)));
    if redirected && (direct_response.is_some() || prefix_rewrite.is_some()) {
        return Applied::err(
            route,
            PluginError::Conflict(
                "RouteOption actions may not be combined with a RequestRedirect".to_string(),
            ),
        );
    }

    let rewritten = route.rewrite.as_ref().is_some_and(|r| r.path.is_some());
    if rewritten && prefix_rewrite.is_some() {
        return Applied::err(
            route,
            PluginError::Conflict(
                "RouteOption prefixRewrite may not be combined with a URLRewrite path".to_string(),
            ),
        );
    }

    if let Some(fault) = fault {
        if let Err(error) = add_filter(&mut route, filters::fault(), &fault) {
            return Applied::err(route, error);
        }
    }
    if let Some(cors) = cors {
        if let Err(error) = add_filter(&mut route, filters::cors(), &cors) {
            return Applied::err(route, error);
        }
    }

    if timeout.is_some() {
        route.timeout = timeout;
    }
    if retries.is_some() {
        route.retry = retries;
    }
    if let Some(prefix) = prefix_rewrite {
        let rewrite = route.rewrite.get_or_insert_with(UrlRewrite::default);
        rewrite.path = Some(PathModifier::Prefix(prefix));
    }
    if let Some(response) = direct_response {
        route.action = Some(Action::DirectResponse(response));
    }

    Applied::ok(route)
}

fn add_filter<C: FilterConfig>(
    route: &mut RouteIr,
    filter: Result<StagedFilter, PluginError>,
    config: &C,
) -> Result<(), PluginError> {
    let filter = filter?;
    let config = TypedConfig::encode(config)?;
    route
        .typed_per_filter_config
        .insert(filter.name.clone(), config);
    route.required_filters.push(filter);
    Ok(())
}

impl StatusPlugin for RouteOptionsPlugin {
    fn apply_status(&self, reports: &mut ReportMap, _: &TranslationInput) -> Result<(), PluginError> {
        for policy in self.policies.route_options.iter() {
            reports
                .scope_mut(ScopeKey::resource(policy.id.clone()))
                .set_condition(accepted(policy));
        }
        Ok(())
    }
}

fn accepted(policy: &RouteOption) -> Condition {
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
