//! Plugin capabilities and the registry that orders them.
//!
//! A plugin joins one or more capability lists when it is added to a
//! [`RegistryBuilder`]. The translator invokes the plugins of each capability
//! in the order they were added, threading each unit's output through them.

use crate::{
    gateway::{Gateway, HttpRoute, HttpRouteRule, Listener, RouteMatch, TranslationInput},
    ir::{GatewayIr, ListenerIr, RouteIr, VirtualHostIr},
    report::{ReportMap, Reporter, ScopeKey},
};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// Errors returned by plugins.
///
/// All but [`PluginError::Invariant`] are confined to the unit being
/// translated: they are reported as conditions and the unit fails closed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// Mutually exclusive edits were requested for the same unit.
    #[error("{0}")]
    Conflict(String),

    /// A referenced object does not exist or has the wrong type.
    #[error("{0}")]
    NotFound(String),

    /// Required configuration is missing or invalid.
    #[error("{0}")]
    Malformed(String),

    /// The translation machinery itself is broken.
    #[error("{0}")]
    Invariant(String),
}

/// The output of one plugin step, along with the step's result.
///
/// Plugins always hand back an output, even when they fail, so that later
/// plugins in the chain still run.
#[must_use]
#[derive(Debug)]
pub struct Applied<T> {
    pub output: T,
    pub result: Result<(), PluginError>,
}

pub struct RouteContext<'a> {
    pub gateway: &'a Gateway,
    pub listener: &'a Listener,
    pub route: &'a HttpRoute,
    pub rule: &'a HttpRouteRule,
    pub rule_index: usize,
    pub route_match: Option<&'a RouteMatch>,
    pub reporter: &'a mut Reporter,
}

pub struct VirtualHostContext<'a> {
    pub gateway: &'a Gateway,
    pub listener: &'a Listener,
    pub reporter: &'a mut Reporter,
}

pub struct ListenerContext<'a> {
    pub gateway: &'a Gateway,
    pub listener: &'a Listener,
    pub reporter: &'a mut Reporter,
}

pub struct PostTranslationContext<'a> {
    pub input: &'a TranslationInput,
    pub gateways: &'a [GatewayIr],
    reporters: BTreeMap<ScopeKey, Reporter>,
}

pub trait RoutePlugin: Send + Sync {
    fn apply_route(&self, ctx: &mut RouteContext<'_>, route: RouteIr) -> Applied<RouteIr>;
}

pub trait VirtualHostPlugin: Send + Sync {
    fn apply_virtual_host(
        &self,
        ctx: &mut VirtualHostContext<'_>,
        virtual_host: VirtualHostIr,
    ) -> Applied<VirtualHostIr>;
}

pub trait ListenerPlugin: Send + Sync {
    fn apply_listener(
        &self,
        ctx: &mut ListenerContext<'_>,
        listener: ListenerIr,
    ) -> Applied<ListenerIr>;
}

/// Runs once per translation, after all units have been translated.
pub trait PostTranslationPlugin: Send + Sync {
    fn apply_post_translation(
        &self,
        ctx: &mut PostTranslationContext<'_>,
    ) -> Result<(), PluginError>;
}

/// Reports conditions for resources owned by a plugin, such as policies.
pub trait StatusPlugin: Send + Sync {
    fn apply_status(
        &self,
        reports: &mut ReportMap,
        input: &TranslationInput,
    ) -> Result<(), PluginError>;
}

/// A plugin declares the capability lists it joins.
///
/// ```ignore
/// impl Plugin for Example {
///     const NAME: &'static str = "example";
///
///     fn register(self: Arc<Self>, caps: &mut Capabilities) {
///         caps.route(self.clone()).status(self);
///     }
/// }
/// ```
pub trait Plugin: Send + Sync + 'static {
    const NAME: &'static str;

    fn register(self: Arc<Self>, capabilities: &mut Capabilities);
}

pub struct Registered<T: ?Sized> {
    pub name: &'static str,
    pub plugin: Arc<T>,
}

#[derive(Default)]
pub struct Capabilities {
    current: &'static str,
    route: Vec<Registered<dyn RoutePlugin>>,
    virtual_host: Vec<Registered<dyn VirtualHostPlugin>>,
    listener: Vec<Registered<dyn ListenerPlugin>>,
    post_translation: Vec<Registered<dyn PostTranslationPlugin>>,
    status: Vec<Registered<dyn StatusPlugin>>,
}

/// An ordered, immutable set of plugins used for one or more translation
/// runs.
pub struct Registry {
    capabilities: Capabilities,
}

#[derive(Default)]
pub struct RegistryBuilder {
    capabilities: Capabilities,
}

// === impl PluginError ===

impl PluginError {
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

// === impl Applied ===

impl<T> Applied<T> {
    pub fn ok(output: T) -> Self {
        Self {
            output,
            result: Ok(()),
        }
    }

    pub fn err(output: T, error: PluginError) -> Self {
        Self {
            output,
            result: Err(error),
        }
    }

    pub fn new(output: T, result: Result<(), PluginError>) -> Self {
        Self { output, result }
    }
}

// === impl PostTranslationContext ===

impl<'a> PostTranslationContext<'a> {
    pub(crate) fn new(input: &'a TranslationInput, gateways: &'a [GatewayIr]) -> Self {
        Self {
            input,
            gateways,
            reporters: BTreeMap::new(),
        }
    }

    /// Returns the reporter for a scope, creating it on first use.
    pub fn reporter(&mut self, scope: ScopeKey) -> &mut Reporter {
        self.reporters
            .entry(scope.clone())
            .or_insert_with(|| Reporter::new(scope))
    }

    pub(crate) fn into_reporters(self) -> impl Iterator<Item = Reporter> {
        self.reporters.into_values()
    }
}

// === impl Capabilities ===

impl Capabilities {
    pub fn route(&mut self, plugin: Arc<dyn RoutePlugin>) -> &mut Self {
        let name = self.current;
        self.route.push(Registered { name, plugin });
        self
    }

    pub fn virtual_host(&mut self, plugin: Arc<dyn VirtualHostPlugin>) -> &mut Self {
        let name = self.current;
        self.virtual_host.push(Registered { name, plugin });
        self
    }

    pub fn listener(&mut self, plugin: Arc<dyn ListenerPlugin>) -> &mut Self {
        let name = self.current;
        self.listener.push(Registered { name, plugin });
        self
    }

    pub fn post_translation(&mut self, plugin: Arc<dyn PostTranslationPlugin>) -> &mut Self {
        let name = self.current;
        self.post_translation.push(Registered { name, plugin });
        self
    }

    pub fn status(&mut self, plugin: Arc<dyn StatusPlugin>) -> &mut Self {
        let name = self.current;
        self.status.push(Registered { name, plugin });
        self
    }
}

// === impl Registry ===

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn route_plugins(&self) -> &[Registered<dyn RoutePlugin>] {
        &self.capabilities.route
    }

    pub fn virtual_host_plugins(&self) -> &[Registered<dyn VirtualHostPlugin>] {
        &self.capabilities.virtual_host
    }

    pub fn listener_plugins(&self) -> &[Registered<dyn ListenerPlugin>] {
        &self.capabilities.listener
    }

    pub fn post_translation_plugins(&self) -> &[Registered<dyn PostTranslationPlugin>] {
        &self.capabilities.post_translation
    }

    pub fn status_plugins(&self) -> &[Registered<dyn StatusPlugin>] {
        &self.capabilities.status
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn names<T: ?Sized>(plugins: &[Registered<T>]) -> Vec<&'static str> {
            plugins.iter().map(|p| p.name).collect()
        }

        let caps = &self.capabilities;
        f.debug_struct("Registry")
            .field("route", &names(&caps.route))
            .field("virtual_host", &names(&caps.virtual_host))
            .field("listener", &names(&caps.listener))
            .field("post_translation", &names(&caps.post_translation))
            .field("status", &names(&caps.status))
            .finish()
    }
}

// === impl RegistryBuilder ===

impl RegistryBuilder {
    pub fn with<P: Plugin>(self, plugin: P) -> Self {
        self.with_shared(Arc::new(plugin))
    }

    pub fn with_shared<P: Plugin>(mut self, plugin: Arc<P>) -> Self {
        self.capabilities.current = P::NAME;
        plugin.register(&mut self.capabilities);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            capabilities: self.capabilities,
        }
    }
}
