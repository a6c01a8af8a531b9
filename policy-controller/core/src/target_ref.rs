use std::fmt;

pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
pub const CORE_GROUP: &str = "core";

/// Identifies a namespaced resource by its group, kind, namespace and name.
///
/// This is also the *target key* used by attachment indexes: it names the
/// owning resource irrespective of any section within it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// A reference from an attachable resource to its target.
///
/// The namespace defaults to the namespace of the resource holding the
/// reference. The section, when set, names a listener of a Gateway or a rule
/// of a route.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetRef {
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub section: Option<String>,
}

/// The *full key* of an attachment: its target and optional section.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttachmentKey {
    pub target: ObjectRef,
    pub section: Option<String>,
}

// === impl ObjectRef ===

impl ObjectRef {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn gateway(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(GATEWAY_API_GROUP, "Gateway", namespace, name)
    }

    pub fn http_route(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(GATEWAY_API_GROUP, "HTTPRoute", namespace, name)
    }

    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(CORE_GROUP, "Service", namespace, name)
    }

    pub fn is_kind(&self, group: &str, kind: &str) -> bool {
        groups_eq(&self.group, group) && self.kind.eq_ignore_ascii_case(kind)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} {}/{}",
            self.kind, self.group, self.namespace, self.name
        )
    }
}

// === impl TargetRef ===

impl TargetRef {
    pub fn new(group: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    /// Checks whether the reference names the given group and kind.
    pub fn targets_kind(&self, group: &str, kind: &str) -> bool {
        groups_eq(&self.group, group) && self.kind.eq_ignore_ascii_case(kind)
    }

    /// Resolves the reference as written by a resource in `local_ns`.
    pub fn resolve(&self, local_ns: &str) -> AttachmentKey {
        let namespace = match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => local_ns,
        };
        let group = if self.group.is_empty() {
            CORE_GROUP
        } else {
            &self.group
        };
        AttachmentKey {
            target: ObjectRef::new(group, &self.kind, namespace, &self.name),
            section: self.section.clone().filter(|s| !s.is_empty()),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ", self.kind, self.group)?;
        if let Some(ns) = self.namespace.as_deref() {
            write!(f, "{ns}/")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(section) = self.section.as_deref() {
            write!(f, ":{section}")?;
        }
        Ok(())
    }
}

// === impl AttachmentKey ===

impl AttachmentKey {
    pub fn whole(target: ObjectRef) -> Self {
        Self {
            target,
            section: None,
        }
    }

    pub fn section(target: ObjectRef, section: impl Into<String>) -> Self {
        Self {
            target,
            section: Some(section.into()),
        }
    }
}

/// The core API group may be written as `core`, as an empty string, or be
/// omitted entirely.
fn groups_eq(a: &str, b: &str) -> bool {
    fn normalize(g: &str) -> &str {
        if g.is_empty() {
            CORE_GROUP
        } else {
            g
        }
    }
    normalize(a).eq_ignore_ascii_case(normalize(b))
}
