use crate::{
    specificity::CandidateSet,
    target_ref::{AttachmentKey, ObjectRef, TargetRef},
};
use chrono::{offset::Utc, DateTime};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// A resource that attaches itself to other resources through target refs.
///
/// Policies attach through `targetRefs`; routes attach to their parents
/// through `parentRefs`.
pub trait Attachable {
    /// The identity of the attaching resource.
    fn id(&self) -> &ObjectRef;

    fn target_refs(&self) -> &[TargetRef];

    /// Only used to break ties between competing attachments.
    fn creation_timestamp(&self) -> Option<DateTime<Utc>>;
}

/// A resolved fact that `resource` applies to `target` (or to one section of
/// it).
pub struct Attachment<P> {
    pub target: ObjectRef,
    pub section: Option<String>,
    pub resource: Arc<P>,
}

/// Indexes attachable resources by the targets they reference.
pub struct AttachmentIndex<P> {
    by_target: BTreeMap<ObjectRef, Vec<Attachment<P>>>,
}

// === impl Attachment ===

impl<P> Attachment<P> {
    pub fn full_key(&self) -> AttachmentKey {
        AttachmentKey {
            target: self.target.clone(),
            section: self.section.clone(),
        }
    }

    pub fn target_key(&self) -> &ObjectRef {
        &self.target
    }
}

impl<P> Clone for Attachment<P> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            section: self.section.clone(),
            resource: self.resource.clone(),
        }
    }
}

impl<P: Attachable> fmt::Debug for Attachment<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("target", &self.target)
            .field("section", &self.section)
            .field("resource", self.resource.id())
            .finish()
    }
}

// === impl AttachmentIndex ===

impl<P> Default for AttachmentIndex<P> {
    fn default() -> Self {
        Self {
            by_target: BTreeMap::new(),
        }
    }
}

impl<P: Attachable> fmt::Debug for AttachmentIndex<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_target.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}

impl<P: Attachable> FromIterator<Arc<P>> for AttachmentIndex<P> {
    fn from_iter<I: IntoIterator<Item = Arc<P>>>(iter: I) -> Self {
        let mut index = Self::default();
        for resource in iter {
            index.insert(resource);
        }
        index
    }
}

impl<P: Attachable> AttachmentIndex<P> {
    pub fn insert(&mut self, resource: Arc<P>) {
        let local_ns = resource.id().namespace.clone();
        for target_ref in resource.target_refs() {
            let AttachmentKey { target, section } = target_ref.resolve(&local_ns);
            let attachments = self.by_target.entry(target.clone()).or_default();

            // A resource may list the same target more than once.
            if attachments
                .iter()
                .any(|a| a.section == section && a.resource.id() == resource.id())
            {
                continue;
            }

            attachments.push(Attachment {
                target,
                section,
                resource: resource.clone(),
            });
        }
    }

    /// Returns the candidates attached to `target`.
    ///
    /// When `section` is set, attachments scoped to that section are returned
    /// along with attachments to the whole target. Attachments scoped to
    /// other sections are never returned.
    pub fn resolve(&self, target: &ObjectRef, section: Option<&str>) -> CandidateSet<P> {
        let mut candidates = CandidateSet::default();
        for attachment in self.by_target.get(target).into_iter().flatten() {
            match (attachment.section.as_deref(), section) {
                (None, _) => candidates.without_section.push(attachment.clone()),
                (Some(s), Some(want)) if s == want => {
                    candidates.with_section.push(attachment.clone())
                }
                _ => {}
            }
        }
        candidates
    }

    /// Returns all attachments to `target` that are live: attachments to the
    /// whole target and attachments to a section for which `has_section`
    /// holds.
    pub fn attached_to(
        &self,
        target: &ObjectRef,
        has_section: impl Fn(&str) -> bool,
    ) -> Vec<Attachment<P>> {
        self.by_target
            .get(target)
            .into_iter()
            .flatten()
            .filter(|a| a.section.as_deref().map_or(true, &has_section))
            .cloned()
            .collect()
    }

    /// Returns the attachments to `target` that name a section that does not
    /// exist. These are inert rather than erroneous, since sections may be
    /// removed out of band.
    pub fn inert(
        &self,
        target: &ObjectRef,
        has_section: impl Fn(&str) -> bool,
    ) -> Vec<Attachment<P>> {
        self.by_target
            .get(target)
            .into_iter()
            .flatten()
            .filter(|a| a.section.as_deref().is_some_and(|s| !has_section(s)))
            .cloned()
            .collect()
    }

    /// Iterates over every distinct attached resource, ordered by identity.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<P>> {
        let mut seen = BTreeMap::new();
        for attachment in self.by_target.values().flatten() {
            seen.entry(attachment.resource.id())
                .or_insert(&attachment.resource);
        }
        seen.into_values()
    }

    pub fn len(&self) -> usize {
        self.by_target.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target_ref::GATEWAY_API_GROUP;

    struct Policy {
        id: ObjectRef,
        targets: Vec<TargetRef>,
    }

    impl Attachable for Policy {
        fn id(&self) -> &ObjectRef {
            &self.id
        }

        fn target_refs(&self) -> &[TargetRef] {
            &self.targets
        }

        fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
            None
        }
    }

    fn policy(ns: &str, name: &str, targets: Vec<TargetRef>) -> Arc<Policy> {
        Arc::new(Policy {
            id: ObjectRef::new("example.io", "Policy", ns, name),
            targets,
        })
    }

    fn gateway_ref(name: &str) -> TargetRef {
        TargetRef::new(GATEWAY_API_GROUP, "Gateway", name)
    }

    fn names(attachments: &[Attachment<Policy>]) -> Vec<&str> {
        attachments
            .iter()
            .map(|a| a.resource.id.name.as_str())
            .collect()
    }

    #[test]
    fn omitted_namespace_stays_local() {
        let index = [policy("apps", "local", vec![gateway_ref("gw")])]
            .into_iter()
            .collect::<AttachmentIndex<_>>();

        let local = index.resolve(&ObjectRef::gateway("apps", "gw"), None);
        assert_eq!(names(&local.without_section), vec!["local"]);

        let other = index.resolve(&ObjectRef::gateway("infra", "gw"), None);
        assert!(other.is_empty());
    }

    #[test]
    fn explicit_namespace_is_honored() {
        let index = [policy(
            "apps",
            "remote",
            vec![gateway_ref("gw").with_namespace("infra")],
        )]
        .into_iter()
        .collect::<AttachmentIndex<_>>();

        assert!(index
            .resolve(&ObjectRef::gateway("apps", "gw"), None)
            .is_empty());
        assert_eq!(
            names(
                &index
                    .resolve(&ObjectRef::gateway("infra", "gw"), None)
                    .without_section
            ),
            vec!["remote"]
        );
    }

    #[test]
    fn sections_only_match_their_own_listener() {
        let index = [
            policy("apps", "http", vec![gateway_ref("gw").with_section("http")]),
            policy("apps", "https", vec![gateway_ref("gw").with_section("https")]),
            policy("apps", "whole", vec![gateway_ref("gw")]),
        ]
        .into_iter()
        .collect::<AttachmentIndex<_>>();
        let gw = ObjectRef::gateway("apps", "gw");

        let http = index.resolve(&gw, Some("http"));
        assert_eq!(names(&http.with_section), vec!["http"]);
        assert_eq!(names(&http.without_section), vec!["whole"]);

        let whole = index.resolve(&gw, None);
        assert!(whole.with_section.is_empty());
        assert_eq!(names(&whole.without_section), vec!["whole"]);
    }

    #[test]
    fn missing_sections_are_inert() {
        let index = [
            policy("apps", "http", vec![gateway_ref("gw").with_section("http")]),
            policy("apps", "gone", vec![gateway_ref("gw").with_section("gone")]),
            policy("apps", "whole", vec![gateway_ref("gw")]),
        ]
        .into_iter()
        .collect::<AttachmentIndex<_>>();
        let gw = ObjectRef::gateway("apps", "gw");
        let listeners = ["http"];
        let has_section = |s: &str| listeners.contains(&s);

        assert_eq!(names(&index.attached_to(&gw, has_section)), vec!["http", "whole"]);
        assert_eq!(names(&index.inert(&gw, has_section)), vec!["gone"]);
    }

    #[test]
    fn duplicate_target_refs_attach_once() {
        let index = [policy(
            "apps",
            "dup",
            vec![gateway_ref("gw"), gateway_ref("gw").with_namespace("apps")],
        )]
        .into_iter()
        .collect::<AttachmentIndex<_>>();
        assert_eq!(index.len(), 1);
        assert_eq!(index.resources().count(), 1);
    }
}
