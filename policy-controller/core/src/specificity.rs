//! Orders competing attachments to a single target.
//!
//! Attachments scoped to the requested section come first. Within each group
//! older resources precede newer ones, resources without a creation timestamp
//! come last, and remaining ties are broken by name and then namespace.

use crate::attachment::{Attachable, Attachment};
use std::cmp::Ordering;

/// The attachments to one target, partitioned by whether they name the
/// requested section.
pub struct CandidateSet<P> {
    pub with_section: Vec<Attachment<P>>,
    pub without_section: Vec<Attachment<P>>,
}

// === impl CandidateSet ===

impl<P> Default for CandidateSet<P> {
    fn default() -> Self {
        Self {
            with_section: Vec::new(),
            without_section: Vec::new(),
        }
    }
}

impl<P: Attachable> std::fmt::Debug for CandidateSet<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateSet")
            .field("with_section", &self.with_section)
            .field("without_section", &self.without_section)
            .finish()
    }
}

impl<P: Attachable> CandidateSet<P> {
    pub fn is_empty(&self) -> bool {
        self.with_section.is_empty() && self.without_section.is_empty()
    }

    /// Returns all candidates, highest precedence first.
    pub fn ordered(self) -> Vec<Attachment<P>> {
        let Self {
            mut with_section,
            mut without_section,
        } = self;
        with_section.sort_by(by_precedence);
        without_section.sort_by(by_precedence);
        with_section.extend(without_section);
        with_section
    }

    /// Returns the single candidate that applies, if any.
    pub fn first(self) -> Option<Attachment<P>> {
        self.ordered().into_iter().next()
    }
}

pub fn by_precedence<P: Attachable>(a: &Attachment<P>, b: &Attachment<P>) -> Ordering {
    timestamp_then_name(a.resource.as_ref(), b.resource.as_ref())
}

pub fn timestamp_then_name<P: Attachable>(a: &P, b: &P) -> Ordering {
    let by_ts = match (a.creation_timestamp(), b.creation_timestamp()) {
        (Some(a_ts), Some(b_ts)) => a_ts.cmp(&b_ts),
        (None, None) => Ordering::Equal,
        // Resources with timestamps are preferred over resources without.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
    };

    by_ts
        .then_with(|| a.id().name.cmp(&b.id().name))
        .then_with(|| a.id().namespace.cmp(&b.id().namespace))
}
