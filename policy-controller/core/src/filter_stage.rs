//! Places HTTP filters contributed by plugins into a single, deterministic
//! filter chain.
//!
//! Every filter is positioned relative to one of the well-known stages. Ties
//! are broken by weight, name, config type and config bytes, and finally by
//! the order in which filters were contributed, so that translating the same
//! input always produces the same chain.

use crate::plugin::PluginError;
use std::{cmp::Ordering, fmt};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WellKnownStage {
    Fault,
    Cors,
    Waf,
    AuthN,
    AuthZ,
    RateLimit,
    Accepted,
    OutAuth,
    Route,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilterStage {
    pub relative_to: WellKnownStage,
    pub weight: i32,
}

/// A serialized filter configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypedConfig {
    pub type_url: String,
    pub value: Vec<u8>,
}

/// A filter configuration that may be placed in the chain.
pub trait FilterConfig: serde::Serialize {
    const TYPE_URL: &'static str;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StagedFilter {
    pub name: String,
    pub config: TypedConfig,
    pub stage: FilterStage,
}

// === impl WellKnownStage ===

impl WellKnownStage {
    pub const ALL: [Self; 9] = [
        Self::Fault,
        Self::Cors,
        Self::Waf,
        Self::AuthN,
        Self::AuthZ,
        Self::RateLimit,
        Self::Accepted,
        Self::OutAuth,
        Self::Route,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for WellKnownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fault => "fault",
            Self::Cors => "cors",
            Self::Waf => "waf",
            Self::AuthN => "authn",
            Self::AuthZ => "authz",
            Self::RateLimit => "ratelimit",
            Self::Accepted => "accepted",
            Self::OutAuth => "outauth",
            Self::Route => "route",
        };
        f.write_str(name)
    }
}

// === impl FilterStage ===

impl FilterStage {
    pub const fn before(relative_to: WellKnownStage) -> Self {
        Self::weighted(relative_to, -1)
    }

    pub const fn during(relative_to: WellKnownStage) -> Self {
        Self::weighted(relative_to, 0)
    }

    pub const fn after(relative_to: WellKnownStage) -> Self {
        Self::weighted(relative_to, 1)
    }

    pub const fn weighted(relative_to: WellKnownStage, weight: i32) -> Self {
        Self {
            relative_to,
            weight,
        }
    }
}

impl PartialOrd for FilterStage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilterStage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.relative_to
            .cmp(&other.relative_to)
            .then_with(|| self.weight.cmp(&other.weight))
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.weight {
            -1 => write!(f, "before({})", self.relative_to),
            0 => write!(f, "during({})", self.relative_to),
            1 => write!(f, "after({})", self.relative_to),
            w => write!(f, "{}{w:+}", self.relative_to),
        }
    }
}

// === impl TypedConfig ===

impl TypedConfig {
    /// Serializes a filter configuration.
    ///
    /// A configuration that cannot be serialized indicates a broken plugin
    /// and is reported as an invariant violation.
    pub fn encode<C: FilterConfig>(config: &C) -> Result<Self, PluginError> {
        let value = serde_json::to_vec(config).map_err(|error| {
            PluginError::Invariant(format!("failed to encode {}: {error}", C::TYPE_URL))
        })?;
        Ok(Self {
            type_url: C::TYPE_URL.to_string(),
            value,
        })
    }
}

// === impl StagedFilter ===

impl StagedFilter {
    pub fn new<C: FilterConfig>(
        name: impl Into<String>,
        config: &C,
        stage: FilterStage,
    ) -> Result<Self, PluginError> {
        Ok(Self {
            name: name.into(),
            config: TypedConfig::encode(config)?,
            stage,
        })
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        self.stage
            .cmp(&other.stage)
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.config.type_url.cmp(&other.config.type_url))
            .then_with(|| self.config.value.cmp(&other.config.value))
    }
}

/// Sorts filters into their final chain order.
pub fn sort(filters: Vec<StagedFilter>) -> Vec<StagedFilter> {
    sort_by_filter(filters, |f| f)
}

/// Sorts items that carry a staged filter, falling back to the original
/// position of each item.
pub fn sort_by_filter<T>(items: Vec<T>, filter: impl Fn(&T) -> &StagedFilter) -> Vec<T> {
    let mut indexed = items.into_iter().enumerate().collect::<Vec<_>>();
    indexed.sort_by(|(ai, a), (bi, b)| {
        filter(a)
            .key_cmp(filter(b))
            .then_with(|| ai.cmp(bi))
    });
    indexed.into_iter().map(|(_, item)| item).collect()
}

/// Sorts filters and drops exact duplicates, keeping the first contribution.
///
/// Filters that share a name but differ in configuration are all kept.
pub fn sort_dedup(filters: Vec<StagedFilter>) -> Vec<StagedFilter> {
    let mut sorted = sort(filters);
    sorted.dedup();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[derive(serde::Serialize)]
    struct Named(&'static str);

    impl FilterConfig for Named {
        const TYPE_URL: &'static str = "type.example.io/Named";
    }

    #[derive(serde::Serialize)]
    struct Other(&'static str);

    impl FilterConfig for Other {
        const TYPE_URL: &'static str = "type.example.io/Other";
    }

    fn filter(name: &str, value: &'static str, stage: FilterStage) -> StagedFilter {
        StagedFilter::new(name, &Named(value), stage).expect("config must encode")
    }

    fn names(filters: &[StagedFilter]) -> Vec<&str> {
        filters.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn stage_ordinals() {
        let ordinals = WellKnownStage::ALL.map(WellKnownStage::ordinal);
        assert_eq!(ordinals, [0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(WellKnownStage::Fault < WellKnownStage::Route);
    }

    #[rstest]
    #[case(FilterStage::before(WellKnownStage::AuthZ), FilterStage::during(WellKnownStage::AuthZ))]
    #[case(FilterStage::during(WellKnownStage::AuthZ), FilterStage::after(WellKnownStage::AuthZ))]
    #[case(FilterStage::after(WellKnownStage::AuthN), FilterStage::before(WellKnownStage::AuthZ))]
    #[case(
        FilterStage::weighted(WellKnownStage::Fault, 100),
        FilterStage::weighted(WellKnownStage::Cors, -100)
    )]
    fn stage_precedes(#[case] earlier: FilterStage, #[case] later: FilterStage) {
        assert!(earlier < later, "{earlier} must precede {later}");
    }

    #[test]
    fn orders_by_stage_weight_and_name() {
        let filters = vec![
            filter("router", "", FilterStage::after(WellKnownStage::Route)),
            filter("ratelimit", "", FilterStage::during(WellKnownStage::RateLimit)),
            filter("b-cors", "", FilterStage::during(WellKnownStage::Cors)),
            filter("a-cors", "", FilterStage::during(WellKnownStage::Cors)),
            filter("fault", "", FilterStage::during(WellKnownStage::Fault)),
            filter("pre-cors", "", FilterStage::before(WellKnownStage::Cors)),
        ];
        assert_eq!(
            names(&sort(filters)),
            vec!["fault", "pre-cors", "a-cors", "b-cors", "ratelimit", "router"]
        );
    }

    #[test]
    fn config_breaks_name_ties() {
        let stage = FilterStage::during(WellKnownStage::Waf);
        let filters = vec![
            StagedFilter::new("waf", &Other("a"), stage).unwrap(),
            filter("waf", "b", stage),
            filter("waf", "a", stage),
        ];
        let sorted = sort(filters);
        assert_eq!(sorted[0].config, TypedConfig::encode(&Named("a")).unwrap());
        assert_eq!(sorted[1].config, TypedConfig::encode(&Named("b")).unwrap());
        assert_eq!(sorted[2].config.type_url, Other::TYPE_URL);
    }

    #[test]
    fn sort_is_idempotent_and_order_independent() {
        let filters = vec![
            filter("x", "1", FilterStage::during(WellKnownStage::AuthN)),
            filter("y", "", FilterStage::weighted(WellKnownStage::AuthN, 5)),
            filter("x", "0", FilterStage::during(WellKnownStage::AuthN)),
            filter("z", "", FilterStage::before(WellKnownStage::Fault)),
        ];
        let expected = sort(filters.clone());
        assert_eq!(sort(expected.clone()), expected);

        let mut reversed = filters.clone();
        reversed.reverse();
        assert_eq!(sort(reversed), expected);

        let mut rotated = filters;
        rotated.rotate_left(2);
        assert_eq!(sort(rotated), expected);
    }

    #[test]
    fn identical_filters_keep_insertion_order() {
        let stage = FilterStage::during(WellKnownStage::Accepted);
        let tagged = ["first", "second", "third"]
            .into_iter()
            .map(|tag| (filter("same", "cfg", stage), tag))
            .collect::<Vec<_>>();

        let sorted = sort_by_filter(tagged, |(f, _)| f);
        let tags = sorted.iter().map(|(_, tag)| *tag).collect::<Vec<_>>();
        assert_eq!(tags, vec!["first", "second", "third"]);
    }

    #[test]
    fn dedup_drops_exact_duplicates() {
        let stage = FilterStage::during(WellKnownStage::Cors);
        let filters = vec![
            filter("cors", "", stage),
            filter("cors", "", stage),
            filter("cors", "other", stage),
        ];
        assert_eq!(sort_dedup(filters).len(), 2);
    }

    #[test]
    fn unserializable_config_is_an_invariant_violation() {
        #[derive(serde::Serialize)]
        struct BadKeys(std::collections::HashMap<(u8, u8), u8>);

        impl FilterConfig for BadKeys {
            const TYPE_URL: &'static str = "type.example.io/BadKeys";
        }

        let config = BadKeys([((1, 2), 3)].into_iter().collect());
        let error = StagedFilter::new(
            "bad",
            &config,
            FilterStage::during(WellKnownStage::Route),
        )
        .expect_err("tuple keys cannot be encoded as JSON");
        assert!(matches!(error, PluginError::Invariant(_)));
    }
}
