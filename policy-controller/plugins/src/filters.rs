//! Listener filters required by option policies, and their per-route configs.

use crate::policy::{CorsPolicy, FaultInjection};
use gateway_policy_controller_core::{
    FilterConfig, FilterStage, PluginError, StagedFilter, WellKnownStage,
};

pub const FAULT_FILTER_NAME: &str = "envoy.filters.http.fault";
pub const CORS_FILTER_NAME: &str = "envoy.filters.http.cors";

const FAULT_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.fault.v3.HTTPFault";

/// The listener-level fault filter. Faults are configured per route.
#[derive(Debug, Default, serde::Serialize)]
pub struct HttpFault {}

/// The listener-level CORS filter. Policies are configured per route or per
/// virtual host.
#[derive(Debug, Default, serde::Serialize)]
pub struct Cors {}

impl FilterConfig for HttpFault {
    const TYPE_URL: &'static str = FAULT_TYPE_URL;
}

impl FilterConfig for FaultInjection {
    const TYPE_URL: &'static str = FAULT_TYPE_URL;
}

impl FilterConfig for Cors {
    const TYPE_URL: &'static str = "type.googleapis.com/envoy.extensions.filters.http.cors.v3.Cors";
}

impl FilterConfig for CorsPolicy {
    const TYPE_URL: &'static str =
        "type.googleapis.com/envoy.extensions.filters.http.cors.v3.CorsPolicy";
}

pub fn fault() -> Result<StagedFilter, PluginError> {
    StagedFilter::new(
        FAULT_FILTER_NAME,
        &HttpFault::default(),
        FilterStage::during(WellKnownStage::Fault),
    )
}

pub fn cors() -> Result<StagedFilter, PluginError> {
    StagedFilter::new(
        CORS_FILTER_NAME,
        &Cors::default(),
        FilterStage::during(WellKnownStage::Cors),
    )
}
