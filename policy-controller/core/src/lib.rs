#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod attachment;
pub mod filter_stage;
pub mod gateway;
pub mod ir;
pub mod plugin;
pub mod report;
pub mod specificity;
pub mod target_ref;
pub mod translator;

pub use self::{
    attachment::{Attachable, Attachment, AttachmentIndex},
    filter_stage::{FilterConfig, FilterStage, StagedFilter, TypedConfig, WellKnownStage},
    plugin::{Plugin, PluginError, Registry},
    report::{Condition, ConditionStatus, ReportMap, Reporter, ScopeKey},
    specificity::CandidateSet,
    target_ref::{AttachmentKey, ObjectRef, TargetRef},
    translator::{translate, TranslateError, Translation},
};

/// The controller name written into route parent statuses.
pub const CONTROLLER_NAME: &str = "policy.gateway.io/controller";
