#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use gateway_policy_controller_core as core;
pub use gateway_policy_controller_k8s_api as k8s;
pub use gateway_policy_controller_k8s_index as index;
pub use gateway_policy_controller_k8s_status as status;
pub use gateway_policy_controller_plugins as plugins;

mod args;
mod index_list;
mod lease;
mod translation;

pub use self::{
    args::Args,
    translation::{Config, TranslationMetrics, Translator},
};
