#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod conditions;
mod index;


pub use self::index::{Controller, ControllerMetrics, Index, IndexMetrics, SharedIndex, Update};
