#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use overlay_policy_core as core;
pub use overlay_policy_index as index;
pub use overlay_policy_store as store;

mod admin;
mod args;
pub mod dispatch;
pub mod eventual;
mod metrics;
pub mod seed;

pub use self::{
    args::{Args, LogFormat},
    dispatch::{DispatchMetrics, EventSinks},
    eventual::{EventualConfig, EventualEventer, EventualListener, EventualMetrics, Trigger},
    seed::Seed,
};
