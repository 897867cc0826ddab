//! Core types shared by the overlay policy controller.
//!
//! This crate has no notion of storage. It defines the role-expression language used by policies
//! to select identities, edge routers, services and posture checks, the semantics used to combine
//! attribute references, and the error and event types surfaced by the index.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
mod event;
pub mod role;
mod semantic;

pub use self::{
    error::{Error, Result},
    event::{ServiceEvent, ServiceEventType},
    role::{RoleExpr, RoleList, ALL_ROLE},
    semantic::{PolicyType, Semantic},
};
