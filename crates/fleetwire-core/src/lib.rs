//! FleetWire core building blocks.
//!
//! This crate holds the pieces every other FleetWire crate builds on:
//!
//! - **lifecycle**: the supervisable component tree (start, pause, stop,
//!   error capture, nested components, typed lookups)
//! - **error**: structured error codes and levels surfaced to callers
//! - **config**: default constants and environment variable names

pub mod config;
pub mod error;
pub mod lifecycle;

pub use error::{Coded, ErrorCode, ErrorLevel};
pub use lifecycle::{
    find_components_of_type, ChildStartPolicy, ComponentType, DynLifecycle, Lifecycle,
    LifecycleComponent, LifecycleError, LifecycleExt, LifecycleStatus, StatusTransition,
    Supervisor,
};
