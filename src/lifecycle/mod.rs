//! # Component Lifecycle
//!
//! Everything that happens to a component between creation and deletion.
//!
//! ## Architecture
//!
//! ```text
//! ComponentsListener ──► ComponentController ──► ComponentStore
//!        │                  │         │
//!        │                  │         └──► ComponentTimeoutManager ──► timers
//!        │                  └──► ContinuationManager ◄── await_component
//!        └──► HandlerExecutor ──► handler registries
//! ```
//!
//! - **ComponentController**: create, look up, reset, delete; owns the timeout manager
//! - **ComponentTimeoutManager**: arms, cancels and fires component and group timeouts
//! - **ContinuationManager**: suspends callers until a component is used
//! - **ComponentsListener**: the per-interaction dispatch state machine

pub mod builder;
pub mod continuation_manager;
pub mod controller;
pub mod handler_executor;
pub mod listener;
pub mod reporting;
pub mod timeout_manager;

pub use builder::{ComponentBuilder, GroupBuilder, TimeoutSetting};
pub use continuation_manager::{ContinuationError, ContinuationManager, ContinuationResult};
pub use controller::{ComponentController, UseClaim};
pub use handler_executor::{HandlerExecutor, ResolvedHandler};
pub use listener::{ComponentsListener, DispatchOutcome, InteractionResponder, RejectionKind};
pub use reporting::{ExceptionReporter, TracingExceptionReporter};
pub use timeout_manager::{ComponentTimeoutManager, TimeoutDependencies};
