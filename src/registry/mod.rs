//! # Handler Registries
//!
//! Where component and timeout handlers live between creation and invocation.
//!
//! ## Available Registries
//!
//! - **EphemeralHandlers**: in-process closures keyed by an opaque token stored on the record
//! - **PersistentHandlerRegistry**: named handlers resolved again after every restart
//!
//! ```text
//! Handler Registries
//! ├── EphemeralComponentHandlers  (closures run on interaction)
//! ├── EphemeralTimeoutHandlers    (closures run on expiry)
//! └── PersistentHandlerRegistry   (name + serialized args)
//! ```
//!
//! Ephemeral entries are removed in the same step as the record that references them, so
//! a registry never outlives its record.

pub mod ephemeral_handlers;
pub mod handler_registry;

pub use ephemeral_handlers::{
    ComponentHandlerFn, EphemeralComponentHandlers, EphemeralHandlers, EphemeralTimeoutHandlers,
    TimeoutHandlerFn,
};
pub use handler_registry::{
    PersistentComponentHandler, PersistentHandlerRegistry, PersistentTimeoutHandler,
    RegistryStats,
};
