//! # Component Data Model
//!
//! Records persisted by the component store and the values flowing through dispatch.
//!
//! - [`component`] - component records, lifetimes and handler descriptors
//! - [`group`] - groups sharing one timeout and single-use lifecycle
//! - [`constraints`] - user/role/permission predicates
//! - [`interaction`] - the interaction event delivered by the transport
//! - [`timeout`] - timeout owners and pending timeouts

pub mod component;
pub mod constraints;
pub mod group;
pub mod interaction;
pub mod timeout;

/// Internal id shared by components and groups; one id names exactly one owner
pub type ComponentId = i64;

pub use component::{
    Component, ComponentLifetime, ComponentRecord, DeletedEntry, EphemeralHandlerKey,
    HandlerDescriptor,
};
pub use constraints::{InteractionConstraints, Permissions};
pub use group::{ComponentGroup, GroupRecord};
pub use interaction::{ComponentInteraction, ComponentKind};
pub use timeout::{OwnerKind, PendingTimeout, TimeoutOwner};
