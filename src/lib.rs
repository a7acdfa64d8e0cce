#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Component Core Rust
//!
//! Lifecycle, timeout and continuation engine for interactive bot message components.
//!
//! ## Overview
//!
//! Buttons and select menus attached to bot messages carry a custom identifier. This crate
//! gives each one a server-side record: who may use it, how many times, until when, and
//! what runs when it is used or when it expires. The transport delivers interactions; the
//! engine decides whether they are allowed, resumes anyone awaiting them, applies the
//! single-use or timeout-reset lifecycle, and runs the bound handler.
//!
//! ## Key Features
//!
//! - **Two lifetimes**: ephemeral components bind in-process closures, persistent components
//!   bind registered handler names and survive restarts
//! - **Groups**: components sharing one timeout and single-use lifecycle
//! - **Lazy expiry**: expired records are never dispatched, even before their timer fires
//! - **Continuations**: `await_component` suspends a task until the component is used
//! - **Startup reconciliation**: ephemeral records are purged and persisted timeouts re-armed
//!
//! ## Module Organization
//!
//! - [`identity`] - external identifier encoding
//! - [`models`] - component, group, constraint and interaction types
//! - [`store`] - durable component records (in-memory and Postgres)
//! - [`registry`] - ephemeral closures and persistent named handlers
//! - [`lifecycle`] - controller, timeouts, continuations and the dispatch listener
//! - [`filters`] - interaction filters and the rejection handler
//! - [`ratelimit`] - rate limit groups and per-component references
//! - [`config`] - YAML configuration with environment overrides
//! - [`system`] - bootstrap wiring everything together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use component_core::lifecycle::{ComponentBuilder, InteractionResponder};
//! use component_core::models::ComponentInteraction;
//! use component_core::system::ComponentSystemBuilder;
//! use component_core::config::ComponentsConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Replies;
//!
//! #[async_trait::async_trait]
//! impl InteractionResponder for Replies {
//!     async fn reply_ephemeral(&self, _: &ComponentInteraction, content: &str) -> anyhow::Result<()> {
//!         println!("{content}");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! component_core::logging::init_structured_logging();
//!
//! let system = ComponentSystemBuilder::new(ComponentsConfig::default())
//!     .with_responder(Arc::new(Replies))
//!     .build()
//!     .await?;
//!
//! let button = system
//!     .controller()
//!     .create_component(ComponentBuilder::ephemeral().single_use(true).timeout(Duration::from_secs(60)))
//!     .await?;
//!
//! // Attach `button.component_id` to a message, then wait for a click
//! let interaction = system
//!     .controller()
//!     .await_component(&button, Duration::from_secs(60))
//!     .await?;
//! println!("clicked by {}", interaction.user_id);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod filters;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod ratelimit;
pub mod registry;
pub mod store;
pub mod system;

pub use config::{ComponentsConfig, ConfigManager, ConfigurationError};
pub use error::{ComponentError, Result};
pub use identity::ComponentIdCodec;
pub use lifecycle::{
    ComponentBuilder, ComponentController, ComponentsListener, ContinuationError,
    DispatchOutcome, GroupBuilder,
};
pub use models::{Component, ComponentGroup, ComponentId, ComponentInteraction};
pub use system::{ComponentSystem, ComponentSystemBuilder};
