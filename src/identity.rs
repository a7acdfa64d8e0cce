//! # Identity Codec
//!
//! Maps internal component ids to the custom identifier string attached to a message
//! component, and back.
//!
//! The custom identifier space is shared with any other code attaching raw identifiers to
//! messages, so ownership is checked with a cheap prefix test before any parsing:
//!
//! ```rust
//! use component_core::identity::ComponentIdCodec;
//!
//! let codec = ComponentIdCodec::new("BotComponents-");
//! let external = codec.encode(42);
//! assert_eq!(external, "BotComponents-42");
//! assert!(codec.is_owned(&external));
//! assert_eq!(codec.decode(&external).unwrap(), 42);
//! assert!(!codec.is_owned("page:next"));
//! ```

use crate::error::{ComponentError, Result};
use crate::models::ComponentId;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ComponentIdCodec {
    prefix: Arc<str>,
}

impl ComponentIdCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Arc::from(prefix.into()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn encode(&self, internal_id: ComponentId) -> String {
        format!("{}{}", self.prefix, internal_id)
    }

    pub fn is_owned(&self, external_id: &str) -> bool {
        external_id.starts_with(&*self.prefix)
    }

    /// Parse the numeric suffix of an owned identifier
    pub fn decode(&self, external_id: &str) -> Result<ComponentId> {
        let suffix = external_id
            .strip_prefix(&*self.prefix)
            .ok_or_else(|| ComponentError::ForeignIdentifier(external_id.to_string()))?;

        // Only the canonical form produced by `encode` is accepted
        if suffix.starts_with(['+', '-']) || (suffix.len() > 1 && suffix.starts_with('0')) {
            return Err(ComponentError::MalformedIdentifier(external_id.to_string()));
        }

        suffix
            .parse::<ComponentId>()
            .map_err(|_| ComponentError::MalformedIdentifier(external_id.to_string()))
    }
}

impl Default for ComponentIdCodec {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_COMPONENT_ID_PREFIX)
    }
}
