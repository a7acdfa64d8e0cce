//! # Rate Limiting
//!
//! Components consume rate limiting through a narrow accept/reject interface. Bucket
//! algorithms belong to the [`RateLimiter`] implementations registered per group in the
//! [`RateLimitContainer`]; a component references one group plus a discriminator that is
//! unique to that component.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ComponentError, Result};
use crate::models::{ComponentInteraction, ComponentRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateLimitReference {
    pub group: String,
    pub discriminator: String,
}

impl RateLimitReference {
    pub fn new(group: impl Into<String>, discriminator: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            discriminator: discriminator.into(),
        }
    }
}

impl fmt::Display for RateLimitReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.discriminator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Rejected { retry_after: Duration },
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume a token for this interaction, or report how long to wait
    async fn try_acquire(
        &self,
        reference: &RateLimitReference,
        interaction: &ComponentInteraction,
    ) -> RateLimitDecision;
}

/// Registered rate limit groups
#[derive(Default)]
pub struct RateLimitContainer {
    limiters: DashMap<String, Arc<dyn RateLimiter>>,
}

impl RateLimitContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, group: impl Into<String>, limiter: Arc<dyn RateLimiter>) -> Result<()> {
        let group = group.into();
        match self.limiters.entry(group.clone()) {
            Entry::Occupied(_) => {
                Err(ComponentError::DuplicateRateLimitGroup(group))
            }
            Entry::Vacant(slot) => {
                slot.insert(limiter);
                info!(group = %group, "⏱️ Rate limit group registered");
                Ok(())
            }
        }
    }

    pub fn contains(&self, group: &str) -> bool {
        self.limiters.contains_key(group)
    }

    /// Check the component's rate limit; components without one are always allowed
    pub async fn check(
        &self,
        component: &ComponentRecord,
        interaction: &ComponentInteraction,
    ) -> RateLimitDecision {
        let Some(reference) = &component.rate_limit else {
            return RateLimitDecision::Allowed;
        };

        let limiter = self
            .limiters
            .get(&reference.group)
            .map(|entry| Arc::clone(entry.value()));

        match limiter {
            Some(limiter) => limiter.try_acquire(reference, interaction).await,
            None => {
                debug!(
                    component_id = component.internal_id,
                    reference = %reference,
                    "Rate limit group no longer registered, allowing interaction"
                );
                RateLimitDecision::Allowed
            }
        }
    }
}

/// Process-wide set of handed out references, detecting duplicate discriminators
#[derive(Debug, Default)]
pub struct RateLimitReferences {
    references: DashSet<RateLimitReference>,
}

impl RateLimitReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        group: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> Result<RateLimitReference> {
        let reference = RateLimitReference::new(group, discriminator);
        if !self.references.insert(reference.clone()) {
            return Err(ComponentError::DuplicateRateLimitReference {
                group: reference.group,
                discriminator: reference.discriminator,
            });
        }
        Ok(reference)
    }

    pub fn get(&self, group: &str, discriminator: &str) -> Option<RateLimitReference> {
        let reference = RateLimitReference::new(group, discriminator);
        self.references.contains(&reference).then_some(reference)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Reset hook for tests
    pub fn clear(&self) {
        self.references.clear();
    }
}

/// Fixed cooldown per user and reference
#[derive(Debug)]
pub struct CooldownRateLimiter {
    cooldown: Duration,
    last_use: DashMap<(RateLimitReference, u64), tokio::time::Instant>,
}

impl CooldownRateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_use: DashMap::new(),
        }
    }
}

#[async_trait]
impl RateLimiter for CooldownRateLimiter {
    async fn try_acquire(
        &self,
        reference: &RateLimitReference,
        interaction: &ComponentInteraction,
    ) -> RateLimitDecision {
        let now = tokio::time::Instant::now();
        let key = (reference.clone(), interaction.user_id);

        match self.last_use.entry(key) {
            Entry::Occupied(mut slot) => {
                let elapsed = now.duration_since(*slot.get());
                if elapsed < self.cooldown {
                    return RateLimitDecision::Rejected {
                        retry_after: self.cooldown - elapsed,
                    };
                }
                slot.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }
        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_reference_is_rejected() {
        let references = RateLimitReferences::new();
        references.create("votes", "upvote").unwrap();
        references.create("votes", "downvote").unwrap();

        let duplicate = references.create("votes", "upvote");
        assert!(matches!(
            duplicate,
            Err(ComponentError::DuplicateRateLimitReference { .. })
        ));
        assert!(references.get("votes", "upvote").is_some());
        assert!(references.get("votes", "other").is_none());

        references.clear();
        assert!(references.is_empty());
    }

    #[test]
    fn test_duplicate_group_is_rejected() {
        let container = RateLimitContainer::new();
        let limiter = Arc::new(CooldownRateLimiter::new(Duration::from_secs(1)));
        container.register("votes", limiter.clone()).unwrap();
        assert!(container.contains("votes"));
        assert!(matches!(
            container.register("votes", limiter),
            Err(ComponentError::DuplicateRateLimitGroup(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_limiter() {
        let limiter = CooldownRateLimiter::new(Duration::from_secs(10));
        let reference = RateLimitReference::new("votes", "upvote");
        let interaction = ComponentInteraction::button("x", 1);

        assert_eq!(
            limiter.try_acquire(&reference, &interaction).await,
            RateLimitDecision::Allowed
        );
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            limiter.try_acquire(&reference, &interaction).await,
            RateLimitDecision::Rejected {
                retry_after: Duration::from_secs(6)
            }
        );

        let other_user = ComponentInteraction::button("x", 2);
        assert_eq!(
            limiter.try_acquire(&reference, &other_user).await,
            RateLimitDecision::Allowed
        );
    }
}
