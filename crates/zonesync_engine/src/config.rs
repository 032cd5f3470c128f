//! Configuration for sync passes.

use crate::error::{SyncError, SyncResult};
use zonesync_protocol::{ConflictPolicy, ZoneId};

/// Default number of records per push call.
pub const DEFAULT_PUSH_BATCH_SIZE: usize = 400;

/// Configuration for sync passes against one remote zone.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote zone to reconcile with.
    pub zone: ZoneId,
    /// Entity types to track; `None` tracks every type in the local catalog.
    pub entities: Option<Vec<String>>,
    /// How push conflicts are resolved.
    pub conflict_policy: ConflictPolicy,
    /// Maximum records (upserts plus deletes) per push call.
    pub push_batch_size: usize,
    /// Upper bound on pull pages in one pass; `None` is unbounded.
    pub max_pull_pages: Option<u32>,
}

impl SyncConfig {
    /// Creates a configuration for `zone` with server-wins conflict resolution.
    pub fn new(zone: impl Into<ZoneId>) -> Self {
        Self {
            zone: zone.into(),
            entities: None,
            conflict_policy: ConflictPolicy::default(),
            push_batch_size: DEFAULT_PUSH_BATCH_SIZE,
            max_pull_pages: None,
        }
    }

    /// Restricts tracking to the given entity types.
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = Some(entities.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: usize) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Caps the number of pull pages per pass.
    pub fn with_max_pull_pages(mut self, pages: u32) -> Self {
        self.max_pull_pages = Some(pages);
        self
    }

    /// Checks the configuration for values no pass could run with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] for an empty zone, a zero push
    /// batch size, a zero page cap or an empty entity list.
    pub fn validate(&self) -> SyncResult<()> {
        if self.zone.is_empty() {
            return Err(SyncError::InvalidConfig("zone name is empty".into()));
        }
        if self.push_batch_size == 0 {
            return Err(SyncError::InvalidConfig("push batch size is zero".into()));
        }
        if self.max_pull_pages == Some(0) {
            return Err(SyncError::InvalidConfig("max pull pages is zero".into()));
        }
        if matches!(&self.entities, Some(entities) if entities.is_empty()) {
            return Err(SyncError::InvalidConfig("no entity types tracked".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("todos")
            .with_entities(["List", "Task"])
            .with_conflict_policy(ConflictPolicy::ClientWins)
            .with_push_batch_size(25)
            .with_max_pull_pages(10);

        assert_eq!(config.zone.as_str(), "todos");
        assert_eq!(
            config.entities,
            Some(vec!["List".to_string(), "Task".to_string()])
        );
        assert_eq!(config.conflict_policy, ConflictPolicy::ClientWins);
        assert_eq!(config.push_batch_size, 25);
        assert_eq!(config.max_pull_pages, Some(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::new("todos");
        assert_eq!(config.conflict_policy, ConflictPolicy::ServerWins);
        assert_eq!(config.push_batch_size, DEFAULT_PUSH_BATCH_SIZE);
        assert!(config.entities.is_none());
        assert!(config.max_pull_pages.is_none());
    }

    #[test]
    fn validate_rejects_unusable_values() {
        assert!(SyncConfig::new("").validate().is_err());
        assert!(SyncConfig::new("z").with_push_batch_size(0).validate().is_err());
        assert!(SyncConfig::new("z").with_max_pull_pages(0).validate().is_err());
        let empty: [&str; 0] = [];
        assert!(SyncConfig::new("z").with_entities(empty).validate().is_err());
    }
}
