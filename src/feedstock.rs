use std::collections::BTreeMap;

use crate::errors::{CiError, CiResult};

/// Looks up which supplier owns a feedstock batch.
pub trait FeedstockDirectory: Send + Sync {
    /// `Ok(None)` when the feedstock is unknown.
    fn supplier_of(&self, feedstock_id: &str, requested_by: &str) -> CiResult<Option<String>>;

    /// Resolve the owner, failing with NotFound for unknown feedstock.
    fn require_owner(&self, feedstock_id: &str, requested_by: &str) -> CiResult<String> {
        self.supplier_of(feedstock_id, requested_by)?
            .ok_or_else(|| CiError::not_found("feedstock", feedstock_id))
    }
}

/// Feedstock registry loaded from configuration.
pub struct StaticFeedstockDirectory {
    owners: BTreeMap<String, String>,
}

impl StaticFeedstockDirectory {
    pub fn new(owners: BTreeMap<String, String>) -> Self {
        Self { owners }
    }

    pub fn with_entry(mut self, feedstock_id: &str, supplier_id: &str) -> Self {
        self.owners
            .insert(feedstock_id.to_string(), supplier_id.to_string());
        self
    }
}

impl FeedstockDirectory for StaticFeedstockDirectory {
    fn supplier_of(&self, feedstock_id: &str, _requested_by: &str) -> CiResult<Option<String>> {
        Ok(self.owners.get(feedstock_id).cloned())
    }
}

/// Used when no registry is configured: every feedstock belongs to whoever asks.
pub struct OpenFeedstockDirectory;

impl FeedstockDirectory for OpenFeedstockDirectory {
    fn supplier_of(&self, _feedstock_id: &str, requested_by: &str) -> CiResult<Option<String>> {
        Ok(Some(requested_by.to_string()))
    }
}
