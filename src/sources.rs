//! Interfaces to the host platform.
//!
//! The analyzer never owns rule storage, live state, directories, the history
//! archive, or persisted operator decisions; it talks to them through these
//! traits. All implementations must be `Send + Sync` so one knowledge base can
//! serve concurrent validation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::error::{EvidenceError, SourceError, StoreError};
use crate::types::{IssueKey, RuleDocument};

/// The host's live-state store.
pub trait StateSnapshot: Send + Sync {
    fn exists(&self, target: &str) -> bool;

    fn current_state(&self, target: &str) -> Option<String>;

    /// Current attributes. List-valued attributes are kept as JSON arrays.
    fn attributes(&self, target: &str) -> Option<Map<String, Value>>;

    /// Every identifier currently present.
    fn all_target_ids(&self) -> Vec<String>;
}

/// In-process [`StateSnapshot`], for hosts that push state in and for tests.
#[derive(Clone, Debug, Default)]
pub struct MemorySnapshot {
    entries: HashMap<String, (String, Map<String, Value>)>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace `target` with a current state and attributes.
    pub fn insert(
        &mut self,
        target: impl Into<String>,
        state: impl Into<String>,
        attributes: Map<String, Value>,
    ) {
        self.entries.insert(target.into(), (state.into(), attributes));
    }

    /// Builder form of [`insert`](Self::insert) with no attributes.
    pub fn with(mut self, target: impl Into<String>, state: impl Into<String>) -> Self {
        self.insert(target, state, Map::new());
        self
    }
}

impl StateSnapshot for MemorySnapshot {
    fn exists(&self, target: &str) -> bool {
        self.entries.contains_key(target)
    }

    fn current_state(&self, target: &str) -> Option<String> {
        self.entries.get(target).map(|(state, _)| state.clone())
    }

    fn attributes(&self, target: &str) -> Option<Map<String, Value>> {
        self.entries.get(target).map(|(_, attrs)| attrs.clone())
    }

    fn all_target_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Device, area, zone and service directories.
pub trait ResourceDirectory: Send + Sync {
    fn device_exists(&self, device_id: &str) -> Result<bool, EvidenceError>;

    fn area_exists(&self, area_id: &str) -> Result<bool, EvidenceError>;

    fn zone_exists(&self, zone_id: &str) -> Result<bool, EvidenceError>;

    /// Unknown services are assumed to exist unless the directory says otherwise.
    fn service_exists(&self, _service: &str) -> Result<bool, EvidenceError> {
        Ok(true)
    }

    /// Capability declarations registered for a resource, e.g. `{"options": [...]}`.
    fn capabilities(&self, _target: &str) -> Result<Option<Map<String, Value>>, EvidenceError> {
        Ok(None)
    }

    /// Friendly names of all zones; valid location states for people and trackers.
    fn zone_names(&self) -> Result<Vec<String>, EvidenceError> {
        Ok(Vec::new())
    }
}

/// A directory that knows nothing and therefore never reports a miss.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenDirectory;

impl ResourceDirectory for OpenDirectory {
    fn device_exists(&self, _device_id: &str) -> Result<bool, EvidenceError> {
        Ok(true)
    }

    fn area_exists(&self, _area_id: &str) -> Result<bool, EvidenceError> {
        Ok(true)
    }

    fn zone_exists(&self, _zone_id: &str) -> Result<bool, EvidenceError> {
        Ok(true)
    }
}

/// The time-series archive of past states. Calls may be slow.
#[async_trait]
pub trait HistoryArchive: Send + Sync {
    /// Values `target` held within the last `days` days.
    async fn all_observed_values(
        &self,
        target: &str,
        days: u32,
    ) -> Result<BTreeSet<String>, EvidenceError>;

    async fn all_target_ids_ever_observed(&self) -> Result<BTreeSet<String>, EvidenceError>;
}

/// Where rule documents come from.
pub trait RuleSource: Send + Sync {
    fn rules(&self) -> Result<Vec<RuleDocument>, SourceError>;
}

/// An operator's persisted decision about one issue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub dismissed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learned_value: Option<String>,
}

/// Persisted dismissals and learned values, keyed by issue identity.
pub trait DecisionStore: Send + Sync {
    fn get(&self, key: &IssueKey) -> Result<Option<Decision>, StoreError>;

    fn put(&self, key: IssueKey, decision: Decision) -> Result<(), StoreError>;

    fn entries(&self) -> Result<Vec<(IssueKey, Decision)>, StoreError>;

    /// Learned state values confirmed for `target`.
    fn learned_values(&self, target: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|(k, _)| k.target == target)
            .filter_map(|(_, d)| d.learned_value)
            .collect())
    }
}

/// In-process [`DecisionStore`].
#[derive(Debug, Default)]
pub struct MemoryDecisionStore {
    entries: RwLock<HashMap<IssueKey, Decision>>,
}

impl MemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecisionStore for MemoryDecisionStore {
    fn get(&self, key: &IssueKey) -> Result<Option<Decision>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: IssueKey, decision: Decision) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        entries.insert(key, decision);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<(IssueKey, Decision)>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut out: Vec<_> = entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
