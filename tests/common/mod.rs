#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rulescope::error::EvidenceError;
use rulescope::sources::{
    HistoryArchive, MemoryDecisionStore, MemorySnapshot, OpenDirectory, ResourceDirectory,
};
use rulescope::{KnowledgeBase, RuleDocument};

/// Parse a YAML string holding exactly one rule.
pub fn rule(yaml: &str) -> RuleDocument {
    let mut parsed = rulescope::parse(yaml).expect("parse should succeed");
    assert_eq!(parsed.rules.len(), 1, "expected one rule");
    parsed.rules.remove(0)
}

/// Parse a YAML string holding any number of rules.
pub fn rules(yaml: &str) -> Vec<RuleDocument> {
    rulescope::parse(yaml).expect("parse should succeed").rules
}

/// A snapshot holding `(id, state)` pairs with no attributes.
pub fn snapshot(entries: &[(&str, &str)]) -> MemorySnapshot {
    let mut snap = MemorySnapshot::new();
    for (id, state) in entries {
        snap.insert(*id, *state, Map::new());
    }
    snap
}

/// Attributes map from a JSON object literal.
pub fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// A knowledge base over `entries` with an open directory.
pub fn kb(entries: &[(&str, &str)]) -> KnowledgeBase {
    KnowledgeBase::new(Arc::new(snapshot(entries)), Arc::new(OpenDirectory))
}

pub fn kb_with(snapshot: MemorySnapshot, directory: FakeDirectory) -> KnowledgeBase {
    KnowledgeBase::new(Arc::new(snapshot), Arc::new(directory))
}

pub fn store() -> Arc<MemoryDecisionStore> {
    Arc::new(MemoryDecisionStore::new())
}

// ─── Directory ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeDirectory {
    pub devices: BTreeSet<String>,
    pub areas: BTreeSet<String>,
    pub zones: BTreeSet<String>,
    /// `None` means every service exists.
    pub services: Option<BTreeSet<String>>,
    pub capabilities: HashMap<String, Map<String, Value>>,
    pub zone_names: Vec<String>,
    /// Every lookup fails.
    pub broken: bool,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, id: &str) -> Self {
        self.devices.insert(id.to_string());
        self
    }

    pub fn area(mut self, id: &str) -> Self {
        self.areas.insert(id.to_string());
        self
    }

    pub fn zone(mut self, id: &str) -> Self {
        self.zones.insert(id.to_string());
        self
    }

    pub fn service(mut self, name: &str) -> Self {
        self.services
            .get_or_insert_with(BTreeSet::new)
            .insert(name.to_string());
        self
    }

    pub fn capability(mut self, target: &str, caps: Value) -> Self {
        self.capabilities.insert(target.to_string(), attrs(caps));
        self
    }

    pub fn zone_name(mut self, name: &str) -> Self {
        self.zone_names.push(name.to_string());
        self
    }

    pub fn broken() -> Self {
        FakeDirectory {
            broken: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), EvidenceError> {
        if self.broken {
            Err(EvidenceError::Unavailable("directory offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ResourceDirectory for FakeDirectory {
    fn device_exists(&self, device_id: &str) -> Result<bool, EvidenceError> {
        self.check()?;
        Ok(self.devices.contains(device_id))
    }

    fn area_exists(&self, area_id: &str) -> Result<bool, EvidenceError> {
        self.check()?;
        Ok(self.areas.contains(area_id))
    }

    fn zone_exists(&self, zone_id: &str) -> Result<bool, EvidenceError> {
        self.check()?;
        Ok(self.zones.contains(zone_id))
    }

    fn service_exists(&self, service: &str) -> Result<bool, EvidenceError> {
        self.check()?;
        Ok(self.services.as_ref().is_none_or(|s| s.contains(service)))
    }

    fn capabilities(&self, target: &str) -> Result<Option<Map<String, Value>>, EvidenceError> {
        self.check()?;
        Ok(self.capabilities.get(target).cloned())
    }

    fn zone_names(&self) -> Result<Vec<String>, EvidenceError> {
        self.check()?;
        Ok(self.zone_names.clone())
    }
}

// ─── History archive ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeArchive {
    /// Observed values per target, each with how many days ago it was seen.
    pub observed: HashMap<String, BTreeMap<String, u32>>,
    pub ever: BTreeSet<String>,
    /// Sleep this long before answering.
    pub delay: Option<Duration>,
    pub broken: bool,
}

impl FakeArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `target` was seen in each of `values` today.
    pub fn seen(self, target: &str, values: &[&str]) -> Self {
        self.seen_days_ago(target, values, 0)
    }

    pub fn seen_days_ago(mut self, target: &str, values: &[&str], age: u32) -> Self {
        self.ever.insert(target.to_string());
        self.observed
            .entry(target.to_string())
            .or_default()
            .extend(values.iter().map(|v| (v.to_string(), age)));
        self
    }

    /// Record that `target` existed at some point, without values.
    pub fn existed(mut self, target: &str) -> Self {
        self.ever.insert(target.to_string());
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn broken() -> Self {
        FakeArchive {
            broken: true,
            ..Self::default()
        }
    }

    async fn wait(&self) -> Result<(), EvidenceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken {
            return Err(EvidenceError::Unavailable("archive offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryArchive for FakeArchive {
    async fn all_observed_values(
        &self,
        target: &str,
        days: u32,
    ) -> Result<BTreeSet<String>, EvidenceError> {
        self.wait().await?;
        Ok(self
            .observed
            .get(target)
            .into_iter()
            .flatten()
            .filter(|(_, age)| **age <= days)
            .map(|(value, _)| value.clone())
            .collect())
    }

    async fn all_target_ids_ever_observed(&self) -> Result<BTreeSet<String>, EvidenceError> {
        self.wait().await?;
        Ok(self.ever.clone())
    }
}

/// A climate entity exposing its hvac and preset lists.
pub fn thermostat_attrs() -> Map<String, Value> {
    attrs(json!({
        "hvac_modes": ["off", "heat", "cool"],
        "preset_modes": ["eco", "comfort", "away"],
        "preset_mode": "eco",
        "current_temperature": 20.5
    }))
}
