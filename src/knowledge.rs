//! The valid-value oracle.
//!
//! A [`KnowledgeBase`] answers "which states can this resource be in?" by
//! merging five evidence layers in a fixed order, each one only adding:
//!
//! 1. built-in domain defaults ([`crate::domains`]),
//! 2. capability declarations from the [`ResourceDirectory`],
//! 3. list-valued attributes (and the current state) on the live snapshot,
//! 4. values an operator confirmed through the [`DecisionStore`],
//! 5. values observed in the history archive.
//!
//! A layer that errors or returns malformed data counts as absent. Results
//! are cached per target; invalidation marks entries stale and the next
//! access re-merges *into* the stale entry, so a set once returned never
//! shrinks for the lifetime of the knowledge base.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::domains::{self, UNIVERSAL_STATES};
use crate::history::{self, HistoryLoad, HistorySnapshot};
use crate::sources::{DecisionStore, HistoryArchive, ResourceDirectory, StateSnapshot};
use crate::types::scalar_string;

/// The evidence layers, in merge order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EvidenceLayer {
    DomainDefaults,
    Capabilities,
    LiveSchema,
    Learned,
    History,
}

impl EvidenceLayer {
    /// Layers that describe what a resource *can* do rather than what it
    /// happened to do.
    pub fn is_authoritative(self) -> bool {
        matches!(
            self,
            EvidenceLayer::DomainDefaults | EvidenceLayer::Capabilities | EvidenceLayer::LiveSchema
        )
    }
}

/// Merged answer for one target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OracleEntry {
    pub states: BTreeSet<String>,
    pub attribute_values: BTreeMap<String, BTreeSet<String>>,
    /// Layers that contributed at least one value.
    pub layers: BTreeSet<EvidenceLayer>,
}

impl OracleEntry {
    /// True when an authoritative layer contributed.
    pub fn is_authoritative(&self) -> bool {
        self.layers.iter().any(|l| l.is_authoritative())
    }

    fn absorb(&mut self, other: OracleEntry) {
        self.states.extend(other.states);
        for (attr, values) in other.attribute_values {
            self.attribute_values.entry(attr).or_default().extend(values);
        }
        self.layers.extend(other.layers);
    }
}

struct CacheSlot {
    entry: OracleEntry,
    fresh: bool,
}

#[derive(Default)]
struct HistoryLayer {
    observed: HashMap<String, BTreeSet<String>>,
    ever_observed: BTreeSet<String>,
}

/// Merged evidence about the host's resources.
///
/// Owned by whoever orchestrates analysis passes; tests build isolated
/// instances with in-memory sources.
pub struct KnowledgeBase {
    snapshot: Arc<dyn StateSnapshot>,
    directory: Arc<dyn ResourceDirectory>,
    decisions: Option<Arc<dyn DecisionStore>>,
    extra_free_form: BTreeSet<String>,
    history: RwLock<HistoryLayer>,
    cache: RwLock<HashMap<String, CacheSlot>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl KnowledgeBase {
    pub fn new(snapshot: Arc<dyn StateSnapshot>, directory: Arc<dyn ResourceDirectory>) -> Self {
        KnowledgeBase {
            snapshot,
            directory,
            decisions: None,
            extra_free_form: BTreeSet::new(),
            history: RwLock::new(HistoryLayer::default()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Read learned values from `store`.
    pub fn with_decisions(mut self, store: Arc<dyn DecisionStore>) -> Self {
        self.decisions = Some(store);
        self
    }

    /// Treat these domains' states as free-form in addition to the built-ins.
    pub fn with_free_form_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_free_form
            .extend(domains.into_iter().map(Into::into));
        self
    }

    pub fn snapshot(&self) -> &dyn StateSnapshot {
        self.snapshot.as_ref()
    }

    pub fn directory(&self) -> &dyn ResourceDirectory {
        self.directory.as_ref()
    }

    // ─── Oracle ─────────────────────────────────────────────────────────────

    /// Merged evidence for `target`, computing it on first access.
    pub fn oracle(&self, target: &str) -> OracleEntry {
        if let Some(slot) = read(&self.cache).get(target)
            && slot.fresh
        {
            return slot.entry.clone();
        }

        let merged = self.merge(target);

        let mut cache = write(&self.cache);
        let slot = cache.entry(target.to_string()).or_insert_with(|| CacheSlot {
            entry: OracleEntry::default(),
            fresh: false,
        });
        slot.entry.absorb(merged);
        slot.fresh = true;
        slot.entry.clone()
    }

    pub fn valid_states_for(&self, target: &str) -> BTreeSet<String> {
        self.oracle(target).states
    }

    /// `None` when no layer knows the attribute's value set.
    pub fn valid_attribute_values_for(
        &self,
        target: &str,
        attribute: &str,
    ) -> Option<BTreeSet<String>> {
        self.oracle(target).attribute_values.remove(attribute)
    }

    pub fn historically_observed(&self, target: &str) -> bool {
        let history = read(&self.history);
        history.ever_observed.contains(target) || history.observed.contains_key(target)
    }

    /// True when `target`'s domain has free-form states that are never validated.
    pub fn is_free_form(&self, target: &str) -> bool {
        let domain = domains::domain_of(target);
        domains::is_free_form_domain(domain) || self.extra_free_form.contains(domain)
    }

    /// Every identifier known live or historically.
    pub fn known_target_ids(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self.snapshot.all_target_ids().into_iter().collect();
        ids.extend(read(&self.history).ever_observed.iter().cloned());
        ids
    }

    /// Mark every cached entry stale.
    pub fn invalidate(&self) {
        for slot in write(&self.cache).values_mut() {
            slot.fresh = false;
        }
    }

    /// Mark one target's cached entry stale, e.g. after a learned value is
    /// confirmed for it.
    pub fn invalidate_target(&self, target: &str) {
        if let Some(slot) = write(&self.cache).get_mut(target) {
            slot.fresh = false;
        }
    }

    // ─── History ────────────────────────────────────────────────────────────

    /// Fetch the last `days` days of history for `targets` under a hard
    /// timeout and fold it into the history layer.
    ///
    /// On timeout or archive failure the previously loaded observations are
    /// kept and the outcome says why nothing new arrived.
    pub async fn load_history(
        &self,
        archive: &dyn HistoryArchive,
        targets: &[String],
        days: u32,
        timeout: Duration,
    ) -> HistoryLoad {
        match tokio::time::timeout(timeout, history::fetch(archive, targets, days)).await {
            Ok(Ok(snapshot)) => {
                let loaded = snapshot.observed.len();
                self.absorb_history(snapshot);
                tracing::info!(targets = loaded, "history layer loaded");
                HistoryLoad::Loaded { targets: loaded }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "history archive failed, layer left unchanged");
                HistoryLoad::Failed(e)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "history archive timed out, layer left unchanged"
                );
                HistoryLoad::TimedOut
            }
        }
    }

    /// Union observations into the history layer and invalidate the cache.
    pub fn absorb_history(&self, snapshot: HistorySnapshot) {
        {
            let mut history = write(&self.history);
            for (target, values) in snapshot.observed {
                history.observed.entry(target).or_default().extend(values);
            }
            history.ever_observed.extend(snapshot.ever_observed);
        }
        self.invalidate();
    }

    // ─── Merge ──────────────────────────────────────────────────────────────

    fn merge(&self, target: &str) -> OracleEntry {
        let domain = domains::domain_of(target);
        let mut entry = OracleEntry::default();
        entry
            .states
            .extend(UNIVERSAL_STATES.iter().map(|s| s.to_string()));

        // 1. Domain defaults
        if let Some(states) = domains::default_states(domain) {
            entry.states.extend(states.iter().map(|s| s.to_string()));
            entry.layers.insert(EvidenceLayer::DomainDefaults);
        }
        if domains::ZONE_AWARE_DOMAINS.contains(&domain) {
            match self.directory.zone_names() {
                Ok(names) => entry.states.extend(names),
                Err(e) => tracing::warn!(resource = %target, error = %e, "zone names unavailable"),
            }
        }

        // 2. Capability declarations
        match self.directory.capabilities(target) {
            Ok(Some(caps)) => {
                if absorb_lists(&mut entry, domain, &caps, target) {
                    entry.layers.insert(EvidenceLayer::Capabilities);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(resource = %target, error = %e, "capabilities unavailable, layer skipped")
            }
        }

        // 3. Live schema
        if let Some(attrs) = self.snapshot.attributes(target)
            && absorb_lists(&mut entry, domain, &attrs, target)
        {
            entry.layers.insert(EvidenceLayer::LiveSchema);
        }
        if let Some(current) = self.snapshot.current_state(target) {
            entry.states.insert(current);
        }

        // 4. Learned values
        if let Some(store) = &self.decisions {
            match store.learned_values(target) {
                Ok(values) if !values.is_empty() => {
                    entry.states.extend(values);
                    entry.layers.insert(EvidenceLayer::Learned);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(resource = %target, error = %e, "learned values unavailable, layer skipped")
                }
            }
        }

        // 5. History
        if let Some(values) = read(&self.history).observed.get(target)
            && !values.is_empty()
        {
            entry.states.extend(values.iter().cloned());
            entry.layers.insert(EvidenceLayer::History);
        }

        entry
    }
}

/// Pull value lists out of an attribute-like map. Returns true if anything
/// was added.
fn absorb_lists(
    entry: &mut OracleEntry,
    domain: &str,
    attrs: &Map<String, Value>,
    target: &str,
) -> bool {
    let mut added = false;

    if let Some(list_attr) = domains::state_list_attribute(domain)
        && let Some(values) = list_values(attrs, list_attr, target)
    {
        added |= !values.is_empty();
        entry.states.extend(values);
    }

    for spec in domains::ATTRIBUTE_VALUE_LISTS {
        if let Some(values) = list_values(attrs, spec.list_attribute, target) {
            added |= !values.is_empty();
            entry
                .attribute_values
                .entry(spec.attribute.to_string())
                .or_default()
                .extend(values);
        }
    }
    added
}

fn list_values(attrs: &Map<String, Value>, key: &str, target: &str) -> Option<BTreeSet<String>> {
    match attrs.get(key)? {
        Value::Array(items) => Some(items.iter().filter_map(scalar_string).collect()),
        _ => {
            tracing::debug!(resource = %target, attribute = key, "list attribute is not a list, ignored");
            None
        }
    }
}
