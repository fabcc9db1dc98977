//! Loading the history-archive evidence layer.

use std::collections::{BTreeSet, HashMap};

use crate::error::EvidenceError;
use crate::sources::HistoryArchive;

/// Observations fetched from the archive in one load.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistorySnapshot {
    pub observed: HashMap<String, BTreeSet<String>>,
    pub ever_observed: BTreeSet<String>,
}

/// Outcome of [`KnowledgeBase::load_history`](crate::knowledge::KnowledgeBase::load_history).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryLoad {
    Loaded { targets: usize },
    TimedOut,
    Failed(EvidenceError),
}

impl HistoryLoad {
    pub fn is_loaded(&self) -> bool {
        matches!(self, HistoryLoad::Loaded { .. })
    }
}

/// Query the archive for the ever-observed id set and the values each of
/// `targets` held within the last `days` days.
///
/// Failing to list ever-observed ids fails the whole fetch. A failure for one
/// target only drops that target, as does an empty answer.
pub async fn fetch(
    archive: &dyn HistoryArchive,
    targets: &[String],
    days: u32,
) -> Result<HistorySnapshot, EvidenceError> {
    let ever_observed = archive.all_target_ids_ever_observed().await?;

    let mut observed = HashMap::new();
    for target in targets {
        match archive.all_observed_values(target, days).await {
            Ok(values) if !values.is_empty() => {
                observed.insert(target.clone(), values);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(resource = %target, error = %e, "no history for target");
            }
        }
    }

    Ok(HistorySnapshot {
        observed,
        ever_observed,
    })
}
