use serde::{Deserialize, Serialize};

use crate::types::{Activity, ActivityType};

/// Append-only record of per-lead events.
///
/// Entries are kept in append order. There is no API to mutate or remove an
/// entry once appended.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(transparent)]
pub struct ActivityLedger {
    entries: Vec<Activity>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, activity: Activity) {
        self.entries.push(activity);
    }

    /// Activities for `lead_id` in append order, optionally filtered by type.
    pub fn query(&self, lead_id: &str, activity_type: Option<&ActivityType>) -> Vec<Activity> {
        self.entries
            .iter()
            .filter(|a| a.lead_id == lead_id)
            .filter(|a| activity_type.map_or(true, |t| a.activity_type == *t))
            .cloned()
            .collect()
    }

    pub fn has(&self, lead_id: &str, activity_type: &ActivityType) -> bool {
        self.entries
            .iter()
            .any(|a| a.lead_id == lead_id && a.activity_type == *activity_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
