use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{Lead, LeadPool};

/// Lead <-> Pool and Pool <-> Campaign associations.
///
/// A lead sits in at most one pool's active `members` set. Moving it keeps
/// the old pool's history in `former_members`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(transparent)]
pub struct PoolRegistry {
    pools: BTreeMap<String, LeadPool>,
}

/// Per-lead result of a bulk pool reset.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolResetOutcome {
    pub lead_id: String,
    pub result: Result<(), EngineError>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pool: LeadPool) {
        self.pools.insert(pool.id.clone(), pool);
    }

    pub fn get(&self, pool_id: &str) -> Option<&LeadPool> {
        self.pools.get(pool_id)
    }

    fn get_mut(&mut self, pool_id: &str) -> Result<&mut LeadPool, EngineError> {
        self.pools
            .get_mut(pool_id)
            .ok_or_else(|| EngineError::PoolNotFound(pool_id.to_string()))
    }

    pub fn pools(&self) -> impl Iterator<Item = &LeadPool> {
        self.pools.values()
    }

    /// Make `pool_id` the lead's active pool, retiring any previous membership.
    pub fn assign_lead(&mut self, pool_id: &str, lead: &mut Lead) -> Result<(), EngineError> {
        if !self.pools.contains_key(pool_id) {
            return Err(EngineError::PoolNotFound(pool_id.to_string()));
        }

        if let Some(previous) = lead.pool_id.clone() {
            if previous == pool_id {
                return Ok(());
            }
            if let Some(old) = self.pools.get_mut(&previous) {
                old.members.remove(&lead.id);
                old.former_members.insert(lead.id.clone());
            }
        }

        let pool = self.get_mut(pool_id)?;
        pool.members.insert(lead.id.clone());
        pool.former_members.remove(&lead.id);
        lead.pool_id = Some(pool_id.to_string());
        lead.touch();
        Ok(())
    }

    pub fn remove_lead(&mut self, pool_id: &str, lead: &mut Lead) -> Result<(), EngineError> {
        let pool = self.get_mut(pool_id)?;
        if !pool.members.remove(&lead.id) {
            return Err(EngineError::InvalidInput(format!(
                "Lead {} is not an active member of pool {}",
                lead.id, pool_id
            )));
        }
        pool.former_members.insert(lead.id.clone());
        lead.pool_id = None;
        lead.touch();
        Ok(())
    }

    pub fn assign_campaign(&mut self, pool_id: &str, campaign_id: &str) -> Result<(), EngineError> {
        let pool = self.get_mut(pool_id)?;
        pool.campaign_id = Some(campaign_id.to_string());
        Ok(())
    }

    pub fn clear_campaign(&mut self, pool_id: &str) -> Result<(), EngineError> {
        let pool = self.get_mut(pool_id)?;
        pool.campaign_id = None;
        Ok(())
    }

    /// The campaign assigned to `pool_id`, if any.
    pub fn campaign_for(&self, pool_id: &str) -> Result<Option<&str>, EngineError> {
        self.pools
            .get(pool_id)
            .map(|p| p.campaign_id.as_deref())
            .ok_or_else(|| EngineError::PoolNotFound(pool_id.to_string()))
    }

    /// Pool-level precondition for starting a batch: a pool without a
    /// campaign can never start one, whatever the campaign states elsewhere.
    pub fn can_start_batch(&self, pool_id: &str) -> bool {
        matches!(self.campaign_for(pool_id), Ok(Some(_)))
    }

    pub fn is_member(&self, pool_id: &str, lead_id: &str) -> bool {
        self.pools
            .get(pool_id)
            .is_some_and(|p| p.members.contains(lead_id))
    }
}
