#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use outreach_engine::campaign::CampaignAction;
use outreach_engine::coordinator::{spawn_coordinator, CoordinatorHandle, CoordinatorSettings};
use outreach_engine::dispatcher::DispatchSettings;
use outreach_engine::types::{Campaign, CampaignStatus, Channel, EngineState, Lead, LeadPool};

/// A coordinator over an empty state file in a fresh temp directory.
///
/// Keep `dir` alive for the duration of the test; dropping it removes the
/// state file out from under the coordinator.
pub struct TestEnv {
    pub dir: TempDir,
    pub handle: CoordinatorHandle,
    pub task: tokio::task::JoinHandle<()>,
}

impl TestEnv {
    pub fn state_path(&self) -> PathBuf {
        self.dir.path().join("outreach-state.json")
    }
}

/// Spawns a coordinator with default settings over an empty state.
pub fn spawn_env() -> TestEnv {
    spawn_env_with(CoordinatorSettings::default())
}

pub fn spawn_env_with(settings: CoordinatorSettings) -> TestEnv {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let state_path = dir.path().join("outreach-state.json");
    let (handle, task) = spawn_coordinator(EngineState::default(), state_path, settings);
    TestEnv { dir, handle, task }
}

pub fn channels(list: &[Channel]) -> BTreeSet<Channel> {
    list.iter().copied().collect()
}

/// Creates a lead with an email address and a valid E.164 phone number.
pub async fn add_reachable_lead(handle: &CoordinatorHandle, name: &str) -> Lead {
    handle
        .add_lead(
            name,
            Some(format!("{}@example.com", name.to_lowercase())),
            Some("+15551234567".to_string()),
        )
        .await
        .expect("add lead")
}

/// Creates a pool with an Active campaign on `channels`, returning
/// `(pool_id, campaign_id)`.
pub async fn active_pool(handle: &CoordinatorHandle, enabled: &[Channel]) -> (String, String) {
    let campaign = handle
        .create_campaign("Spring outreach", channels(enabled))
        .await
        .expect("create campaign");
    handle
        .apply_campaign_action(&campaign.id, CampaignAction::Submit)
        .await
        .expect("submit campaign");
    let pool = handle
        .create_pool("Fintech CTOs", serde_json::Value::Null)
        .await
        .expect("create pool");
    handle
        .assign_campaign(&pool.id, &campaign.id)
        .await
        .expect("assign campaign");
    (pool.id, campaign.id)
}

/// Adds `n` reachable leads to `pool_id` and returns their IDs in creation order.
pub async fn populate_pool(handle: &CoordinatorHandle, pool_id: &str, n: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let lead = add_reachable_lead(handle, &format!("Lead{}", i + 1)).await;
        handle
            .assign_lead(pool_id, &lead.id)
            .await
            .expect("assign lead");
        ids.push(lead.id);
    }
    ids
}

/// Dispatch settings with no retry backoff, for tests that don't exercise retries.
pub fn fast_settings() -> DispatchSettings {
    DispatchSettings {
        result_log_capacity: 100,
        gate_check_retries: 2,
        gate_retry_backoff: Duration::from_millis(1),
    }
}

/// A coordinator whose state path is a directory, so every save fails.
/// The in-memory state holds one pooled lead and an Active email campaign.
pub fn unsaveable_env(dir: &tempfile::TempDir) -> CoordinatorHandle {
    let mut engine = EngineState::default();
    let mut campaign = Campaign::new("CMP-001", "Spring", channels(&[Channel::Email]), false);
    campaign.status = CampaignStatus::Active;
    engine.campaigns.insert(campaign.id.clone(), campaign);

    let mut lead = Lead::new("LEAD-001", "Ada", Some("ada@example.com".to_string()), None);
    engine.pools.insert(LeadPool {
        id: "POOL-001".to_string(),
        name: "Fintech".to_string(),
        ..Default::default()
    });
    engine.pools.assign_lead("POOL-001", &mut lead).unwrap();
    engine.pools.assign_campaign("POOL-001", "CMP-001").unwrap();
    engine.leads.insert(lead.id.clone(), lead);

    let (handle, _task) = spawn_coordinator(
        engine,
        dir.path().to_path_buf(),
        CoordinatorSettings::default(),
    );
    handle
}
