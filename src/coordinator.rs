use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use crate::campaign::{self, CampaignAction};
use crate::config::OutreachConfig;
use crate::error::EngineError;
use crate::gate::GateSnapshot;
use crate::pipeline;
use crate::registry::PoolResetOutcome;
use crate::types::{
    Activity, ActivityType, Campaign, CampaignCounters, Channel, EngineState, Lead, LeadPool,
    LeadUpdate,
};
use crate::{log_debug, log_error, log_warn};

// --- Command enum ---

pub enum CoordinatorCommand {
    GetSnapshot {
        reply: oneshot::Sender<EngineState>,
    },
    AddLead {
        name: String,
        email: Option<String>,
        phone: Option<String>,
        reply: oneshot::Sender<Result<Lead, EngineError>>,
    },
    GetLead {
        lead_id: String,
        reply: oneshot::Sender<Result<Lead, EngineError>>,
    },
    UpdateLead {
        lead_id: String,
        update: LeadUpdate,
        expected_version: Option<u64>,
        reply: oneshot::Sender<Result<Lead, EngineError>>,
    },
    AppendActivity {
        activity: Activity,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    QueryActivities {
        lead_id: String,
        activity_type: Option<ActivityType>,
        reply: oneshot::Sender<Vec<Activity>>,
    },
    GateSnapshot {
        lead_id: String,
        reply: oneshot::Sender<Result<GateSnapshot, EngineError>>,
    },
    ClaimLead {
        lead_id: String,
        expected_version: u64,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ReleaseLead {
        lead_id: String,
        reply: oneshot::Sender<()>,
    },
    CompleteDispatch {
        lead_id: String,
        campaign_id: String,
        channel: Channel,
        reference: String,
        reply: oneshot::Sender<Result<Lead, EngineError>>,
    },
    CreateCampaign {
        name: String,
        channels: BTreeSet<Channel>,
        reply: oneshot::Sender<Result<Campaign, EngineError>>,
    },
    GetCampaign {
        campaign_id: String,
        reply: oneshot::Sender<Result<Campaign, EngineError>>,
    },
    ApplyCampaignAction {
        campaign_id: String,
        action: CampaignAction,
        reply: oneshot::Sender<Result<Campaign, EngineError>>,
    },
    IncrementCounters {
        campaign_id: String,
        delta: CampaignCounters,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ResetCounters {
        campaign_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    CreatePool {
        name: String,
        icp: serde_json::Value,
        reply: oneshot::Sender<Result<LeadPool, EngineError>>,
    },
    GetPool {
        pool_id: String,
        reply: oneshot::Sender<Result<LeadPool, EngineError>>,
    },
    AssignLead {
        pool_id: String,
        lead_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    RemoveLead {
        pool_id: String,
        lead_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    AssignCampaign {
        pool_id: String,
        campaign_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ClearCampaign {
        pool_id: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    PoolCampaign {
        pool_id: String,
        reply: oneshot::Sender<Result<Option<Campaign>, EngineError>>,
    },
    ResetPool {
        pool_id: String,
        lead_ids: Vec<String>,
        reply: oneshot::Sender<Result<Vec<PoolResetOutcome>, EngineError>>,
    },
}

// --- CoordinatorHandle ---

/// Cloneable handle to the state actor. Every method is one command, and
/// each command is applied to completion before the next one starts.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    async fn send_command<T>(
        &self,
        command: CoordinatorCommand,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, EngineError> {
        self.sender.send(command).await.map_err(|_| {
            EngineError::CoordinatorUnavailable("coordinator shut down".to_string())
        })?;
        rx.await.map_err(|_| {
            EngineError::CoordinatorUnavailable("coordinator dropped reply".to_string())
        })
    }

    pub async fn get_snapshot(&self) -> Result<EngineState, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::GetSnapshot { reply }, rx)
            .await
    }

    pub async fn add_lead(
        &self,
        name: &str,
        email: Option<String>,
        phone: Option<String>,
    ) -> Result<Lead, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::AddLead {
                name: name.to_string(),
                email,
                phone,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn get_lead(&self, lead_id: &str) -> Result<Lead, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::GetLead {
                lead_id: lead_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Apply `update` to a lead. With `expected_version`, the update only
    /// lands if nothing else touched the lead since it was read.
    pub async fn update_lead(
        &self,
        lead_id: &str,
        update: LeadUpdate,
        expected_version: Option<u64>,
    ) -> Result<Lead, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::UpdateLead {
                lead_id: lead_id.to_string(),
                update,
                expected_version,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn append_activity(
        &self,
        lead_id: &str,
        activity_type: ActivityType,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), EngineError> {
        let mut activity = Activity::new(lead_id, activity_type);
        activity.metadata = metadata;
        let (reply, rx) = oneshot::channel();
        self.send_command(CoordinatorCommand::AppendActivity { activity, reply }, rx)
            .await?
    }

    pub async fn query_activities(
        &self,
        lead_id: &str,
        activity_type: Option<ActivityType>,
    ) -> Result<Vec<Activity>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::QueryActivities {
                lead_id: lead_id.to_string(),
                activity_type,
                reply,
            },
            rx,
        )
        .await
    }

    pub async fn gate_snapshot(&self, lead_id: &str) -> Result<GateSnapshot, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::GateSnapshot {
                lead_id: lead_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Take the per-lead dispatch lease. Fails with `ConcurrentModification`
    /// if another dispatch holds it or the lead changed since `expected_version`.
    pub async fn claim_lead(&self, lead_id: &str, expected_version: u64) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::ClaimLead {
                lead_id: lead_id.to_string(),
                expected_version,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn release_lead(&self, lead_id: &str) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::ReleaseLead {
                lead_id: lead_id.to_string(),
                reply,
            },
            rx,
        )
        .await
    }

    /// Record a successful gateway call: lead transition, ledger entry and
    /// campaign counter in one step. Releases the lead's lease either way.
    pub async fn complete_dispatch(
        &self,
        lead_id: &str,
        campaign_id: &str,
        channel: Channel,
        reference: &str,
    ) -> Result<Lead, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::CompleteDispatch {
                lead_id: lead_id.to_string(),
                campaign_id: campaign_id.to_string(),
                channel,
                reference: reference.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn create_campaign(
        &self,
        name: &str,
        channels: BTreeSet<Channel>,
    ) -> Result<Campaign, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::CreateCampaign {
                name: name.to_string(),
                channels,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> Result<Campaign, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::GetCampaign {
                campaign_id: campaign_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn apply_campaign_action(
        &self,
        campaign_id: &str,
        action: CampaignAction,
    ) -> Result<Campaign, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::ApplyCampaignAction {
                campaign_id: campaign_id.to_string(),
                action,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn increment_counters(
        &self,
        campaign_id: &str,
        delta: CampaignCounters,
    ) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::IncrementCounters {
                campaign_id: campaign_id.to_string(),
                delta,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn reset_counters(&self, campaign_id: &str) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::ResetCounters {
                campaign_id: campaign_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn create_pool(
        &self,
        name: &str,
        icp: serde_json::Value,
    ) -> Result<LeadPool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::CreatePool {
                name: name.to_string(),
                icp,
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn get_pool(&self, pool_id: &str) -> Result<LeadPool, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::GetPool {
                pool_id: pool_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn assign_lead(&self, pool_id: &str, lead_id: &str) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::AssignLead {
                pool_id: pool_id.to_string(),
                lead_id: lead_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn remove_lead(&self, pool_id: &str, lead_id: &str) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::RemoveLead {
                pool_id: pool_id.to_string(),
                lead_id: lead_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn assign_campaign(&self, pool_id: &str, campaign_id: &str) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::AssignCampaign {
                pool_id: pool_id.to_string(),
                campaign_id: campaign_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    pub async fn clear_campaign(&self, pool_id: &str) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::ClearCampaign {
                pool_id: pool_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// The campaign assigned to `pool_id`, or `None` if the pool has none.
    pub async fn pool_campaign(&self, pool_id: &str) -> Result<Option<Campaign>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::PoolCampaign {
                pool_id: pool_id.to_string(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Reset each listed lead of `pool_id`. Best-effort: one lead failing
    /// does not stop the others, and each gets its own outcome.
    pub async fn reset_pool(
        &self,
        pool_id: &str,
        lead_ids: Vec<String>,
    ) -> Result<Vec<PoolResetOutcome>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            CoordinatorCommand::ResetPool {
                pool_id: pool_id.to_string(),
                lead_ids,
                reply,
            },
            rx,
        )
        .await?
    }
}

// --- Settings ---

/// The slice of configuration the coordinator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    pub lead_prefix: String,
    pub campaign_prefix: String,
    pub pool_prefix: String,
    pub requires_approval: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&OutreachConfig::default())
    }
}

impl CoordinatorSettings {
    pub fn from_config(config: &OutreachConfig) -> Self {
        Self {
            lead_prefix: config.project.lead_prefix.clone(),
            campaign_prefix: config.project.campaign_prefix.clone(),
            pool_prefix: config.project.pool_prefix.clone(),
            requires_approval: config.campaigns.requires_approval,
        }
    }
}

// --- Actor implementation ---

const CHANNEL_CAPACITY: usize = 32;

struct CoordinatorState {
    engine: EngineState,
    state_path: PathBuf,
    settings: CoordinatorSettings,
    /// Leads with a dispatch between claim and completion. Not persisted.
    leased: HashSet<String>,
}

impl CoordinatorState {
    fn lead(&self, lead_id: &str) -> Result<&Lead, EngineError> {
        self.engine
            .leads
            .get(lead_id)
            .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))
    }

    fn campaign_mut(&mut self, campaign_id: &str) -> Result<&mut Campaign, EngineError> {
        self.engine
            .campaigns
            .get_mut(campaign_id)
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))
    }

    fn save(&self) -> Result<(), EngineError> {
        crate::store::save(&self.state_path, &self.engine).map_err(EngineError::Storage)
    }

    /// Run one mutating command and persist it. If the command or the save
    /// fails, the engine state is restored to what it was before the command.
    fn transact<T>(
        &mut self,
        apply: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let before = self.engine.clone();
        let result = apply(self).and_then(|value| self.save().map(|()| value));
        if let Err(ref e) = result {
            if matches!(e, EngineError::Storage(_)) {
                log_error!("State not saved, rolling back: {}", e);
            }
            self.engine = before;
        }
        result
    }

    fn ensure_not_leased(&self, lead_id: &str) -> Result<(), EngineError> {
        if self.leased.contains(lead_id) {
            return Err(EngineError::ConcurrentModification {
                lead_id: lead_id.to_string(),
            });
        }
        Ok(())
    }

    /// Campaign attached to the lead's active pool, if any.
    fn lead_pool_campaign_id(&self, lead: &Lead) -> Option<String> {
        let pool_id = lead.pool_id.as_deref()?;
        self.engine
            .pools
            .campaign_for(pool_id)
            .ok()
            .flatten()
            .map(str::to_string)
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn handle_add_lead(
    state: &mut CoordinatorState,
    name: &str,
    email: Option<String>,
    phone: Option<String>,
) -> Result<Lead, EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("lead name is required".to_string()));
    }
    let prefix = state.settings.lead_prefix.clone();
    let id = crate::store::generate_next_id(&mut state.engine, &prefix);
    let lead = Lead::new(&id, name.trim(), normalize(email), normalize(phone));
    state.engine.leads.insert(id, lead.clone());
    Ok(lead)
}

fn handle_update_lead(
    state: &mut CoordinatorState,
    lead_id: &str,
    update: LeadUpdate,
    expected_version: Option<u64>,
) -> Result<Lead, EngineError> {
    state.ensure_not_leased(lead_id)?;
    let mut lead = state.lead(lead_id)?.clone();

    if let Some(expected) = expected_version {
        if lead.version != expected {
            return Err(EngineError::ConcurrentModification {
                lead_id: lead_id.to_string(),
            });
        }
    }

    let opened = matches!(update, LeadUpdate::RecordOpen);
    let booked = matches!(update, LeadUpdate::RecordMeetingBooked);
    let update = match update {
        LeadUpdate::SetEmail(email) => LeadUpdate::SetEmail(normalize(email)),
        LeadUpdate::SetPhone(phone) => LeadUpdate::SetPhone(normalize(phone)),
        other => other,
    };

    let activities = pipeline::apply_update(&mut lead, update)?;

    // Engagement callbacks count toward the campaign working the lead's pool.
    // Opens only count once an email went out.
    let opened = opened && state.engine.activities.has(lead_id, &ActivityType::EmailSent);
    if opened || booked {
        let delta = CampaignCounters {
            emails_opened: u64::from(opened),
            meetings_booked: u64::from(booked),
            ..Default::default()
        };
        count_engagement(state, &lead, &delta);
    }

    for activity in activities {
        state.engine.activities.append(activity);
    }
    state.engine.leads.insert(lead_id.to_string(), lead.clone());
    Ok(lead)
}

fn count_engagement(state: &mut CoordinatorState, lead: &Lead, delta: &CampaignCounters) {
    let Some(campaign_id) = state.lead_pool_campaign_id(lead) else {
        return;
    };
    match state.campaign_mut(&campaign_id) {
        Ok(campaign) if campaign.status.is_terminal() => {
            log_debug!(
                "[{}] Campaign {} is {}, engagement not counted",
                lead.id,
                campaign_id,
                campaign.status
            );
        }
        Ok(campaign) => campaign::increment_counters(campaign, delta),
        Err(e) => log_warn!("[{}] Engagement not counted: {}", lead.id, e),
    }
}

fn handle_append_activity(
    state: &mut CoordinatorState,
    activity: Activity,
) -> Result<(), EngineError> {
    state.lead(&activity.lead_id)?;
    state.engine.activities.append(activity);
    Ok(())
}

fn handle_gate_snapshot(state: &CoordinatorState, lead_id: &str) -> Result<GateSnapshot, EngineError> {
    let lead = state.lead(lead_id)?.clone();
    let email_sent = state
        .engine
        .activities
        .has(lead_id, &ActivityType::EmailSent);
    let pool_campaign_id = state.lead_pool_campaign_id(&lead);
    Ok(GateSnapshot {
        lead,
        email_sent,
        pool_campaign_id,
    })
}

fn handle_claim_lead(
    state: &mut CoordinatorState,
    lead_id: &str,
    expected_version: u64,
) -> Result<(), EngineError> {
    let lead = state.lead(lead_id)?;
    if lead.version != expected_version || state.leased.contains(lead_id) {
        return Err(EngineError::ConcurrentModification {
            lead_id: lead_id.to_string(),
        });
    }
    state.leased.insert(lead_id.to_string());
    Ok(())
}

fn handle_complete_dispatch(
    state: &mut CoordinatorState,
    lead_id: &str,
    campaign_id: &str,
    channel: Channel,
    reference: &str,
) -> Result<Lead, EngineError> {
    state.leased.remove(lead_id);

    let mut lead = state.lead(lead_id)?.clone();
    let activity = pipeline::record_dispatch(&mut lead, channel, reference)?;
    let campaign = state.campaign_mut(campaign_id)?;
    campaign::increment_counters(campaign, &CampaignCounters::for_channel(channel));

    state.engine.activities.append(activity.with_meta("campaign_id", campaign_id));
    state.engine.leads.insert(lead_id.to_string(), lead.clone());
    Ok(lead)
}

fn handle_create_campaign(
    state: &mut CoordinatorState,
    name: &str,
    channels: BTreeSet<Channel>,
) -> Result<Campaign, EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("campaign name is required".to_string()));
    }
    if channels.is_empty() {
        return Err(EngineError::InvalidInput(
            "campaign needs at least one channel".to_string(),
        ));
    }
    let prefix = state.settings.campaign_prefix.clone();
    let id = crate::store::generate_next_id(&mut state.engine, &prefix);
    let campaign = Campaign::new(&id, name.trim(), channels, state.settings.requires_approval);
    state.engine.campaigns.insert(id, campaign.clone());
    Ok(campaign)
}

fn handle_campaign_action(
    state: &mut CoordinatorState,
    campaign_id: &str,
    action: CampaignAction,
) -> Result<Campaign, EngineError> {
    let mut campaign = state.campaign_mut(campaign_id)?.clone();
    campaign::apply_action(&mut campaign, action)?;
    state
        .engine
        .campaigns
        .insert(campaign_id.to_string(), campaign.clone());
    Ok(campaign)
}

fn handle_increment_counters(
    state: &mut CoordinatorState,
    campaign_id: &str,
    delta: &CampaignCounters,
) -> Result<(), EngineError> {
    campaign::increment_counters(state.campaign_mut(campaign_id)?, delta);
    Ok(())
}

fn handle_reset_counters(state: &mut CoordinatorState, campaign_id: &str) -> Result<(), EngineError> {
    campaign::reset_counters(state.campaign_mut(campaign_id)?);
    Ok(())
}

fn handle_create_pool(
    state: &mut CoordinatorState,
    name: &str,
    icp: serde_json::Value,
) -> Result<LeadPool, EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("pool name is required".to_string()));
    }
    let prefix = state.settings.pool_prefix.clone();
    let id = crate::store::generate_next_id(&mut state.engine, &prefix);
    let pool = LeadPool {
        id,
        name: name.trim().to_string(),
        icp,
        ..Default::default()
    };
    state.engine.pools.insert(pool.clone());
    Ok(pool)
}

fn handle_assign_lead(
    state: &mut CoordinatorState,
    pool_id: &str,
    lead_id: &str,
) -> Result<(), EngineError> {
    state.ensure_not_leased(lead_id)?;
    let mut lead = state.lead(lead_id)?.clone();
    state.engine.pools.assign_lead(pool_id, &mut lead)?;
    state.engine.leads.insert(lead_id.to_string(), lead);
    Ok(())
}

fn handle_remove_lead(
    state: &mut CoordinatorState,
    pool_id: &str,
    lead_id: &str,
) -> Result<(), EngineError> {
    state.ensure_not_leased(lead_id)?;
    let mut lead = state.lead(lead_id)?.clone();
    state.engine.pools.remove_lead(pool_id, &mut lead)?;
    state.engine.leads.insert(lead_id.to_string(), lead);
    Ok(())
}

fn handle_assign_campaign(
    state: &mut CoordinatorState,
    pool_id: &str,
    campaign_id: &str,
) -> Result<(), EngineError> {
    let campaign = state.campaign_mut(campaign_id)?;
    if campaign.status.is_terminal() {
        return Err(EngineError::TerminalStateError {
            campaign_id: campaign_id.to_string(),
            status: campaign.status,
        });
    }
    state.engine.pools.assign_campaign(pool_id, campaign_id)
}

fn handle_pool_campaign(
    state: &CoordinatorState,
    pool_id: &str,
) -> Result<Option<Campaign>, EngineError> {
    match state.engine.pools.campaign_for(pool_id)? {
        None => Ok(None),
        Some(campaign_id) => state
            .engine
            .campaigns
            .get(campaign_id)
            .cloned()
            .map(Some)
            .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string())),
    }
}

fn handle_reset_pool(
    state: &mut CoordinatorState,
    pool_id: &str,
    lead_ids: &[String],
) -> Result<Vec<PoolResetOutcome>, EngineError> {
    if state.engine.pools.get(pool_id).is_none() {
        return Err(EngineError::PoolNotFound(pool_id.to_string()));
    }

    let mut outcomes = Vec::with_capacity(lead_ids.len());
    for lead_id in lead_ids {
        let result = reset_pool_member(state, pool_id, lead_id);
        if let Err(ref e) = result {
            log_debug!("[{}][{}] Reset skipped: {}", pool_id, lead_id, e);
        }
        outcomes.push(PoolResetOutcome {
            lead_id: lead_id.clone(),
            result,
        });
    }

    Ok(outcomes)
}

fn reset_pool_member(
    state: &mut CoordinatorState,
    pool_id: &str,
    lead_id: &str,
) -> Result<(), EngineError> {
    if !state.engine.pools.is_member(pool_id, lead_id) {
        state.lead(lead_id)?;
        return Err(EngineError::InvalidInput(format!(
            "Lead {} is not an active member of pool {}",
            lead_id, pool_id
        )));
    }
    state.ensure_not_leased(lead_id)?;
    let lead = state
        .engine
        .leads
        .get_mut(lead_id)
        .ok_or_else(|| EngineError::LeadNotFound(lead_id.to_string()))?;
    let activity = pipeline::reset(lead);
    state
        .engine
        .activities
        .append(activity.with_meta("pool_id", pool_id));
    Ok(())
}

// --- Actor loop ---

async fn run_coordinator(
    mut rx: mpsc::Receiver<CoordinatorCommand>,
    engine: EngineState,
    state_path: PathBuf,
    settings: CoordinatorSettings,
) {
    let mut state = CoordinatorState {
        engine,
        state_path,
        settings,
        leased: HashSet::new(),
    };

    while let Some(cmd) = rx.recv().await {
        match cmd {
            CoordinatorCommand::GetSnapshot { reply } => {
                let _ = reply.send(state.engine.clone());
            }
            CoordinatorCommand::AddLead {
                name,
                email,
                phone,
                reply,
            } => {
                let result = state.transact(|s| handle_add_lead(s, &name, email, phone));
                let _ = reply.send(result);
            }
            CoordinatorCommand::GetLead { lead_id, reply } => {
                let _ = reply.send(state.lead(&lead_id).cloned());
            }
            CoordinatorCommand::UpdateLead {
                lead_id,
                update,
                expected_version,
                reply,
            } => {
                let result = state.transact(|s| {
                    handle_update_lead(s, &lead_id, update, expected_version)
                });
                let _ = reply.send(result);
            }
            CoordinatorCommand::AppendActivity { activity, reply } => {
                let result = state.transact(|s| handle_append_activity(s, activity));
                let _ = reply.send(result);
            }
            CoordinatorCommand::QueryActivities {
                lead_id,
                activity_type,
                reply,
            } => {
                let activities = state
                    .engine
                    .activities
                    .query(&lead_id, activity_type.as_ref());
                let _ = reply.send(activities);
            }
            CoordinatorCommand::GateSnapshot { lead_id, reply } => {
                let _ = reply.send(handle_gate_snapshot(&state, &lead_id));
            }
            CoordinatorCommand::ClaimLead {
                lead_id,
                expected_version,
                reply,
            } => {
                let result = handle_claim_lead(&mut state, &lead_id, expected_version);
                let _ = reply.send(result);
            }
            CoordinatorCommand::ReleaseLead { lead_id, reply } => {
                state.leased.remove(&lead_id);
                let _ = reply.send(());
            }
            CoordinatorCommand::CompleteDispatch {
                lead_id,
                campaign_id,
                channel,
                reference,
                reply,
            } => {
                let result = state.transact(|s| {
                    handle_complete_dispatch(s, &lead_id, &campaign_id, channel, &reference)
                });
                let _ = reply.send(result);
            }
            CoordinatorCommand::CreateCampaign {
                name,
                channels,
                reply,
            } => {
                let result = state.transact(|s| handle_create_campaign(s, &name, channels));
                let _ = reply.send(result);
            }
            CoordinatorCommand::GetCampaign { campaign_id, reply } => {
                let result = state
                    .engine
                    .campaigns
                    .get(&campaign_id)
                    .cloned()
                    .ok_or(EngineError::CampaignNotFound(campaign_id));
                let _ = reply.send(result);
            }
            CoordinatorCommand::ApplyCampaignAction {
                campaign_id,
                action,
                reply,
            } => {
                let result = state.transact(|s| handle_campaign_action(s, &campaign_id, action));
                let _ = reply.send(result);
            }
            CoordinatorCommand::IncrementCounters {
                campaign_id,
                delta,
                reply,
            } => {
                let result =
                    state.transact(|s| handle_increment_counters(s, &campaign_id, &delta));
                let _ = reply.send(result);
            }
            CoordinatorCommand::ResetCounters { campaign_id, reply } => {
                let result = state.transact(|s| handle_reset_counters(s, &campaign_id));
                let _ = reply.send(result);
            }
            CoordinatorCommand::CreatePool { name, icp, reply } => {
                let result = state.transact(|s| handle_create_pool(s, &name, icp));
                let _ = reply.send(result);
            }
            CoordinatorCommand::GetPool { pool_id, reply } => {
                let result = state
                    .engine
                    .pools
                    .get(&pool_id)
                    .cloned()
                    .ok_or(EngineError::PoolNotFound(pool_id));
                let _ = reply.send(result);
            }
            CoordinatorCommand::AssignLead {
                pool_id,
                lead_id,
                reply,
            } => {
                let result = state.transact(|s| handle_assign_lead(s, &pool_id, &lead_id));
                let _ = reply.send(result);
            }
            CoordinatorCommand::RemoveLead {
                pool_id,
                lead_id,
                reply,
            } => {
                let result = state.transact(|s| handle_remove_lead(s, &pool_id, &lead_id));
                let _ = reply.send(result);
            }
            CoordinatorCommand::AssignCampaign {
                pool_id,
                campaign_id,
                reply,
            } => {
                let result =
                    state.transact(|s| handle_assign_campaign(s, &pool_id, &campaign_id));
                let _ = reply.send(result);
            }
            CoordinatorCommand::ClearCampaign { pool_id, reply } => {
                let result = state.transact(|s| s.engine.pools.clear_campaign(&pool_id));
                let _ = reply.send(result);
            }
            CoordinatorCommand::PoolCampaign { pool_id, reply } => {
                let _ = reply.send(handle_pool_campaign(&state, &pool_id));
            }
            CoordinatorCommand::ResetPool {
                pool_id,
                lead_ids,
                reply,
            } => {
                let result = state.transact(|s| handle_reset_pool(s, &pool_id, &lead_ids));
                let _ = reply.send(result);
            }
        }
    }

    // Shutdown: save final state when all senders drop
    if let Err(e) = state.save() {
        log_error!("Failed to save state on coordinator shutdown: {}", e);
    }
}

// --- Spawn ---

pub fn spawn_coordinator(
    engine: EngineState,
    state_path: PathBuf,
    settings: CoordinatorSettings,
) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let task_handle = tokio::spawn(run_coordinator(rx, engine, state_path, settings));

    (CoordinatorHandle { sender: tx }, task_handle)
}
