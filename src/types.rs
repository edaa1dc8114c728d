use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::ActivityLedger;
use crate::registry::PoolRegistry;

// --- Enums ---

/// Coarse sales-process phase. Ordered so that "at least" comparisons work.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Identify,
    EngageAi,
    EngageHuman,
    Offering,
    Finalizing,
    Closed,
}

impl PipelineStage {
    /// Stages only move forward outside of an explicit reset.
    /// Closed is reached through `close`, never through a plain advance.
    pub fn can_advance_to(&self, to: &PipelineStage) -> bool {
        *to != PipelineStage::Closed && to > self
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Identify => write!(f, "identify"),
            PipelineStage::EngageAi => write!(f, "engage_ai"),
            PipelineStage::EngageHuman => write!(f, "engage_human"),
            PipelineStage::Offering => write!(f, "offering"),
            PipelineStage::Finalizing => write!(f, "finalizing"),
            PipelineStage::Closed => write!(f, "closed"),
        }
    }
}

pub fn parse_pipeline_stage(s: &str) -> Result<PipelineStage, String> {
    match s.to_lowercase().replace('-', "_").as_str() {
        "identify" => Ok(PipelineStage::Identify),
        "engage_ai" => Ok(PipelineStage::EngageAi),
        "engage_human" => Ok(PipelineStage::EngageHuman),
        "offering" => Ok(PipelineStage::Offering),
        "finalizing" => Ok(PipelineStage::Finalizing),
        "closed" => Ok(PipelineStage::Closed),
        _ => Err(format!(
            "Invalid stage '{}': expected identify, engage_ai, engage_human, offering, finalizing, or closed",
            s
        )),
    }
}

/// Fine-grained state of the current outbound-contact attempt.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    #[default]
    Idle,
    Pending,
    Sent,
    Opened,
    MeetingLinkClicked,
    MeetingBooked,
    Closed,
}

impl OutreachStatus {
    /// Validates whether a transition from this status to `to` is allowed.
    ///
    /// Rules:
    /// - Any non-closed status can transition to Closed
    /// - Forward progression: Idle -> Pending -> Sent -> Opened -> MeetingLinkClicked -> MeetingBooked
    /// - A send may skip Pending; a booking may skip Opened and MeetingLinkClicked
    /// - Closed is absorbing; only an explicit reset leaves it
    pub fn is_valid_transition(&self, to: &OutreachStatus) -> bool {
        use OutreachStatus::*;

        if *to == Closed {
            return *self != Closed;
        }

        matches!(
            (self, to),
            (Idle, Pending)
                | (Idle, Sent)
                | (Pending, Sent)
                | (Sent, Opened)
                | (Sent, MeetingLinkClicked)
                | (Opened, MeetingLinkClicked)
                | (Sent, MeetingBooked)
                | (Opened, MeetingBooked)
                | (MeetingLinkClicked, MeetingBooked)
        )
    }

    /// True while no outbound message has gone out for the current attempt.
    pub fn is_pre_send(&self) -> bool {
        matches!(self, OutreachStatus::Idle | OutreachStatus::Pending)
    }

    /// Display-only progress percentage. Derived on read, never stored.
    pub fn progress(&self) -> u8 {
        match self {
            OutreachStatus::Idle => 0,
            OutreachStatus::Pending => 10,
            OutreachStatus::Sent => 30,
            OutreachStatus::Opened => 60,
            OutreachStatus::MeetingLinkClicked => 80,
            OutreachStatus::MeetingBooked => 100,
            OutreachStatus::Closed => 100,
        }
    }
}

impl std::fmt::Display for OutreachStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutreachStatus::Idle => write!(f, "idle"),
            OutreachStatus::Pending => write!(f, "pending"),
            OutreachStatus::Sent => write!(f, "sent"),
            OutreachStatus::Opened => write!(f, "opened"),
            OutreachStatus::MeetingLinkClicked => write!(f, "meeting_link_clicked"),
            OutreachStatus::MeetingBooked => write!(f, "meeting_booked"),
            OutreachStatus::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Phone,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Email => write!(f, "email"),
            Channel::Sms => write!(f, "sms"),
            Channel::Phone => write!(f, "phone"),
        }
    }
}

pub fn parse_channel(s: &str) -> Result<Channel, String> {
    match s.to_lowercase().as_str() {
        "email" | "e" => Ok(Channel::Email),
        "sms" | "s" => Ok(Channel::Sms),
        "phone" | "call" | "voice" | "p" => Ok(Channel::Phone),
        _ => Err(format!(
            "Invalid channel '{}': expected email, sms, or phone",
            s
        )),
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    PendingApproval,
    Active,
    Paused,
    Completed,
    Archived,
}

impl CampaignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Archived)
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::PendingApproval => write!(f, "pending_approval"),
            CampaignStatus::Active => write!(f, "active"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::Completed => write!(f, "completed"),
            CampaignStatus::Archived => write!(f, "archived"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    EmailSent,
    SmsSent,
    CallStarted,
    CallTranscriptSegment,
    Note,
    Reset,
    Closed,
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityType::EmailSent => write!(f, "email_sent"),
            ActivityType::SmsSent => write!(f, "sms_sent"),
            ActivityType::CallStarted => write!(f, "call_started"),
            ActivityType::CallTranscriptSegment => write!(f, "call_transcript_segment"),
            ActivityType::Note => write!(f, "note"),
            ActivityType::Reset => write!(f, "reset"),
            ActivityType::Closed => write!(f, "closed"),
        }
    }
}

pub fn parse_activity_type(s: &str) -> Result<ActivityType, String> {
    match s.to_lowercase().as_str() {
        "email_sent" => Ok(ActivityType::EmailSent),
        "sms_sent" => Ok(ActivityType::SmsSent),
        "call_started" => Ok(ActivityType::CallStarted),
        "call_transcript_segment" => Ok(ActivityType::CallTranscriptSegment),
        "note" => Ok(ActivityType::Note),
        "reset" => Ok(ActivityType::Reset),
        "closed" => Ok(ActivityType::Closed),
        _ => Err(format!(
            "Invalid activity type '{}': expected email_sent, sms_sent, call_started, call_transcript_segment, note, reset, or closed",
            s
        )),
    }
}

/// Mutations that flow through the coordinator for a single lead.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LeadUpdate {
    MarkPending,
    RecordSend,
    RecordOpen,
    RecordMeetingLinkClicked,
    RecordMeetingBooked,
    AdvanceStage(PipelineStage),
    Close(String),
    Reset,
    SetNotes(String),
    SetEmail(Option<String>),
    SetPhone(Option<String>),
}

// --- Structs ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Lead {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub stage: PipelineStage,
    #[serde(default)]
    pub outreach_status: OutreachStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_booked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    /// Bumped on every mutation; used for optimistic claims.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(id: &str, name: &str, email: Option<String>, phone: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            email,
            phone,
            stage: PipelineStage::Identify,
            outreach_status: OutreachStatus::Idle,
            sent_at: None,
            opened_at: None,
            meeting_booked_at: None,
            notes: String::new(),
            pool_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress(&self) -> u8 {
        self.outreach_status.progress()
    }

    pub(crate) fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Activity {
    pub lead_id: String,
    pub activity_type: ActivityType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Activity {
    pub fn new(lead_id: &str, activity_type: ActivityType) -> Self {
        Self {
            lead_id: lead_id.to_string(),
            activity_type,
            created_at: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct LeadPool {
    pub id: String,
    pub name: String,
    /// Ideal-customer-profile settings; not interpreted by the engine.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub icp: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub members: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub former_members: BTreeSet<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CampaignCounters {
    #[serde(default)]
    pub emails_sent: u64,
    #[serde(default)]
    pub emails_opened: u64,
    #[serde(default)]
    pub sms_sent: u64,
    #[serde(default)]
    pub calls_initiated: u64,
    #[serde(default)]
    pub meetings_booked: u64,
}

impl CampaignCounters {
    /// The increment produced by one successful dispatch on `channel`.
    pub fn for_channel(channel: Channel) -> Self {
        let mut delta = Self::default();
        match channel {
            Channel::Email => delta.emails_sent = 1,
            Channel::Sms => delta.sms_sent = 1,
            Channel::Phone => delta.calls_initiated = 1,
        }
        delta
    }

    pub fn add(&mut self, delta: &CampaignCounters) {
        self.emails_sent += delta.emails_sent;
        self.emails_opened += delta.emails_opened;
        self.sms_sent += delta.sms_sent;
        self.calls_initiated += delta.calls_initiated;
        self.meetings_booked += delta.meetings_booked;
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: CampaignStatus,
    pub channels: BTreeSet<Channel>,
    /// Captured at creation; decides where `submit` lands.
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub counters: CampaignCounters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(id: &str, name: &str, channels: BTreeSet<Channel>, requires_approval: bool) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: CampaignStatus::Draft,
            channels,
            requires_approval,
            counters: CampaignCounters::default(),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One `(lead, channel, payload)` entry of a dispatch batch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DispatchTarget {
    pub lead_id: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl DispatchTarget {
    pub fn new(lead_id: &str, channel: Channel) -> Self {
        Self {
            lead_id: lead_id.to_string(),
            channel,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: &str) -> Self {
        self.payload = Some(payload.to_string());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    Sent,
    Denied,
    GateCheckFailed,
    GatewayFailed,
}

/// Terminal result of one processed target.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DispatchResult {
    pub target: DispatchTarget,
    pub ok: bool,
    pub outcome: TargetOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn sent(target: DispatchTarget, provider_reference: String) -> Self {
        Self {
            target,
            ok: true,
            outcome: TargetOutcome::Sent,
            provider_reference: Some(provider_reference),
            error: None,
        }
    }

    pub fn failed(target: DispatchTarget, outcome: TargetOutcome, error: String) -> Self {
        Self {
            target,
            ok: false,
            outcome,
            provider_reference: None,
            error: Some(error),
        }
    }
}

/// Everything the coordinator persists.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct EngineState {
    pub schema_version: u32,
    #[serde(default)]
    pub leads: BTreeMap<String, Lead>,
    #[serde(default)]
    pub activities: ActivityLedger,
    #[serde(default)]
    pub campaigns: BTreeMap<String, Campaign>,
    #[serde(default)]
    pub pools: PoolRegistry,
    /// Highest numeric suffix ever assigned per ID prefix.
    #[serde(default)]
    pub next_ids: BTreeMap<String, u32>,
}
