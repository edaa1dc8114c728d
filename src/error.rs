use crate::types::{CampaignStatus, Channel, OutreachStatus};

/// Engine error taxonomy.
///
/// Categories:
/// - Per-target: GateDenied, GateCheckFailed, GatewayFailure, ConcurrentModification.
///   Recorded in the batch result log, never abort a batch.
/// - Batch construction: CampaignNotActive, TerminalStateError, PoolHasNoCampaign,
///   EmptyBatch, ChannelNotEnabled. Surfaced before any gateway call.
/// - Caller misuse: InvalidTransition, InvalidInput, *NotFound.
/// - Infrastructure: Storage, CoordinatorUnavailable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("Gate denied {channel} for lead {lead_id}: {reason}")]
    GateDenied {
        lead_id: String,
        channel: Channel,
        reason: String,
    },

    #[error("gate-check-failed for lead {lead_id}: {reason}")]
    GateCheckFailed { lead_id: String, reason: String },

    #[error("Gateway failure for lead {lead_id}: {reason}")]
    GatewayFailure { lead_id: String, reason: String },

    #[error("Campaign {campaign_id} is not active (status: {status})")]
    CampaignNotActive {
        campaign_id: String,
        status: CampaignStatus,
    },

    #[error("Campaign {campaign_id} is in terminal state {status}")]
    TerminalStateError {
        campaign_id: String,
        status: CampaignStatus,
    },

    #[error("Concurrent modification of lead {lead_id}")]
    ConcurrentModification { lead_id: String },

    #[error("Lead not found: {0}")]
    LeadNotFound(String),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("Pool {0} has no assigned campaign")]
    PoolHasNoCampaign(String),

    #[error("Batch has no targets")]
    EmptyBatch,

    #[error("Channel {channel} is not enabled for campaign {campaign_id}")]
    ChannelNotEnabled {
        campaign_id: String,
        channel: Channel,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),
}

impl EngineError {
    pub fn invalid_status_transition(id: &str, from: OutreachStatus, to: OutreachStatus) -> Self {
        EngineError::InvalidTransition {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true if the error is transient and the operation may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::GateCheckFailed { .. } | EngineError::CoordinatorUnavailable(_)
        )
    }

    /// Returns true if the error stops a batch before any gateway call is made.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::CampaignNotActive { .. }
                | EngineError::TerminalStateError { .. }
                | EngineError::PoolHasNoCampaign(_)
                | EngineError::PoolNotFound(_)
                | EngineError::CampaignNotFound(_)
                | EngineError::EmptyBatch
                | EngineError::ChannelNotEnabled { .. }
        )
    }

    /// Version conflicts are reported like a policy denial for that target.
    pub fn counts_as_denial(&self) -> bool {
        matches!(
            self,
            EngineError::GateDenied { .. } | EngineError::ConcurrentModification { .. }
        )
    }
}

/// Transitional bridge: allows `?` to convert `EngineError` to `String` in the
/// CLI handlers, which report errors as plain messages.
impl From<EngineError> for String {
    fn from(err: EngineError) -> String {
        err.to_string()
    }
}
