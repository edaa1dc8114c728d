use crate::coordinator::CoordinatorHandle;
use crate::error::EngineError;
use crate::types::{Channel, Lead};

/// Outcome of a gate check.
///
/// `Denied` is a hard stop for this attempt. `Unknown` means the inputs could
/// not be read and the check may be retried with backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied(String),
    Unknown(String),
}

/// Everything a gate decision reads, captured in one coordinator step.
#[derive(Debug, Clone, PartialEq)]
pub struct GateSnapshot {
    pub lead: Lead,
    /// Whether the ledger holds at least one `email_sent` for the lead.
    pub email_sent: bool,
    /// Campaign assigned to the lead's active pool.
    pub pool_campaign_id: Option<String>,
}

/// `+` followed by 1-15 digits, the first of which is 1-9.
pub fn is_valid_e164(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    let len = digits.len();
    (1..=15).contains(&len)
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Pure gate predicate over a snapshot.
///
/// - Phone: needs a prior `email_sent` and a valid E.164 number
/// - Email: needs a pre-send status, a campaign on the lead's pool, and an address
/// - Sms: needs a pre-send status, a campaign on the lead's pool, and a valid E.164 number
pub fn evaluate(snapshot: &GateSnapshot, channel: Channel) -> GateDecision {
    let lead = &snapshot.lead;

    match channel {
        Channel::Phone => {
            if !snapshot.email_sent {
                return GateDecision::Denied(
                    "voice contact requires a prior email_sent activity".to_string(),
                );
            }
            check_phone(lead)
        }
        Channel::Email => {
            if let Some(denied) = check_pre_send(snapshot) {
                return denied;
            }
            match non_empty(&lead.email) {
                Some(_) => GateDecision::Allowed,
                None => GateDecision::Denied("lead has no email address".to_string()),
            }
        }
        Channel::Sms => {
            if let Some(denied) = check_pre_send(snapshot) {
                return denied;
            }
            check_phone(lead)
        }
    }
}

fn check_phone(lead: &Lead) -> GateDecision {
    match non_empty(&lead.phone) {
        None => GateDecision::Denied("lead has no phone number".to_string()),
        Some(phone) if !is_valid_e164(phone) => {
            GateDecision::Denied(format!("phone number {} is not E.164", phone))
        }
        Some(_) => GateDecision::Allowed,
    }
}

fn check_pre_send(snapshot: &GateSnapshot) -> Option<GateDecision> {
    if !snapshot.lead.outreach_status.is_pre_send() {
        return Some(GateDecision::Denied(format!(
            "outreach status is {}",
            snapshot.lead.outreach_status
        )));
    }
    if snapshot.pool_campaign_id.is_none() {
        return Some(GateDecision::Denied(
            "lead's pool has no assigned campaign".to_string(),
        ));
    }
    None
}

/// Read the current gate inputs for `lead_id` and evaluate them.
///
/// Never mutates state. A missing lead is Denied; any failure to read state is Unknown.
pub async fn can_dial(coordinator: &CoordinatorHandle, lead_id: &str, channel: Channel) -> GateDecision {
    match authorize(coordinator, lead_id, channel).await {
        Ok(_) => GateDecision::Allowed,
        Err(EngineError::GateDenied { reason, .. }) => GateDecision::Denied(reason),
        Err(EngineError::GateCheckFailed { reason, .. }) => GateDecision::Unknown(reason),
        Err(e) => GateDecision::Unknown(e.to_string()),
    }
}

/// Like `can_dial`, but hands back the snapshot the decision was made on.
///
/// A denial is `GateDenied`, an unreadable state is `GateCheckFailed`.
pub async fn authorize(
    coordinator: &CoordinatorHandle,
    lead_id: &str,
    channel: Channel,
) -> Result<GateSnapshot, EngineError> {
    let denied = |reason: String| EngineError::GateDenied {
        lead_id: lead_id.to_string(),
        channel,
        reason,
    };

    let snapshot = match coordinator.gate_snapshot(lead_id).await {
        Ok(snapshot) => snapshot,
        Err(EngineError::LeadNotFound(id)) => return Err(denied(format!("lead {} not found", id))),
        Err(e) => {
            return Err(EngineError::GateCheckFailed {
                lead_id: lead_id.to_string(),
                reason: e.to_string(),
            })
        }
    };

    match evaluate(&snapshot, channel) {
        GateDecision::Allowed => Ok(snapshot),
        GateDecision::Denied(reason) => Err(denied(reason)),
        GateDecision::Unknown(reason) => Err(EngineError::GateCheckFailed {
            lead_id: lead_id.to_string(),
            reason,
        }),
    }
}
