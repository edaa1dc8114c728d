use chrono::Utc;

use crate::error::EngineError;
use crate::types::{Activity, ActivityType, Channel, Lead, LeadUpdate, OutreachStatus, PipelineStage};

// --- Status transitions ---

fn transition_status(lead: &mut Lead, to: OutreachStatus) -> Result<(), EngineError> {
    if !lead.outreach_status.is_valid_transition(&to) {
        return Err(EngineError::invalid_status_transition(
            &lead.id,
            lead.outreach_status,
            to,
        ));
    }
    lead.outreach_status = to;
    Ok(())
}

/// Raise the stage to `floor` if it is currently earlier. Never lowers it.
fn raise_stage_to(lead: &mut Lead, floor: PipelineStage) {
    if lead.stage < floor {
        lead.stage = floor;
    }
}

/// Idle -> Pending.
pub fn mark_pending(lead: &mut Lead) -> Result<(), EngineError> {
    transition_status(lead, OutreachStatus::Pending)?;
    lead.touch();
    Ok(())
}

/// Idle/Pending -> Sent. Duplicate sends are rejected, not ignored.
pub fn record_send(lead: &mut Lead) -> Result<(), EngineError> {
    if !lead.outreach_status.is_pre_send() {
        return Err(EngineError::invalid_status_transition(
            &lead.id,
            lead.outreach_status,
            OutreachStatus::Sent,
        ));
    }
    transition_status(lead, OutreachStatus::Sent)?;
    lead.sent_at = Some(Utc::now());
    raise_stage_to(lead, PipelineStage::EngageAi);
    lead.touch();
    Ok(())
}

/// Sent -> Opened.
pub fn record_open(lead: &mut Lead) -> Result<(), EngineError> {
    if lead.outreach_status != OutreachStatus::Sent {
        return Err(EngineError::invalid_status_transition(
            &lead.id,
            lead.outreach_status,
            OutreachStatus::Opened,
        ));
    }
    transition_status(lead, OutreachStatus::Opened)?;
    lead.opened_at = Some(Utc::now());
    lead.touch();
    Ok(())
}

/// Sent/Opened -> MeetingLinkClicked.
pub fn record_meeting_link_clicked(lead: &mut Lead) -> Result<(), EngineError> {
    transition_status(lead, OutreachStatus::MeetingLinkClicked)?;
    lead.touch();
    Ok(())
}

/// Sent/Opened/MeetingLinkClicked -> MeetingBooked, stage raised to at least Offering.
///
/// A lead whose stage is already Closed is rejected rather than silently reopened.
pub fn record_meeting_booked(lead: &mut Lead) -> Result<(), EngineError> {
    if lead.stage == PipelineStage::Closed {
        return Err(EngineError::InvalidTransition {
            id: lead.id.clone(),
            from: format!("stage {}", lead.stage),
            to: OutreachStatus::MeetingBooked.to_string(),
        });
    }
    transition_status(lead, OutreachStatus::MeetingBooked)?;
    lead.meeting_booked_at = Some(Utc::now());
    raise_stage_to(lead, PipelineStage::Offering);
    lead.touch();
    Ok(())
}

/// Any non-closed status -> Closed. The reason is kept as a `closed` activity.
pub fn close(lead: &mut Lead, reason: &str) -> Result<Activity, EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::InvalidInput(
            "close requires a reason".to_string(),
        ));
    }
    transition_status(lead, OutreachStatus::Closed)?;
    lead.stage = PipelineStage::Closed;
    lead.touch();
    Ok(Activity::new(&lead.id, ActivityType::Closed).with_meta("reason", reason))
}

/// The only backward transition: back to (Identify, Idle) from any state.
pub fn reset(lead: &mut Lead) -> Activity {
    let activity = Activity::new(&lead.id, ActivityType::Reset)
        .with_meta("from_status", lead.outreach_status.to_string())
        .with_meta("from_stage", lead.stage.to_string());

    lead.outreach_status = OutreachStatus::Idle;
    lead.stage = PipelineStage::Identify;
    lead.sent_at = None;
    lead.opened_at = None;
    lead.meeting_booked_at = None;
    lead.touch();
    activity
}

/// Manual forward stage move.
pub fn advance_stage(lead: &mut Lead, to: PipelineStage) -> Result<(), EngineError> {
    if !lead.stage.can_advance_to(&to) {
        return Err(EngineError::InvalidTransition {
            id: lead.id.clone(),
            from: format!("stage {}", lead.stage),
            to: format!("stage {}", to),
        });
    }
    lead.stage = to;
    lead.touch();
    Ok(())
}

/// Apply the state change for a successful gateway call on `channel` and
/// return the activity that must be appended alongside it.
///
/// Email and SMS are sends (Idle/Pending -> Sent). A call leaves the outreach
/// status alone since it can only follow an email.
pub fn record_dispatch(
    lead: &mut Lead,
    channel: Channel,
    reference: &str,
) -> Result<Activity, EngineError> {
    let activity_type = match channel {
        Channel::Email => {
            record_send(lead)?;
            ActivityType::EmailSent
        }
        Channel::Sms => {
            record_send(lead)?;
            ActivityType::SmsSent
        }
        Channel::Phone => {
            raise_stage_to(lead, PipelineStage::EngageAi);
            lead.touch();
            ActivityType::CallStarted
        }
    };

    Ok(Activity::new(&lead.id, activity_type).with_meta("reference", reference))
}

/// Apply a `LeadUpdate` and return any activities it produced.
pub fn apply_update(lead: &mut Lead, update: LeadUpdate) -> Result<Vec<Activity>, EngineError> {
    match update {
        LeadUpdate::MarkPending => mark_pending(lead)?,
        LeadUpdate::RecordSend => record_send(lead)?,
        LeadUpdate::RecordOpen => record_open(lead)?,
        LeadUpdate::RecordMeetingLinkClicked => record_meeting_link_clicked(lead)?,
        LeadUpdate::RecordMeetingBooked => record_meeting_booked(lead)?,
        LeadUpdate::AdvanceStage(stage) => advance_stage(lead, stage)?,
        LeadUpdate::Close(reason) => return Ok(vec![close(lead, &reason)?]),
        LeadUpdate::Reset => return Ok(vec![reset(lead)]),
        LeadUpdate::SetNotes(notes) => {
            lead.notes = notes;
            lead.touch();
        }
        LeadUpdate::SetEmail(email) => {
            lead.email = email;
            lead.touch();
        }
        LeadUpdate::SetPhone(phone) => {
            lead.phone = phone;
            lead.touch();
        }
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead_with(status: OutreachStatus, stage: PipelineStage) -> Lead {
        let mut lead = Lead::new("LEAD-001", "Ada", Some("ada@example.com".to_string()), None);
        lead.outreach_status = status;
        lead.stage = stage;
        lead
    }

    #[test]
    fn record_send_from_idle_sets_sent_and_timestamp() {
        let mut lead = lead_with(OutreachStatus::Idle, PipelineStage::Identify);
        record_send(&mut lead).unwrap();
        assert_eq!(lead.outreach_status, OutreachStatus::Sent);
        assert!(lead.sent_at.is_some());
        assert_eq!(lead.stage, PipelineStage::EngageAi);
        assert_eq!(lead.version, 1);
    }

    #[test]
    fn record_send_twice_is_rejected() {
        let mut lead = lead_with(OutreachStatus::Pending, PipelineStage::Identify);
        record_send(&mut lead).unwrap();
        let err = record_send(&mut lead).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn record_open_from_idle_fails() {
        let mut lead = lead_with(OutreachStatus::Idle, PipelineStage::Identify);
        let err = record_open(&mut lead).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(lead.outreach_status, OutreachStatus::Idle);
        assert_eq!(lead.version, 0);
    }

    #[test]
    fn record_meeting_booked_raises_stage_to_offering() {
        let mut lead = lead_with(OutreachStatus::Opened, PipelineStage::EngageAi);
        record_meeting_booked(&mut lead).unwrap();
        assert_eq!(lead.outreach_status, OutreachStatus::MeetingBooked);
        assert_eq!(lead.stage, PipelineStage::Offering);
        assert!(lead.meeting_booked_at.is_some());
    }

    #[test]
    fn record_meeting_booked_keeps_later_stage() {
        let mut lead = lead_with(OutreachStatus::Sent, PipelineStage::Finalizing);
        record_meeting_booked(&mut lead).unwrap();
        assert_eq!(lead.stage, PipelineStage::Finalizing);
    }

    #[test]
    fn record_meeting_booked_on_closed_stage_fails() {
        let mut lead = lead_with(OutreachStatus::Sent, PipelineStage::Closed);
        assert!(record_meeting_booked(&mut lead).is_err());
    }

    #[test]
    fn close_requires_reason_and_is_absorbing() {
        let mut lead = lead_with(OutreachStatus::Sent, PipelineStage::EngageAi);
        assert!(matches!(
            close(&mut lead, "  "),
            Err(EngineError::InvalidInput(_))
        ));

        let activity = close(&mut lead, "not interested").unwrap();
        assert_eq!(activity.activity_type, ActivityType::Closed);
        assert_eq!(activity.metadata["reason"], "not interested");
        assert_eq!(lead.outreach_status, OutreachStatus::Closed);
        assert_eq!(lead.stage, PipelineStage::Closed);

        assert!(close(&mut lead, "again").is_err());
        assert!(record_send(&mut lead).is_err());
    }

    #[test]
    fn reset_returns_to_identify_idle_from_closed() {
        let mut lead = lead_with(OutreachStatus::Closed, PipelineStage::Closed);
        lead.sent_at = Some(Utc::now());
        let activity = reset(&mut lead);
        assert_eq!(activity.activity_type, ActivityType::Reset);
        assert_eq!(lead.outreach_status, OutreachStatus::Idle);
        assert_eq!(lead.stage, PipelineStage::Identify);
        assert!(lead.sent_at.is_none());
    }

    #[test]
    fn advance_stage_is_forward_only() {
        let mut lead = lead_with(OutreachStatus::Sent, PipelineStage::Offering);
        assert!(advance_stage(&mut lead, PipelineStage::EngageHuman).is_err());
        assert!(advance_stage(&mut lead, PipelineStage::Closed).is_err());
        advance_stage(&mut lead, PipelineStage::Finalizing).unwrap();
        assert_eq!(lead.stage, PipelineStage::Finalizing);
    }

    #[test]
    fn record_dispatch_phone_keeps_status() {
        let mut lead = lead_with(OutreachStatus::Sent, PipelineStage::Identify);
        let activity = record_dispatch(&mut lead, Channel::Phone, "tx-9").unwrap();
        assert_eq!(activity.activity_type, ActivityType::CallStarted);
        assert_eq!(activity.metadata["reference"], "tx-9");
        assert_eq!(lead.outreach_status, OutreachStatus::Sent);
        assert_eq!(lead.stage, PipelineStage::EngageAi);
    }

    #[test]
    fn apply_update_reset_yields_single_activity() {
        let mut lead = lead_with(OutreachStatus::MeetingBooked, PipelineStage::Offering);
        let activities = apply_update(&mut lead, LeadUpdate::Reset).unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, ActivityType::Reset);
    }
}
