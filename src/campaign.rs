use chrono::Utc;

use crate::error::EngineError;
use crate::types::{Campaign, CampaignCounters, CampaignStatus};

/// Operations on a campaign's lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CampaignAction {
    /// Leave Draft: Active directly, or PendingApproval when approval is required.
    Submit,
    Approve,
    Reject(String),
    Pause,
    Resume,
    Complete,
    Archive,
}

impl std::fmt::Display for CampaignAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignAction::Submit => write!(f, "submit"),
            CampaignAction::Approve => write!(f, "approve"),
            CampaignAction::Reject(_) => write!(f, "reject"),
            CampaignAction::Pause => write!(f, "pause"),
            CampaignAction::Resume => write!(f, "resume"),
            CampaignAction::Complete => write!(f, "complete"),
            CampaignAction::Archive => write!(f, "archive"),
        }
    }
}

/// Resolve the target status of `action` from `status`.
///
/// Pure: returns `None` when the action is not legal from `status`.
pub fn next_status(
    status: CampaignStatus,
    action: &CampaignAction,
    requires_approval: bool,
) -> Option<CampaignStatus> {
    use CampaignStatus::*;

    match (status, action) {
        (Draft, CampaignAction::Submit) if requires_approval => Some(PendingApproval),
        (Draft, CampaignAction::Submit) => Some(Active),
        (PendingApproval, CampaignAction::Approve) => Some(Active),
        (PendingApproval, CampaignAction::Reject(_)) => Some(Draft),
        (Active, CampaignAction::Pause) => Some(Paused),
        (Paused, CampaignAction::Resume) => Some(Active),
        (Active | Paused, CampaignAction::Complete) => Some(Completed),
        (Active | Paused, CampaignAction::Archive) => Some(Archived),
        _ => None,
    }
}

/// Apply a lifecycle action to a campaign in place.
///
/// - Any action from Completed or Archived fails with `TerminalStateError`
/// - Reject needs a non-empty reason and clears the counters
/// - Other illegal actions fail with `InvalidTransition`
pub fn apply_action(campaign: &mut Campaign, action: CampaignAction) -> Result<(), EngineError> {
    if campaign.status.is_terminal() {
        return Err(EngineError::TerminalStateError {
            campaign_id: campaign.id.clone(),
            status: campaign.status,
        });
    }

    if let CampaignAction::Reject(ref reason) = action {
        if reason.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "rejecting a campaign requires a reason".to_string(),
            ));
        }
    }

    let to = next_status(campaign.status, &action, campaign.requires_approval).ok_or_else(
        || EngineError::InvalidTransition {
            id: campaign.id.clone(),
            from: campaign.status.to_string(),
            to: action.to_string(),
        },
    )?;

    match action {
        CampaignAction::Reject(reason) => {
            campaign.rejection_reason = Some(reason);
            campaign.counters = CampaignCounters::default();
        }
        CampaignAction::Approve => {
            campaign.rejection_reason = None;
        }
        _ => {}
    }

    campaign.status = to;
    campaign.updated_at = Utc::now();
    Ok(())
}

/// Only Active campaigns may originate new dispatch batches.
pub fn ensure_can_start_batch(campaign: &Campaign) -> Result<(), EngineError> {
    if campaign.status == CampaignStatus::Active {
        Ok(())
    } else {
        Err(EngineError::CampaignNotActive {
            campaign_id: campaign.id.clone(),
            status: campaign.status,
        })
    }
}

/// Add `delta` to the campaign's counters. Counters never decrease here.
pub fn increment_counters(campaign: &mut Campaign, delta: &CampaignCounters) {
    campaign.counters.add(delta);
    campaign.updated_at = Utc::now();
}

pub fn reset_counters(campaign: &mut Campaign) {
    campaign.counters = CampaignCounters::default();
    campaign.updated_at = Utc::now();
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::types::Channel;

    fn campaign(status: CampaignStatus, requires_approval: bool) -> Campaign {
        let mut c = Campaign::new(
            "CMP-001",
            "Spring",
            BTreeSet::from([Channel::Email]),
            requires_approval,
        );
        c.status = status;
        c
    }

    #[test]
    fn submit_without_approval_goes_active() {
        let mut c = campaign(CampaignStatus::Draft, false);
        apply_action(&mut c, CampaignAction::Submit).unwrap();
        assert_eq!(c.status, CampaignStatus::Active);
    }

    #[test]
    fn submit_with_approval_goes_pending() {
        let mut c = campaign(CampaignStatus::Draft, true);
        apply_action(&mut c, CampaignAction::Submit).unwrap();
        assert_eq!(c.status, CampaignStatus::PendingApproval);
        apply_action(&mut c, CampaignAction::Approve).unwrap();
        assert_eq!(c.status, CampaignStatus::Active);
    }

    #[test]
    fn reject_needs_reason_and_resets_counters() {
        let mut c = campaign(CampaignStatus::PendingApproval, true);
        c.counters.emails_sent = 4;
        assert!(matches!(
            apply_action(&mut c, CampaignAction::Reject(String::new())),
            Err(EngineError::InvalidInput(_))
        ));
        assert_eq!(c.status, CampaignStatus::PendingApproval);

        apply_action(&mut c, CampaignAction::Reject("missing unsubscribe link".into())).unwrap();
        assert_eq!(c.status, CampaignStatus::Draft);
        assert_eq!(c.counters, CampaignCounters::default());
        assert_eq!(c.rejection_reason.as_deref(), Some("missing unsubscribe link"));
    }

    #[test]
    fn pause_and_resume_toggle() {
        let mut c = campaign(CampaignStatus::Active, false);
        apply_action(&mut c, CampaignAction::Pause).unwrap();
        assert_eq!(c.status, CampaignStatus::Paused);
        apply_action(&mut c, CampaignAction::Resume).unwrap();
        assert_eq!(c.status, CampaignStatus::Active);
    }

    #[test]
    fn terminal_states_reject_everything() {
        for status in [CampaignStatus::Completed, CampaignStatus::Archived] {
            let mut c = campaign(status, false);
            for action in [
                CampaignAction::Submit,
                CampaignAction::Resume,
                CampaignAction::Archive,
            ] {
                assert!(matches!(
                    apply_action(&mut c, action),
                    Err(EngineError::TerminalStateError { .. })
                ));
            }
        }
    }

    #[test]
    fn draft_cannot_pause() {
        let mut c = campaign(CampaignStatus::Draft, false);
        assert!(matches!(
            apply_action(&mut c, CampaignAction::Pause),
            Err(EngineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn only_active_can_start_batch() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::PendingApproval,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
            CampaignStatus::Archived,
        ] {
            assert!(matches!(
                ensure_can_start_batch(&campaign(status, false)),
                Err(EngineError::CampaignNotActive { .. })
            ));
        }
        assert!(ensure_can_start_batch(&campaign(CampaignStatus::Active, false)).is_ok());
    }
}
