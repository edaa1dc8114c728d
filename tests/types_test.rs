use outreach_engine::types::*;

// --- OutreachStatus ---

const ALL_STATUSES: [OutreachStatus; 7] = [
    OutreachStatus::Idle,
    OutreachStatus::Pending,
    OutreachStatus::Sent,
    OutreachStatus::Opened,
    OutreachStatus::MeetingLinkClicked,
    OutreachStatus::MeetingBooked,
    OutreachStatus::Closed,
];

#[test]
fn closed_is_absorbing() {
    for to in ALL_STATUSES {
        assert!(
            !OutreachStatus::Closed.is_valid_transition(&to),
            "closed -> {} should be invalid",
            to
        );
    }
}

#[test]
fn every_open_status_can_close() {
    for from in ALL_STATUSES.iter().filter(|s| **s != OutreachStatus::Closed) {
        assert!(from.is_valid_transition(&OutreachStatus::Closed));
    }
}

#[test]
fn statuses_never_move_backwards() {
    for (i, from) in ALL_STATUSES[..6].iter().enumerate() {
        for to in &ALL_STATUSES[..=i] {
            assert!(
                !from.is_valid_transition(to),
                "{} -> {} should be invalid",
                from,
                to
            );
        }
    }
}

#[test]
fn only_idle_and_pending_are_pre_send() {
    let pre_send: Vec<_> = ALL_STATUSES.iter().filter(|s| s.is_pre_send()).collect();
    assert_eq!(pre_send, vec![&OutreachStatus::Idle, &OutreachStatus::Pending]);
}

#[test]
fn progress_mapping() {
    let progress: Vec<u8> = ALL_STATUSES.iter().map(|s| s.progress()).collect();
    assert_eq!(progress, vec![0, 10, 30, 60, 80, 100, 100]);
}

// --- PipelineStage ---

#[test]
fn stages_are_ordered() {
    assert!(PipelineStage::Identify < PipelineStage::EngageAi);
    assert!(PipelineStage::Finalizing < PipelineStage::Closed);
    assert!(PipelineStage::Identify.can_advance_to(&PipelineStage::Offering));
    assert!(!PipelineStage::Offering.can_advance_to(&PipelineStage::EngageAi));
    assert!(!PipelineStage::Offering.can_advance_to(&PipelineStage::Closed));
}

#[test]
fn parse_helpers_accept_known_values() {
    assert_eq!(parse_pipeline_stage("engage-ai").unwrap(), PipelineStage::EngageAi);
    assert!(parse_pipeline_stage("won").is_err());
    assert_eq!(parse_channel("CALL").unwrap(), Channel::Phone);
    assert!(parse_channel("fax").is_err());
    assert_eq!(
        parse_activity_type("call_transcript_segment").unwrap(),
        ActivityType::CallTranscriptSegment
    );
    assert!(parse_activity_type("tweet").is_err());
}

// --- Serialization ---

#[test]
fn enums_serialize_snake_case() {
    assert_eq!(
        serde_json::to_string(&OutreachStatus::MeetingLinkClicked).unwrap(),
        "\"meeting_link_clicked\""
    );
    assert_eq!(
        serde_json::to_string(&CampaignStatus::PendingApproval).unwrap(),
        "\"pending_approval\""
    );
    assert_eq!(
        serde_json::to_string(&ActivityType::EmailSent).unwrap(),
        "\"email_sent\""
    );
}

#[test]
fn lead_omits_empty_optionals() {
    let lead = Lead::new("LEAD-001", "Ada", None, None);
    let json = serde_json::to_value(&lead).unwrap();
    assert!(json.get("email").is_none());
    assert!(json.get("sent_at").is_none());
    assert_eq!(json["outreach_status"], "idle");
}

#[test]
fn counters_for_channel() {
    assert_eq!(CampaignCounters::for_channel(Channel::Email).emails_sent, 1);
    assert_eq!(CampaignCounters::for_channel(Channel::Sms).sms_sent, 1);
    let call = CampaignCounters::for_channel(Channel::Phone);
    assert_eq!(call.calls_initiated, 1);
    assert_eq!(call.emails_sent, 0);
}
