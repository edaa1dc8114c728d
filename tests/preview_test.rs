mod common;

use outreach_engine::error::EngineError;
use outreach_engine::gateway::TestChannelGateway;
use outreach_engine::preview::preview_target;
use outreach_engine::types::{ActivityType, Channel, OutreachStatus};

fn sandbox() -> TestChannelGateway {
    TestChannelGateway::new(
        Some("qa@example.com".to_string()),
        Some("+15550000000".to_string()),
    )
}

#[tokio::test]
async fn preview_goes_to_test_destination_and_changes_nothing() {
    let env = common::spawn_env();
    let (pool_id, campaign_id) = common::active_pool(&env.handle, &[Channel::Email]).await;
    let ids = common::populate_pool(&env.handle, &pool_id, 1).await;
    let before = env.handle.get_snapshot().await.unwrap();

    let gateway = sandbox();
    let reference = preview_target(&env.handle, &gateway, &ids[0], Channel::Email, Some("Hi Lead1"))
        .await
        .unwrap();
    assert_eq!(reference, "test-1");

    let outbox = gateway.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].to, "qa@example.com");
    assert_eq!(outbox[0].lead_id, ids[0]);
    assert_eq!(outbox[0].content.as_deref(), Some("Hi Lead1"));

    let after = env.handle.get_snapshot().await.unwrap();
    assert_eq!(before, after);
    let lead = env.handle.get_lead(&ids[0]).await.unwrap();
    assert_eq!(lead.outreach_status, OutreachStatus::Idle);
    let sent = env
        .handle
        .query_activities(&ids[0], Some(ActivityType::EmailSent))
        .await
        .unwrap();
    assert!(sent.is_empty());
    let campaign = env.handle.get_campaign(&campaign_id).await.unwrap();
    assert_eq!(campaign.counters.emails_sent, 0);
}

#[tokio::test]
async fn preview_respects_the_gate() {
    let env = common::spawn_env();
    let (pool_id, _) = common::active_pool(&env.handle, &[Channel::Email, Channel::Phone]).await;
    let ids = common::populate_pool(&env.handle, &pool_id, 1).await;

    let gateway = sandbox();
    let err = preview_target(&env.handle, &gateway, &ids[0], Channel::Phone, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::GateDenied { .. }));
    assert!(gateway.outbox().await.is_empty());
}

#[tokio::test]
async fn preview_without_test_destination_fails() {
    let env = common::spawn_env();
    let (pool_id, _) = common::active_pool(&env.handle, &[Channel::Sms]).await;
    let ids = common::populate_pool(&env.handle, &pool_id, 1).await;

    let gateway = TestChannelGateway::new(Some("qa@example.com".to_string()), None);
    let err = preview_target(&env.handle, &gateway, &ids[0], Channel::Sms, Some("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::GatewayFailure { .. }));
}
