use crate::coordinator::CoordinatorHandle;
use crate::error::EngineError;
use crate::gate;
use crate::gateway::{self, TestChannelGateway};
use crate::log_info;
use crate::types::Channel;

/// Dry-run one dispatch: gate the lead for `channel`, then send through the
/// sandbox gateway. Returns the sandbox reference.
///
/// Only a `TestChannelGateway` is accepted, so a preview can never reach a
/// real lead. Lead, ledger and campaign state are left untouched.
pub async fn preview_target(
    coordinator: &CoordinatorHandle,
    gateway: &TestChannelGateway,
    lead_id: &str,
    channel: Channel,
    payload: Option<&str>,
) -> Result<String, EngineError> {
    let snapshot = gate::authorize(coordinator, lead_id, channel).await?;

    let reference = gateway::deliver(gateway, &snapshot.lead, channel, payload)
        .await
        .map_err(|e| EngineError::GatewayFailure {
            lead_id: lead_id.to_string(),
            reason: e.to_string(),
        })?;

    log_info!("[preview][{}] {} preview sent (ref {})", lead_id, channel, reference);
    Ok(reference)
}
