use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::campaign;
use crate::config::DispatchConfig;
use crate::coordinator::CoordinatorHandle;
use crate::error::EngineError;
use crate::gate::{self, GateSnapshot};
use crate::gateway::{self, ChannelGateway};
use crate::pacer::Pacer;
use crate::types::{DispatchResult, DispatchTarget, TargetOutcome};
use crate::{log_debug, log_info, log_warn};

// --- Public types ---

/// Bounded, most-recent-first record of processed targets.
#[derive(Debug, Clone)]
pub struct ResultLog {
    capacity: usize,
    entries: VecDeque<DispatchResult>,
}

impl ResultLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a result at the front, evicting the oldest entry when full.
    pub fn push(&mut self, result: DispatchResult) {
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(result);
    }

    pub fn entries(&self) -> impl Iterator<Item = &DispatchResult> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn into_vec(self) -> Vec<DispatchResult> {
        self.entries.into()
    }
}

/// A validated batch, ready to run. Built by `prepare_batch`.
#[derive(Debug)]
pub struct DispatchBatch {
    pub id: String,
    pub pool_id: String,
    pub campaign_id: String,
    pub targets: Vec<DispatchTarget>,
    cancel: CancellationToken,
}

impl DispatchBatch {
    /// Token that stops the batch before its next target.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Completed,
    Cancelled,
}

/// Result of a batch run, returned to the caller for summary display.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch_id: String,
    pub total: usize,
    pub processed: usize,
    pub ok: usize,
    pub denied: usize,
    pub failed: usize,
    pub halt_reason: HaltReason,
    /// Most recent first, bounded by the result log capacity.
    pub results: Vec<DispatchResult>,
}

/// Tunables for one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    pub result_log_capacity: usize,
    pub gate_check_retries: u32,
    pub gate_retry_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl DispatchSettings {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            result_log_capacity: config.result_log_capacity,
            gate_check_retries: config.gate_check_retries,
            gate_retry_backoff: config.gate_retry_backoff(),
        }
    }
}

// --- Batch construction ---

/// Validate a batch against `pool_id` and its campaign.
///
/// Fails before any gateway call when the pool has no campaign, the campaign
/// is not Active, there are no targets, or a target uses a channel the
/// campaign does not enable.
pub async fn prepare_batch(
    coordinator: &CoordinatorHandle,
    pool_id: &str,
    targets: Vec<DispatchTarget>,
) -> Result<DispatchBatch, EngineError> {
    let campaign = coordinator
        .pool_campaign(pool_id)
        .await?
        .ok_or_else(|| EngineError::PoolHasNoCampaign(pool_id.to_string()))?;

    campaign::ensure_can_start_batch(&campaign)?;

    if targets.is_empty() {
        return Err(EngineError::EmptyBatch);
    }

    if let Some(target) = targets
        .iter()
        .find(|t| !campaign.channels.contains(&t.channel))
    {
        return Err(EngineError::ChannelNotEnabled {
            campaign_id: campaign.id.clone(),
            channel: target.channel,
        });
    }

    Ok(DispatchBatch {
        id: format!("batch-{}-{}", pool_id, Utc::now().format("%Y%m%dT%H%M%S%3f")),
        pool_id: pool_id.to_string(),
        campaign_id: campaign.id,
        targets,
        cancel: CancellationToken::new(),
    })
}

// --- Batch execution ---

enum TargetStep {
    Done(DispatchResult),
    Cancelled,
}

/// Process every target of `batch` in order, one gateway call at a time.
///
/// Per-target failures are recorded and never stop the batch. Cancellation is
/// checked before each target and during the pacing wait; targets already
/// dispatched stay dispatched.
pub async fn run_batch<G: ChannelGateway>(
    batch: DispatchBatch,
    coordinator: &CoordinatorHandle,
    gateway: &G,
    pacer: &Pacer,
    settings: &DispatchSettings,
) -> BatchSummary {
    let total = batch.targets.len();
    let mut log = ResultLog::new(settings.result_log_capacity);
    let (mut ok, mut denied, mut failed) = (0, 0, 0);
    let mut processed = 0;
    let mut halt_reason = HaltReason::Completed;

    log_info!(
        "[{}] Batch started: {} target(s), pool {}, campaign {}",
        batch.id,
        total,
        batch.pool_id,
        batch.campaign_id
    );

    for target in &batch.targets {
        if batch.cancel.is_cancelled() {
            halt_reason = HaltReason::Cancelled;
            break;
        }

        let step = process_target(&batch, target, coordinator, gateway, pacer, settings).await;
        let result = match step {
            TargetStep::Done(result) => result,
            TargetStep::Cancelled => {
                halt_reason = HaltReason::Cancelled;
                break;
            }
        };

        match result.outcome {
            TargetOutcome::Sent => ok += 1,
            TargetOutcome::Denied => denied += 1,
            TargetOutcome::GateCheckFailed | TargetOutcome::GatewayFailed => failed += 1,
        }
        processed += 1;
        log.push(result);
    }

    if halt_reason == HaltReason::Cancelled {
        log_info!(
            "[{}] Batch cancelled after {}/{} target(s)",
            batch.id,
            processed,
            total
        );
    }
    log_info!(
        "[{}] Batch finished: {} ok, {} denied, {} failed",
        batch.id,
        ok,
        denied,
        failed
    );

    BatchSummary {
        batch_id: batch.id,
        total,
        processed,
        ok,
        denied,
        failed,
        halt_reason,
        results: log.into_vec(),
    }
}

async fn process_target<G: ChannelGateway>(
    batch: &DispatchBatch,
    target: &DispatchTarget,
    coordinator: &CoordinatorHandle,
    gateway: &G,
    pacer: &Pacer,
    settings: &DispatchSettings,
) -> TargetStep {
    let lead_id = target.lead_id.as_str();

    let snapshot = match check_gate(batch, target, coordinator, settings).await {
        GateStep::Allowed(snapshot) => snapshot,
        GateStep::Finished(result) => return TargetStep::Done(result),
        GateStep::Cancelled => return TargetStep::Cancelled,
    };

    if let Err(e) = coordinator.claim_lead(lead_id, snapshot.lead.version).await {
        log_info!("[{}][{}] Claim refused: {}", batch.id, lead_id, e);
        let outcome = if e.counts_as_denial() {
            TargetOutcome::Denied
        } else {
            TargetOutcome::GateCheckFailed
        };
        return TargetStep::Done(DispatchResult::failed(target.clone(), outcome, e.to_string()));
    }

    if !pacer.wait(target.channel, &batch.cancel).await {
        release(batch, coordinator, lead_id).await;
        return TargetStep::Cancelled;
    }

    log_debug!("[{}][{}] Calling gateway ({})", batch.id, lead_id, target.channel);
    let sent = gateway::deliver(gateway, &snapshot.lead, target.channel, target.payload.as_deref()).await;

    let reference = match sent {
        Ok(reference) => reference,
        Err(e) => {
            release(batch, coordinator, lead_id).await;
            let err = EngineError::GatewayFailure {
                lead_id: lead_id.to_string(),
                reason: e.to_string(),
            };
            log_warn!("[{}][{}] {}", batch.id, lead_id, err);
            return TargetStep::Done(DispatchResult::failed(
                target.clone(),
                TargetOutcome::GatewayFailed,
                err.to_string(),
            ));
        }
    };

    match coordinator
        .complete_dispatch(lead_id, &batch.campaign_id, target.channel, &reference)
        .await
    {
        Ok(_) => {
            log_info!(
                "[{}][{}] Sent via {} (ref {})",
                batch.id,
                lead_id,
                target.channel,
                reference
            );
            TargetStep::Done(DispatchResult::sent(target.clone(), reference))
        }
        Err(e) => {
            // The provider accepted the request; only the bookkeeping failed.
            log_warn!(
                "[{}][{}] Sent (ref {}) but failed to record: {}",
                batch.id,
                lead_id,
                reference,
                e
            );
            let mut result = DispatchResult::failed(
                target.clone(),
                TargetOutcome::GatewayFailed,
                format!("sent but not recorded: {}", e),
            );
            result.provider_reference = Some(reference);
            TargetStep::Done(result)
        }
    }
}

enum GateStep {
    Allowed(GateSnapshot),
    Finished(DispatchResult),
    Cancelled,
}

/// Run the gate for one target, retrying inconclusive checks with exponential backoff.
async fn check_gate(
    batch: &DispatchBatch,
    target: &DispatchTarget,
    coordinator: &CoordinatorHandle,
    settings: &DispatchSettings,
) -> GateStep {
    let lead_id = target.lead_id.as_str();
    let mut backoff = settings.gate_retry_backoff;
    let mut attempt = 0;

    loop {
        let err = match gate::authorize(coordinator, lead_id, target.channel).await {
            Ok(snapshot) => return GateStep::Allowed(snapshot),
            Err(err) => err,
        };

        if err.is_retryable() && attempt < settings.gate_check_retries {
            attempt += 1;
            log_debug!(
                "[{}][{}] {}, retry {} in {:?}",
                batch.id,
                lead_id,
                err,
                attempt,
                backoff
            );
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = batch.cancel.cancelled() => return GateStep::Cancelled,
            }
            backoff = backoff.saturating_mul(2);
            continue;
        }

        let outcome = if err.counts_as_denial() {
            log_info!("[{}][{}] {}", batch.id, lead_id, err);
            TargetOutcome::Denied
        } else {
            log_warn!("[{}][{}] {}", batch.id, lead_id, err);
            TargetOutcome::GateCheckFailed
        };
        return GateStep::Finished(DispatchResult::failed(
            target.clone(),
            outcome,
            err.to_string(),
        ));
    }
}

async fn release(batch: &DispatchBatch, coordinator: &CoordinatorHandle, lead_id: &str) {
    if let Err(e) = coordinator.release_lead(lead_id).await {
        log_warn!("[{}][{}] Failed to release lead: {}", batch.id, lead_id, e);
    }
}

// --- Concurrent batches ---

/// A batch running on its own task.
pub struct BatchHandle {
    pub batch_id: String,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Request cooperative cancellation. The batch stops before its next target.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<BatchSummary, tokio::task::JoinError> {
        self.join.await
    }
}

/// Run `batch` on a new tokio task. Independent batches progress concurrently
/// and share `pacer`, so per-channel pacing holds across all of them.
pub fn spawn_batch<G: ChannelGateway + 'static>(
    batch: DispatchBatch,
    coordinator: CoordinatorHandle,
    gateway: Arc<G>,
    pacer: Arc<Pacer>,
    settings: DispatchSettings,
) -> BatchHandle {
    let batch_id = batch.id.clone();
    let cancel = batch.cancel_token();
    let join = tokio::spawn(async move {
        run_batch(batch, &coordinator, gateway.as_ref(), pacer.as_ref(), &settings).await
    });
    BatchHandle {
        batch_id,
        cancel,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Channel;

    fn result(lead_id: &str) -> DispatchResult {
        DispatchResult::sent(DispatchTarget::new(lead_id, Channel::Email), "ref".to_string())
    }

    #[test]
    fn result_log_is_most_recent_first() {
        let mut log = ResultLog::new(10);
        log.push(result("LEAD-001"));
        log.push(result("LEAD-002"));
        let ids: Vec<_> = log.entries().map(|r| r.target.lead_id.as_str()).collect();
        assert_eq!(ids, vec!["LEAD-002", "LEAD-001"]);
    }

    #[test]
    fn result_log_evicts_oldest_at_capacity() {
        let mut log = ResultLog::new(2);
        log.push(result("LEAD-001"));
        log.push(result("LEAD-002"));
        log.push(result("LEAD-003"));
        assert_eq!(log.len(), 2);
        let ids: Vec<_> = log.entries().map(|r| r.target.lead_id.as_str()).collect();
        assert_eq!(ids, vec!["LEAD-003", "LEAD-002"]);
    }

    #[test]
    fn result_log_capacity_is_at_least_one() {
        let log = ResultLog::new(0);
        assert_eq!(log.capacity(), 1);
        assert!(log.is_empty());
    }
}
