use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::Channel;

/// Per-channel rate limiter for gateway calls.
///
/// Successive calls on one channel are spaced by at least `interval`,
/// measured from slot to slot. Shared between batches via `Arc`, so two
/// batches on the same channel queue behind each other.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<HashMap<Channel, Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next slot on `channel` and sleep until it opens.
    ///
    /// Returns `false` if `cancel` fires before the slot opens. The slot stays
    /// consumed in that case; later callers are spaced from it as well.
    pub async fn wait(&self, channel: Channel, cancel: &CancellationToken) -> bool {
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match next_slot.get(&channel) {
                Some(&reserved) if reserved > now => reserved,
                _ => now,
            };
            next_slot.insert(channel, slot + self.interval);
            slot
        };

        if cancel.is_cancelled() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(slot) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
