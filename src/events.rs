//! PaymentReceive log reader

use crate::gateway::StoreGateway;
use crate::types::PaymentEvent;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Reads payment events from a start block onward, either as a full history
/// or incrementally.
pub struct PaymentFeed<G: StoreGateway> {
    gateway: Arc<G>,
    from_block: u64,
    /// Last block already delivered by [`poll`](Self::poll)
    cursor: Mutex<Option<u64>>,
}

impl<G: StoreGateway> PaymentFeed<G> {
    pub fn new(gateway: Arc<G>, from_block: u64) -> Self {
        Self {
            gateway,
            from_block,
            cursor: Mutex::new(None),
        }
    }

    pub fn from_block(&self) -> u64 {
        self.from_block
    }

    /// Every payment since the start block, oldest first
    pub async fn history(&self) -> Result<Vec<PaymentEvent>> {
        let mut events = self.gateway.payment_events(self.from_block).await?;
        events.sort_by_key(PaymentEvent::ordering_key);
        Ok(events)
    }

    /// Payments in blocks not yet delivered by an earlier poll
    pub async fn poll(&self) -> Result<Vec<PaymentEvent>> {
        let mut cursor = self.cursor.lock().await;
        let start = cursor.map_or(self.from_block, |last| last + 1);

        let latest = self.gateway.latest_block().await?;
        if latest < start {
            return Ok(Vec::new());
        }

        let mut events: Vec<PaymentEvent> = self
            .gateway
            .payment_events(start)
            .await?
            .into_iter()
            .filter(|e| e.ordering_key().0 <= latest)
            .collect();
        events.sort_by_key(PaymentEvent::ordering_key);

        *cursor = Some(latest);
        debug!(start, latest, count = events.len(), "polled payment events");
        Ok(events)
    }
}

impl<G: StoreGateway + 'static> PaymentFeed<G> {
    /// Poll every `interval` on a background task and forward new events.
    ///
    /// The task stops once the receiver is dropped. Poll errors are logged
    /// and retried on the next tick.
    pub fn watch(self: Arc<Self>, interval: Duration) -> mpsc::Receiver<PaymentEvent> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    break;
                }
                let events = match self.poll().await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "payment event poll failed");
                        continue;
                    }
                };
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });
        rx
    }
}
