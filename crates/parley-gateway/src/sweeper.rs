use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_types::events::GatewayEvent;
use parley_types::models::{DeliveryStatus, Message};

use crate::error::ChatError;
use crate::registry::Delivery;
use crate::service::ChatService;

/// Background task that releases scheduled messages once they are due.
///
/// Runs on an interval until `shutdown` fires. A failed tick is logged and
/// the next tick simply tries again; nothing is ever marked failed here.
pub async fn run_sweeper_loop(service: ChatService, interval: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => {
                debug!("Sweeper stopping");
                return;
            }
        }

        match service.sweep_scheduled(Utc::now()).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweeper: released {} scheduled message(s)", count);
                }
            }
            Err(e) => {
                warn!("Sweeper error: {}", e);
            }
        }
    }
}

impl ChatService {
    /// One sweep: promote every message due at `now` and broadcast it.
    ///
    /// The store's conditional `scheduled -> delivered` update is the only
    /// gate, so concurrent sweeps (or several processes sharing the store)
    /// release each message exactly once. Returns how many this call released.
    pub async fn sweep_scheduled(&self, now: DateTime<Utc>) -> Result<usize, ChatError> {
        let batch = self.config().sweep_batch;
        let due = self
            .db(move |db| db.due_scheduled_messages(now, batch))
            .await?;

        let mut released = 0;
        for message in due {
            let (tenant_id, message_id) = (message.tenant_id, message.id);
            match self.db(move |db| db.promote_scheduled(tenant_id, message_id)).await {
                Ok(true) => {
                    self.release(message).await;
                    released += 1;
                }
                Ok(false) => debug!("Message {} already released elsewhere", message_id),
                Err(e) => warn!("Message {} stays scheduled until the next sweep: {}", message_id, e),
            }
        }
        Ok(released)
    }

    /// Broadcast a freshly promoted message and let its sender know.
    async fn release(&self, mut message: Message) {
        message.delivery_status = DeliveryStatus::Delivered;
        message.scheduled_delivery = None;

        let (tenant_id, conversation_id) = (message.tenant_id, message.conversation_id);
        let recipients: Vec<_> = match self
            .db(move |db| db.participant_ids(tenant_id, conversation_id))
            .await
        {
            Ok(members) => members.into_iter().filter(|id| *id != message.sender_id).collect(),
            Err(e) => {
                // Already delivered in the store; history is the backstop.
                warn!("Recipients of {} unavailable, skipping live delivery: {}", message.id, e);
                vec![]
            }
        };

        let delivered = self.fan_out(&message, &recipients).await;
        debug!(
            "Scheduled message {} released to {}/{} live recipient(s)",
            message.id,
            delivered.len(),
            recipients.len()
        );

        let notice = GatewayEvent::ScheduledMessageDelivered {
            message_id: message.id,
            conversation_id,
            delivered_at: Utc::now(),
        };
        if let Delivery::Evicted(departed) = self.registry().send(message.tenant_id, message.sender_id, notice).await {
            self.announce_departures(vec![departed]).await;
        }
    }
}
