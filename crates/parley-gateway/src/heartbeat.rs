use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::service::ChatService;

/// Pings every registered connection each `interval`; a connection that left
/// the previous ping unanswered is closed and announced offline.
pub async fn run_heartbeat_loop(service: ChatService, interval: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(interval);
    // The first tick completes immediately; skip it so fresh connections get
    // a full interval before their first ping.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => {
                debug!("Heartbeat monitor stopping");
                return;
            }
        }

        let evicted = service.heartbeat_tick().await;
        if evicted > 0 {
            info!("Heartbeat: evicted {} unresponsive connection(s)", evicted);
        }
    }
}

impl ChatService {
    /// One heartbeat round. Returns how many connections were evicted.
    pub async fn heartbeat_tick(&self) -> usize {
        let departed = self.registry().heartbeat_tick().await;
        let count = departed.len();
        for gone in &departed {
            debug!("{} missed a heartbeat (conn {})", gone.user_id, gone.conn_id);
        }
        self.announce_departures(departed).await;
        count
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{Fixture, drain, kinds};
    use parley_types::models::{DeliveryMode, Role};

    #[tokio::test]
    async fn silent_connection_is_evicted_and_treated_as_offline() {
        let fx = Fixture::new();
        let a = fx.user(Role::Employee, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        let conversation = fx.direct(&a, &b).await;

        let a_conn = fx.connect(&a).await;
        let b_conn = fx.connect(&b).await;

        assert_eq!(fx.service.heartbeat_tick().await, 0);
        // Only a answers.
        fx.service.registry().mark_alive(a.user_id, a_conn.conn_id).await;
        assert_eq!(fx.service.heartbeat_tick().await, 1);

        assert!(b_conn.closed.is_cancelled());
        assert!(fx.service.registry().lookup(b.user_id).await.is_none());

        let message = fx
            .service
            .send_message(&a, conversation.id, "still there?".into(), vec![], DeliveryMode::Immediate)
            .await
            .unwrap();

        let (tenant, id) = (fx.tenant_id, message.id);
        let trail = fx.service.db(move |db| db.delivery_queue(tenant, id)).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].status, "pending");
    }

    #[tokio::test]
    async fn eviction_is_announced_to_peers() {
        let fx = Fixture::new();
        let a = fx.user(Role::Employee, "a").await;
        let b = fx.user(Role::Employee, "b").await;
        fx.direct(&a, &b).await;

        let mut a_conn = fx.connect(&a).await;
        let _b_conn = fx.connect(&b).await;
        drain(&mut a_conn.outbound);

        fx.service.heartbeat_tick().await;
        fx.service.registry().mark_alive(a.user_id, a_conn.conn_id).await;
        fx.service.heartbeat_tick().await;

        assert_eq!(kinds(&drain(&mut a_conn.outbound)), vec!["user_status_changed"]);
    }
}
