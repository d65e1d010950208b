//! services/api/src/web/hub.rs
//!
//! In-memory publish/subscribe fan-out for real-time clients.
//!
//! Channels are named `user:{id}`, `booth:{id}` and `global`. Each channel is
//! a `tokio::sync::broadcast` sender created on first subscribe; publishing to
//! a channel nobody listens on is a no-op.

use crate::web::protocol::ServerMessage;
use async_trait::async_trait;
use boothnow_core::ports::{EventPublisher, SessionEvent};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

pub const GLOBAL_CHANNEL: &str = "global";

pub fn user_channel(user_id: Uuid) -> String {
    format!("user:{}", user_id)
}

pub fn booth_channel(booth_id: Uuid) -> String {
    format!("booth:{}", booth_id)
}

/// Process-wide channel registry shared by every socket connection.
#[derive(Debug)]
pub struct BroadcastHub {
    channels: RwLock<HashMap<String, broadcast::Sender<ServerMessage>>>,
    buffer_size: usize,
}

impl BroadcastHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer_size,
        }
    }

    /// Subscribes to a channel, creating it if needed.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<ServerMessage> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .subscribe()
    }

    /// Sends to every current subscriber. Returns how many received it.
    pub async fn send_to(&self, channel: &str, msg: ServerMessage) -> usize {
        let channels = self.channels.read().await;
        match channels.get(channel) {
            Some(tx) => tx.send(msg).unwrap_or(0),
            None => 0,
        }
    }

    /// Drops channels whose last receiver has gone away.
    pub async fn prune(&self) {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        let dropped = before - channels.len();
        if dropped > 0 {
            debug!("Pruned {} idle channels", dropped);
        }
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventPublisher for BroadcastHub {
    async fn publish(&self, event: SessionEvent) {
        match event {
            SessionEvent::BoothAvailabilityChanged {
                booth_id,
                available,
            } => {
                self.send_to(
                    &booth_channel(booth_id),
                    ServerMessage::availability(booth_id, available),
                )
                .await;
            }
            SessionEvent::SessionEnded {
                session_id,
                user_id,
                booth_id,
                total_cost,
            } => {
                self.send_to(
                    &user_channel(user_id),
                    ServerMessage::SessionEnded {
                        session_id,
                        message: format!("Session ended. Total charged: {:.2}", total_cost),
                    },
                )
                .await;
                self.send_to(
                    GLOBAL_CHANNEL,
                    ServerMessage::availability(booth_id, true),
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn booth_events_reach_only_booth_subscribers() {
        let hub = BroadcastHub::default();
        let booth_id = Uuid::new_v4();
        let mut booth_rx = hub.subscribe(&booth_channel(booth_id)).await;
        let mut other_rx = hub.subscribe(&booth_channel(Uuid::new_v4())).await;

        EventPublisher::publish(
            &hub,
            SessionEvent::BoothAvailabilityChanged {
                booth_id,
                available: false,
            },
        )
        .await;

        assert_eq!(
            booth_rx.recv().await.unwrap(),
            ServerMessage::availability(booth_id, false)
        );
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_end_notifies_the_user_and_the_global_channel() {
        let hub = BroadcastHub::default();
        let (session_id, user_id, booth_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut user_rx = hub.subscribe(&user_channel(user_id)).await;
        let mut global_rx = hub.subscribe(GLOBAL_CHANNEL).await;

        EventPublisher::publish(
            &hub,
            SessionEvent::SessionEnded {
                session_id,
                user_id,
                booth_id,
                total_cost: 7.5,
            },
        )
        .await;

        match user_rx.recv().await.unwrap() {
            ServerMessage::SessionEnded { session_id: id, message } => {
                assert_eq!(id, session_id);
                assert!(message.contains("7.50"));
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(
            global_rx.recv().await.unwrap(),
            ServerMessage::availability(booth_id, true)
        );
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_a_no_op() {
        let hub = BroadcastHub::default();
        let delivered = hub
            .send_to("user:nobody", ServerMessage::Joined { room: "x".into() })
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn prune_drops_channels_without_receivers() {
        let hub = BroadcastHub::default();
        let rx = hub.subscribe("booth:a").await;
        let _kept = hub.subscribe("booth:b").await;
        assert_eq!(hub.channel_count().await, 2);

        drop(rx);
        hub.prune().await;
        assert_eq!(hub.channel_count().await, 1);
    }
}
