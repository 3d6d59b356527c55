//! Stateless delivery operations layered over the registry.
//!
//! Target sets are snapshotted under the read lock and every send happens
//! after the lock is released, so a slow or dead recipient can never stall
//! connect/disconnect of unrelated connections.

use super::message_types::WsOutboundEvent;
use super::{Connection, ConnectionRegistry, RoomId, UserId};

/// Deliver to every open connection of one user, e.g. a cross-device push.
///
/// Returns `false` when the user has no live connections at snapshot time —
/// a delivery miss, not an error.
pub async fn send_to_user(
    registry: &ConnectionRegistry,
    user_id: &UserId,
    event: &WsOutboundEvent,
) -> bool {
    let targets = registry.connections_for_user(user_id).await;
    if targets.is_empty() {
        tracing::debug!(user = %user_id, "user has no live connections, message dropped");
        return false;
    }

    fan_out(registry, targets, event).await;
    true
}

/// Deliver to every connection currently in a room. Same miss contract as
/// `send_to_user`.
pub async fn send_to_room(
    registry: &ConnectionRegistry,
    room_id: &RoomId,
    event: &WsOutboundEvent,
) -> bool {
    let targets = registry.connections_in_room(room_id).await;
    if targets.is_empty() {
        tracing::debug!(room = %room_id, "room has no live connections, message dropped");
        return false;
    }

    fan_out(registry, targets, event).await;
    true
}

/// Best-effort delivery to every registered connection (heartbeats, global
/// system notices).
pub async fn send_to_all(registry: &ConnectionRegistry, event: &WsOutboundEvent) {
    let targets = registry.all_connections().await;
    fan_out(registry, targets, event).await;
}

/// Serialize once, then offer the frame to each target independently.
///
/// A failed send means the receiving session is already gone, so the stale
/// handle is evicted through the normal idempotent unregister path instead
/// of lingering in the indices.
async fn fan_out(registry: &ConnectionRegistry, targets: Vec<Connection>, event: &WsOutboundEvent) {
    let frame = match serde_json::to_string(event) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode outbound frame");
            return;
        }
    };

    let mut stale = Vec::new();
    for connection in targets {
        if connection.send(frame.clone()).is_err() {
            stale.push(connection.id());
        }
    }

    for id in stale {
        tracing::warn!(connection = %id, "send failed, evicting stale connection");
        registry.unregister(id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::message_types::SystemAction;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn chat(sender: &str, content: &str, room: &str) -> WsOutboundEvent {
        WsOutboundEvent::Chat {
            sender: UserId::from(sender),
            content: content.to_string(),
            room_id: RoomId::from(room),
            timestamp: None,
        }
    }

    fn recv_json(rx: &mut UnboundedReceiver<String>) -> Value {
        let frame = rx.try_recv().expect("expected a queued frame");
        serde_json::from_str(&frame).expect("frame is JSON")
    }

    #[tokio::test]
    async fn test_room_fanout_reaches_all_members_and_nobody_else() {
        let registry = ConnectionRegistry::new();
        let (_u1, mut rx1) = registry
            .register(Some(UserId::from("u1")), vec![RoomId::from("r1")])
            .await;
        let (_u2, mut rx2) = registry
            .register(Some(UserId::from("u2")), vec![RoomId::from("r1")])
            .await;
        let (_u3, mut rx3) = registry
            .register(Some(UserId::from("u3")), vec![RoomId::from("r2")])
            .await;

        let delivered = send_to_room(&registry, &RoomId::from("r1"), &chat("u1", "hi", "r1")).await;
        assert!(delivered);

        for rx in [&mut rx1, &mut rx2] {
            let frame = recv_json(rx);
            assert_eq!(frame["type"], "chat");
            assert_eq!(frame["sender"], "u1");
            assert_eq!(frame["content"], "hi");
            assert_eq!(frame["room_id"], "r1");
        }
        assert!(rx3.try_recv().is_err(), "other rooms must not receive");
    }

    #[tokio::test]
    async fn test_send_to_user_reaches_every_device() {
        let registry = ConnectionRegistry::new();
        let (_phone, mut rx1) = registry.register(Some(UserId::from("u1")), Vec::new()).await;
        let (_laptop, mut rx2) = registry.register(Some(UserId::from("u1")), Vec::new()).await;

        let event = WsOutboundEvent::Message {
            sender: UserId::from("admin"),
            content: "hello".to_string(),
            timestamp: None,
        };
        assert!(send_to_user(&registry, &UserId::from("u1"), &event).await);

        assert_eq!(recv_json(&mut rx1)["content"], "hello");
        assert_eq!(recv_json(&mut rx2)["content"], "hello");
    }

    #[tokio::test]
    async fn test_send_to_offline_user_is_a_miss() {
        let registry = ConnectionRegistry::new();
        let (_id, mut rx) = registry.register(Some(UserId::from("u1")), Vec::new()).await;

        let event = WsOutboundEvent::Pong;
        assert!(!send_to_user(&registry, &UserId::from("ghost"), &event).await);
        assert!(rx.try_recv().is_err(), "no frames may leak to other users");
    }

    #[tokio::test]
    async fn test_send_to_empty_room_is_a_miss() {
        let registry = ConnectionRegistry::new();
        assert!(!send_to_room(&registry, &RoomId::from("empty"), &WsOutboundEvent::Pong).await);
    }

    #[tokio::test]
    async fn test_send_to_all_includes_anonymous_connections() {
        let registry = ConnectionRegistry::new();
        let (_named, mut rx1) = registry.register(Some(UserId::from("u1")), Vec::new()).await;
        let (_anon, mut rx2) = registry.register(None, Vec::new()).await;

        let event = WsOutboundEvent::Message {
            sender: UserId::from("u1"),
            content: "x".to_string(),
            timestamp: None,
        };
        send_to_all(&registry, &event).await;

        assert_eq!(recv_json(&mut rx1)["type"], "message");
        assert_eq!(recv_json(&mut rx2)["type"], "message");
    }

    #[tokio::test]
    async fn test_failed_send_evicts_stale_connection_without_aborting_fanout() {
        let registry = ConnectionRegistry::new();
        let (dead, rx_dead) = registry
            .register(Some(UserId::from("u1")), vec![RoomId::from("r1")])
            .await;
        let (_live, mut rx_live) = registry
            .register(Some(UserId::from("u2")), vec![RoomId::from("r1")])
            .await;
        drop(rx_dead);

        let delivered =
            send_to_room(&registry, &RoomId::from("r1"), &chat("u2", "still here", "r1")).await;
        assert!(delivered, "a non-empty snapshot counts as delivered");
        assert_eq!(recv_json(&mut rx_live)["content"], "still here");

        // The dead connection was cleaned up through the disconnect path.
        assert_eq!(registry.connection_count().await, 1);
        assert!(registry
            .connections_for_user(&UserId::from("u1"))
            .await
            .is_empty());
        assert!(registry.unregister(dead).await.is_none());
    }

    #[tokio::test]
    async fn test_joins_after_snapshot_do_not_receive_in_flight_message() {
        let registry = ConnectionRegistry::new();
        let (_early, mut rx_early) = registry
            .register(Some(UserId::from("u1")), vec![RoomId::from("r1")])
            .await;

        let snapshot = registry.connections_in_room(&RoomId::from("r1")).await;
        let (_late, mut rx_late) = registry
            .register(Some(UserId::from("u2")), vec![RoomId::from("r1")])
            .await;

        // Deliver against the pre-join snapshot, as the broadcaster does.
        fan_out(&registry, snapshot, &chat("u1", "first", "r1")).await;

        assert_eq!(recv_json(&mut rx_early)["content"], "first");
        assert!(rx_late.try_recv().is_err());

        let event = WsOutboundEvent::System {
            action: SystemAction::Join,
            user_id: UserId::from("u2"),
            room_id: RoomId::from("r1"),
            timestamp: "t".to_string(),
        };
        assert!(send_to_room(&registry, &RoomId::from("r1"), &event).await);
        assert_eq!(recv_json(&mut rx_late)["type"], "system");
    }
}
