use tokio::sync::broadcast;

use crate::dto::events::EventEnvelope;

/// Broadcast hub fanning room events out to every SSE stream and player socket.
///
/// A single channel carries all rooms; subscribers filter on `room_id`. Slow
/// receivers lag and skip rather than block the round controller.
pub struct EventHub {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn publish(&self, envelope: EventEnvelope) {
        let _ = self.sender.send(envelope);
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::dto::{events::BattleEvent, phase::VisiblePhase};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = EventHub::new(4);
        let mut rx = hub.subscribe();
        assert_eq!(hub.receiver_count(), 1);

        hub.publish(EventEnvelope {
            room_id: Uuid::nil(),
            phase: VisiblePhase::Waiting,
            question_index: None,
            revision: 0,
            event: BattleEvent::AnswerAccepted {
                user_id: "alice".into(),
                question_id: "q1".into(),
            },
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.name(), "answer_accepted");
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let hub = EventHub::new(1);
        hub.publish(EventEnvelope {
            room_id: Uuid::nil(),
            phase: VisiblePhase::Complete,
            question_index: None,
            revision: 3,
            event: BattleEvent::BattleComplete {
                standings: Vec::new(),
            },
        });
    }
}
