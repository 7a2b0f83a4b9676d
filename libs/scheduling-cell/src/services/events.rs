// libs/scheduling-cell/src/services/events.rs
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::{ScheduleEvent, ScheduleEventKind};

const EVENT_BUFFER: usize = 256;

/// Fan-out of schedule changes. Publishing never blocks or fails the caller;
/// slow subscribers lag and skip events.
#[derive(Clone)]
pub struct ScheduleEventBroadcaster {
    sender: broadcast::Sender<ScheduleEvent>,
}

impl Default for ScheduleEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleEventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn publish(&self, doctor_id: Uuid, kind: ScheduleEventKind, subject_id: Option<Uuid>) {
        let event = ScheduleEvent { doctor_id, kind, subject_id, occurred_at: Utc::now() };
        if self.sender.send(event).is_err() {
            debug!("No subscribers for {:?} on doctor {}", kind, doctor_id);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.sender.subscribe()
    }
}
