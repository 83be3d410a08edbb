use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{ServiceDay, Year};

const CHANNEL_CAPACITY: usize = 256;

/// Sent after a claim commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimCompleted {
    pub employee_id: Ulid,
    pub employee_name: String,
    pub employee_email: String,
    pub service_id: Ulid,
    pub service_name: String,
    pub year: Year,
    /// Earliest slot of the service, if it has any days.
    pub first_day: Option<ServiceDay>,
}

/// Fire-and-forget broadcast hub: one channel per employee plus a firehose.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<ClaimCompleted>>,
    all: broadcast::Sender<ClaimCompleted>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one employee's notifications. Creates the channel if needed.
    pub fn subscribe(&self, employee_id: Ulid) -> broadcast::Receiver<ClaimCompleted> {
        self.channels
            .entry(employee_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to every notification (e.g. a mail relay).
    pub fn subscribe_all(&self) -> broadcast::Receiver<ClaimCompleted> {
        self.all.subscribe()
    }

    /// Never blocks; no-op if nobody is listening.
    pub fn send(&self, note: &ClaimCompleted) {
        if let Some(sender) = self.channels.get(&note.employee_id) {
            let _ = sender.send(note.clone());
        }
        let _ = self.all.send(note.clone());
    }

    /// Drop an employee's channel (e.g. on deactivation).
    pub fn remove(&self, employee_id: &Ulid) {
        self.channels.remove(employee_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(employee_id: Ulid) -> ClaimCompleted {
        ClaimCompleted {
            employee_id,
            employee_name: "Ana".into(),
            employee_email: "ana@example.com".into(),
            service_id: Ulid::new(),
            service_name: "S1".into(),
            year: 2024,
            first_day: None,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_own_notifications() {
        let hub = NotifyHub::new();
        let eid = Ulid::new();
        let mut rx = hub.subscribe(eid);
        let mut all = hub.subscribe_all();

        let n = note(eid);
        hub.send(&n);

        assert_eq!(rx.recv().await.unwrap(), n);
        assert_eq!(all.recv().await.unwrap(), n);
    }

    #[tokio::test]
    async fn other_employees_do_not_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Ulid::new());
        hub.send(&note(Ulid::new()));
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let eid = Ulid::new();
        hub.send(&note(eid));
        hub.remove(&eid);
    }
}
