//! In-process notifications about data-source provisioning.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// A data source was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceCreated {
    pub org_id: i64,
    pub uid: String,
    pub name: String,
}

/// Fan-out bus for [`DataSourceCreated`] events.
///
/// Cloning shares the channel. Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DataSourceCreated>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish an event; returns how many subscribers received it.
    pub fn publish(&self, event: DataSourceCreated) -> usize {
        trace!(org_id = event.org_id, uid = %event.uid, "data source created");
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DataSourceCreated> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn created(name: &str) -> DataSourceCreated {
        DataSourceCreated {
            org_id: 1,
            uid: format!("uid-{name}"),
            name: name.to_owned(),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        assert_eq!(EventBus::new().publish(created("a")), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_later_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.clone().publish(created("a")), 1);
        assert_eq!(rx.recv().await.unwrap().name, "a");
    }
}
