use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// User-facing message emitted by the workspace.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "level", content = "message", rename_all = "lowercase")]
pub enum Notification {
    Info(String),
    Warning(String),
    Error(String),
    Success(String),
}

impl Notification {
    pub fn message(&self) -> &str {
        match self {
            Notification::Info(m)
            | Notification::Warning(m)
            | Notification::Error(m)
            | Notification::Success(m) => m,
        }
    }
}

/// Fire-and-forget notification sink.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);

    fn info(&self, message: String) {
        self.notify(Notification::Info(message));
    }

    fn warning(&self, message: String) {
        self.notify(Notification::Warning(message));
    }

    fn error(&self, message: String) {
        self.notify(Notification::Error(message));
    }

    fn success(&self, message: String) {
        self.notify(Notification::Success(message));
    }
}

#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Notifications as a stream; lagged messages are skipped.
    pub fn stream(&self) -> impl Stream<Item = Notification> {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|n| n.ok())
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for NotificationBus {
    fn notify(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_yields_sent_notifications() {
        let bus = NotificationBus::new();
        let stream = bus.stream();
        tokio::pin!(stream);
        bus.warning("cache full".to_string());
        bus.success("done".to_string());
        assert_eq!(
            stream.next().await,
            Some(Notification::Warning("cache full".to_string()))
        );
        assert_eq!(stream.next().await.unwrap().message(), "done");
    }

    #[test]
    fn sending_without_subscribers_is_harmless() {
        let bus = NotificationBus::new();
        bus.error("nobody listening".to_string());
        let mut rx = bus.subscribe();
        bus.info("hello".to_string());
        assert_eq!(rx.try_recv().unwrap(), Notification::Info("hello".to_string()));
    }
}
