//! Typed publish/subscribe bus shared by every component of a session.
//!
//! Channels are a closed enum and every payload is a variant of [`Event`],
//! so a publisher and a subscriber can never disagree about a payload shape.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::sandbox::{SandboxState, ServerReady};
use crate::tools::ToolCallApproval;

const DEFAULT_CAPACITY: usize = 256;

/// Named channels on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    AppEdited,
    EditorTabChange,
    SourceCodeOpen,
    PreviewPathChange,
    RefreshPreview,
    ToolCallApproval,
    RuntimeError,
    SandboxState,
    ServerReady,
    SaveRequested,
    DiscardRequested,
}

/// Payloads, one variant per channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `true` when buffers hold unsaved edits, `false` once clean again.
    AppEdited(bool),
    EditorTabChange {
        focus: Option<String>,
        opened: Vec<String>,
    },
    /// An inspector asked to show source; hosts switch to the edit view.
    SourceCodeOpen(String),
    PreviewPathChange(String),
    RefreshPreview,
    ToolCallApproval(ToolCallApproval),
    /// Current advisory runtime error, `None` when cleared.
    RuntimeError(Option<String>),
    SandboxState(SandboxState),
    ServerReady(ServerReady),
    SaveRequested,
    DiscardRequested,
}

impl Event {
    pub fn channel(&self) -> Channel {
        match self {
            Self::AppEdited(_) => Channel::AppEdited,
            Self::EditorTabChange { .. } => Channel::EditorTabChange,
            Self::SourceCodeOpen(_) => Channel::SourceCodeOpen,
            Self::PreviewPathChange(_) => Channel::PreviewPathChange,
            Self::RefreshPreview => Channel::RefreshPreview,
            Self::ToolCallApproval(_) => Channel::ToolCallApproval,
            Self::RuntimeError(_) => Channel::RuntimeError,
            Self::SandboxState(_) => Channel::SandboxState,
            Self::ServerReady(_) => Channel::ServerReady,
            Self::SaveRequested => Channel::SaveRequested,
            Self::DiscardRequested => Channel::DiscardRequested,
        }
    }
}

/// Cloneable handle to the bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns how many subscribers were live.
    pub fn publish(&self, event: Event) -> usize {
        let channel = event.channel();
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(?channel, "Event published with no subscribers");
                0
            }
        }
    }

    /// Subscribe to the listed channels only.
    pub fn subscribe(&self, channels: &[Channel]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            channels: channels.to_vec(),
        }
    }

    /// Subscribe to every channel.
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(&[])
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A filtered view of the bus.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    channels: Vec<Channel>,
}

impl Subscription {
    fn wants(&self, event: &Event) -> bool {
        self.channels.is_empty() || self.channels.contains(&event.channel())
    }

    /// Wait for the next matching event. `None` once every bus handle is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Everything matching that is queued right now.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscription_filters_by_channel() {
        let bus = EventBus::new();
        let mut edits = bus.subscribe(&[Channel::AppEdited]);

        bus.publish(Event::RefreshPreview);
        bus.publish(Event::AppEdited(true));

        assert_eq!(edits.recv().await, Some(Event::AppEdited(true)));
        assert_eq!(edits.try_recv(), None);
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Event::SaveRequested), 0);
    }

    #[test]
    fn subscribe_all_sees_every_channel() {
        let bus = EventBus::new();
        let mut all = bus.subscribe_all();

        bus.publish(Event::PreviewPathChange("/about".to_string()));
        bus.publish(Event::RuntimeError(None));

        assert_eq!(
            all.drain(),
            vec![
                Event::PreviewPathChange("/about".to_string()),
                Event::RuntimeError(None),
            ]
        );
    }

    #[test]
    fn every_event_reports_its_own_channel() {
        assert_eq!(Event::DiscardRequested.channel(), Channel::DiscardRequested);
        assert_eq!(
            Event::EditorTabChange {
                focus: None,
                opened: vec![]
            }
            .channel(),
            Channel::EditorTabChange
        );
    }
}
