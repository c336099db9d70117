//! State change notifications
//!
//! Events are published after the inventory change they describe has been
//! committed. Each subscriber has a bounded buffer; a subscriber that falls
//! further behind loses the oldest events rather than slowing the engine.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::installer::InstallPhase;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Installed {
        version: String,
    },
    InstallFailed {
        version: String,
        reason: String,
    },
    Uninstalled {
        version: String,
    },
    DefaultChanged {
        previous: Option<String>,
        current: Option<String>,
    },
    CatalogRefreshed,
    /// Transient install progress; never describes a committed change
    Progress {
        version: String,
        phase: InstallPhase,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    /// Strictly increasing per notifier
    pub sequence: u64,
    pub candidate: String,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
}

pub struct ChangeNotifier {
    sender: broadcast::Sender<StateChangeEvent>,
    sequence: AtomicU64,
}

impl ChangeNotifier {
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Deliver an event to every current subscriber
    pub fn publish(&self, candidate: &str, kind: EventKind) {
        let event = StateChangeEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            candidate: candidate.to_string(),
            at: Utc::now(),
            kind,
        };
        // Publishing with no subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A stream of events published after the subscription was created
pub struct Subscription {
    receiver: broadcast::Receiver<StateChangeEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Next event, or `None` once cancelled or the engine is gone
    pub async fn next(&mut self) -> Option<StateChangeEvent> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                received = self.receiver.recv() => received,
            };

            match received {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber fell behind; dropped {} oldest events", skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Notifier closed");
                    return None;
                }
            }
        }
    }

    /// Token that ends this subscription when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_stream(self) -> impl Stream<Item = StateChangeEvent> {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|event| (event, subscription))
        })
    }
}
