//! In-process remote collection driven by a [`ChannelFeed`].

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::{Notification, RemoteCollection, Subscription};
use crate::errors::AppError;
use crate::models::RawDocument;

#[derive(Default)]
struct FeedState {
    last: Option<Vec<RawDocument>>,
    subscribers: Vec<mpsc::UnboundedSender<Notification>>,
}

fn lock(state: &Mutex<FeedState>) -> MutexGuard<'_, FeedState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collection whose snapshots are pushed by a [`ChannelFeed`].
#[derive(Clone)]
pub struct ChannelCollection {
    state: Arc<Mutex<FeedState>>,
}

/// Producer side of a [`ChannelCollection`].
#[derive(Clone)]
pub struct ChannelFeed {
    state: Arc<Mutex<FeedState>>,
}

impl ChannelCollection {
    pub fn new() -> (Self, ChannelFeed) {
        let state = Arc::new(Mutex::new(FeedState::default()));
        (
            Self {
                state: state.clone(),
            },
            ChannelFeed { state },
        )
    }
}

impl RemoteCollection for ChannelCollection {
    fn name(&self) -> String {
        "in-process feed".to_string()
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        if let Some(last) = &state.last {
            // Receiver is alive, send cannot fail.
            let _ = tx.send(Ok(last.clone()));
        }
        state.subscribers.push(tx);
        Subscription::new(rx)
    }
}

impl ChannelFeed {
    /// Deliver a full snapshot to every subscriber and remember it for new ones.
    pub fn push(&self, docs: Vec<RawDocument>) {
        let mut state = lock(&self.state);
        state
            .subscribers
            .retain(|tx| tx.send(Ok(docs.clone())).is_ok());
        state.last = Some(docs);
    }

    /// Deliver an error. Like a snapshot listener, the subscriptions end with it.
    pub fn fail(&self, error: AppError) {
        let mut state = lock(&self.state);
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// End every subscription without an error.
    pub fn close(&self) {
        lock(&self.state).subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = lock(&self.state);
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}
