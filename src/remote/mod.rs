//! Remote document collections the mirror can subscribe to.
//!
//! A subscription is a stream of notifications; each one is either the full
//! current snapshot of the collection or an error that ends the subscription.

mod channel;
mod firestore;

pub use channel::*;
pub use firestore::*;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::AppError;
use crate::models::RawDocument;

/// One change notification from a remote collection.
pub type Notification = Result<Vec<RawDocument>, AppError>;

/// A live subscription. Dropping it stops any task feeding it.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Notification>,
    feeder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Notification>) -> Self {
        Self { rx, feeder: None }
    }

    /// Subscription fed by a background task that is aborted on drop.
    pub fn with_feeder(rx: mpsc::UnboundedReceiver<Notification>, feeder: JoinHandle<()>) -> Self {
        Self {
            rx,
            feeder: Some(feeder),
        }
    }

    /// Next notification, or `None` once the remote side has closed.
    pub async fn next(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

/// A remote collection of blood request documents.
pub trait RemoteCollection: Send + Sync + 'static {
    /// Human readable name for logs.
    fn name(&self) -> String;

    /// Open a new subscription. The first notification is the current snapshot.
    fn subscribe(&self) -> Subscription;
}
