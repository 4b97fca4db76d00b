//! # Startup Filter
//!
//! Final stage of the per-item pipeline. Every raw item goes through the
//! injected `Transform`; records stamped before the epoch's startup cutoff are
//! backlog replayed by the hub on (re)subscribe and are dropped; the rest are
//! folded into state by the `Consumer`, and state changes are handed to the
//! `StatePublisher`.
//!
//! Collaborators are trusted for nothing: an error or a panic while handling
//! one item is logged and the next item is processed as usual.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::{Map, Value};

use super::demux::RawItem;
use super::epoch::ConnectionEpoch;
use super::error::CollaboratorError;

/// Attributes accompanying a published state.
pub type Attributes = Map<String, Value>;

/// A record produced by a `Transform`.
pub trait NormalizedRecord: Send {
    /// When the underlying event happened.
    fn timestamp(&self) -> anyhow::Result<DateTime<Utc>>;
}

/// Turns raw feed items into domain records.
pub trait Transform: Send + Sync {
    /// The record type produced.
    type Record: NormalizedRecord;

    /// Returns `Ok(None)` for items that are not relevant to the consumer.
    fn transform(
        &self,
        raw: &RawItem,
        epoch_start: DateTime<Utc>,
    ) -> impl Future<Output = anyhow::Result<Option<Self::Record>>> + Send;
}

/// Outcome of folding one record into application state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateChange {
    /// The new state, when it changed.
    pub state: Option<String>,
    /// Attributes to publish with the state.
    pub attributes: Attributes,
}

impl StateChange {
    /// No new state.
    pub fn unchanged(attributes: Attributes) -> Self {
        Self {
            state: None,
            attributes,
        }
    }

    /// A new state to publish.
    pub fn changed(state: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            state: Some(state.into()),
            attributes,
        }
    }
}

/// Folds records into application state.
pub trait Consumer<R>: Send + Sync {
    /// Applies one record.
    fn apply(&self, record: R) -> impl Future<Output = anyhow::Result<StateChange>> + Send;
}

/// Publishes state changes to the host.
pub trait StatePublisher: Send + Sync {
    /// Called only when `Consumer::apply` reported a new state.
    fn publish(
        &self,
        state: &str,
        attributes: &Attributes,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Receives every raw item of a connection together with its epoch.
pub trait ItemSink: Send + Sync {
    /// Handles one item. Must not fail: errors are dealt with inside.
    fn handle(&self, item: RawItem, epoch: &ConnectionEpoch) -> impl Future<Output = ()> + Send;
}

/// What happened to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The transform declined it.
    Irrelevant,
    /// Stamped before the startup cutoff.
    Backlog,
    /// Applied without a state change.
    Applied,
    /// Applied and the new state was published.
    Published(String),
}

/// Backlog suppression in front of the injected collaborators.
pub struct StartupFilter<T, K, P> {
    transform: Arc<T>,
    consumer: Arc<K>,
    publisher: Arc<P>,
}

impl<T, K, P> StartupFilter<T, K, P>
where
    T: Transform,
    K: Consumer<T::Record>,
    P: StatePublisher,
{
    /// Wraps the three collaborators.
    pub fn new(transform: Arc<T>, consumer: Arc<K>, publisher: Arc<P>) -> Self {
        Self {
            transform,
            consumer,
            publisher,
        }
    }

    /// Runs one item through transform, cutoff check, apply and publish.
    pub async fn process(
        &self,
        item: &RawItem,
        epoch: &ConnectionEpoch,
    ) -> Result<Outcome, CollaboratorError> {
        let record = self
            .transform
            .transform(item, epoch.started_at())
            .await
            .map_err(CollaboratorError::Transform)?;
        let Some(record) = record else {
            return Ok(Outcome::Irrelevant);
        };

        let timestamp = record.timestamp().map_err(CollaboratorError::Timestamp)?;
        if epoch.is_backlog(timestamp) {
            log::debug!(
                "Dropping backlog item from {} (cutoff {})",
                timestamp,
                epoch.startup_cutoff()
            );
            return Ok(Outcome::Backlog);
        }

        let change = self
            .consumer
            .apply(record)
            .await
            .map_err(CollaboratorError::Apply)?;

        match change.state {
            None => Ok(Outcome::Applied),
            Some(state) => {
                self.publisher
                    .publish(&state, &change.attributes)
                    .await
                    .map_err(CollaboratorError::Publish)?;
                Ok(Outcome::Published(state))
            }
        }
    }
}

impl<T, K, P> ItemSink for StartupFilter<T, K, P>
where
    T: Transform,
    K: Consumer<T::Record>,
    P: StatePublisher,
{
    async fn handle(&self, item: RawItem, epoch: &ConnectionEpoch) {
        let result = AssertUnwindSafe(self.process(&item, epoch))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => log::trace!("Item handled: {:?}", outcome),
            Ok(Err(e)) => log::warn!("Feed item dropped: {} (item: {})", e, item),
            Err(panic) => log::warn!(
                "Feed item dropped: {} (item: {})",
                CollaboratorError::Panicked(panic_message(panic.as_ref())),
                item
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
