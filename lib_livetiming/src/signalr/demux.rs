//! # Frame Demultiplexer
//!
//! The hub delivers race control messages in two different envelopes:
//!
//! - **Incremental**: `{"C":..,"M":[{"H":"Streaming","M":"feed","A":[<topic>, {"Messages": ..}, <ts>]}]}`,
//!   pushed for every update after subscribing.
//! - **Snapshot**: `{"R":{<topic>:{"Messages": ..}},"I":"1"}`, the reply to the
//!   subscribe invocation, which replays recent backlog.
//!
//! In both envelopes `Messages` is either a JSON array or an object keyed by
//! message number. Everything else (keep-alive `{}` frames, other topics,
//! other hub methods) carries nothing for us and is ignored.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{Map, Value};

use super::config::HubConfig;
use super::error::{FrameError, TransportError};
use super::transport::Connection;

/// One feed message, before any semantic interpretation.
pub type RawItem = Value;

/// The two representations of a `Messages` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Messages {
    /// Ordered array of messages.
    List(Vec<RawItem>),
    /// Messages keyed by an arbitrary string (usually the message number).
    /// Iteration order is not guaranteed to reflect arrival order.
    Keyed(Map<String, RawItem>),
}

impl Messages {
    /// Classifies a raw `Messages` value.
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        match value {
            Value::Array(items) => Ok(Messages::List(items)),
            Value::Object(map) => Ok(Messages::Keyed(map)),
            other => Err(FrameError::UnrecognizedShape(kind_of(&other).to_string())),
        }
    }

    /// Flattens into a sequence of items. Lists keep their order, keyed maps
    /// yield their values in an unspecified order.
    pub fn into_items(self) -> Vec<RawItem> {
        match self {
            Messages::List(items) => items,
            Messages::Keyed(map) => map.into_iter().map(|(_, item)| item).collect(),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Extracts raw items for one topic from hub frames.
#[derive(Debug, Clone)]
pub struct FrameDemultiplexer {
    topic: String,
    feed_method: String,
}

impl FrameDemultiplexer {
    pub fn new(topic: impl Into<String>, feed_method: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            feed_method: feed_method.into(),
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.topic.clone(), config.feed_method.clone())
    }

    /// Parses one text frame and returns its items in extraction order.
    ///
    /// # Errors
    /// `FrameError::Parse` when the frame is not JSON. Unrecognized `Messages`
    /// payloads are logged and skipped without failing the frame.
    pub fn demultiplex(&self, frame: &str) -> Result<Vec<RawItem>, FrameError> {
        let payload: Value = serde_json::from_str(frame)?;
        Ok(self.extract(payload))
    }

    /// Extracts items from an already parsed frame body.
    pub fn extract(&self, mut payload: Value) -> Vec<RawItem> {
        let mut items = Vec::new();

        if let Some(entries) = payload.get_mut("M").and_then(Value::as_array_mut) {
            for entry in entries.iter_mut().filter(|entry| self.is_feed_entry(entry)) {
                let messages = entry
                    .get_mut("A")
                    .and_then(|args| args.get_mut(1))
                    .and_then(|update| update.get_mut("Messages"))
                    .map(Value::take);
                self.collect(messages, &mut items);
            }
        } else if let Some(snapshot) = payload
            .get_mut("R")
            .and_then(|result| result.get_mut(self.topic.as_str()))
        {
            let messages = snapshot.get_mut("Messages").map(Value::take);
            self.collect(messages, &mut items);
        }

        items
    }

    fn is_feed_entry(&self, entry: &Value) -> bool {
        entry.get("M").and_then(Value::as_str) == Some(self.feed_method.as_str())
            && entry
                .get("A")
                .and_then(|args| args.get(0))
                .and_then(Value::as_str)
                == Some(self.topic.as_str())
    }

    fn collect(&self, messages: Option<Value>, out: &mut Vec<RawItem>) {
        let Some(messages) = messages else {
            log::warn!("{} update without a Messages field, skipped", self.topic);
            return;
        };
        match Messages::from_value(messages) {
            Ok(messages) => out.extend(messages.into_items()),
            Err(e) => log::warn!("Unknown {} format: {}", self.topic, e),
        }
    }
}

/// Lazy sequence of raw items read from one connection.
///
/// Finite and not restartable: once the connection ends (or fails) every
/// further call yields `Ok(None)`. A reconnect builds a new stream.
pub struct ItemStream<'a, C: Connection> {
    connection: &'a mut C,
    demux: &'a FrameDemultiplexer,
    pending: VecDeque<RawItem>,
    idle_timeout: Option<Duration>,
    frames: u64,
    finished: bool,
}

impl<'a, C: Connection> ItemStream<'a, C> {
    pub fn new(
        connection: &'a mut C,
        demux: &'a FrameDemultiplexer,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connection,
            demux,
            pending: VecDeque::new(),
            idle_timeout,
            frames: 0,
            finished: false,
        }
    }

    /// Returns the next item, reading further frames as needed.
    ///
    /// Items of one frame are all returned before the next frame is read.
    /// Malformed frames are skipped.
    pub async fn next_item(&mut self) -> Result<Option<RawItem>, TransportError> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Ok(Some(item));
            }
            if self.finished {
                return Ok(None);
            }

            let frame = match self.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            };

            self.frames += 1;
            log::trace!("Stream payload {}: {}", self.frames, frame);

            match self.demux.demultiplex(&frame) {
                Ok(items) => self.pending.extend(items),
                Err(e) => log::debug!("Skipping frame {}: {}", self.frames, e),
            }
        }
    }

    /// Number of frames read so far.
    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    async fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.connection.next_frame())
                .await
                .map_err(|_| TransportError::Idle(limit))?,
            None => self.connection.next_frame().await,
        }
    }
}
