use serde::Serialize;

use super::error::TransportError;
use super::transport::Connection;

/// The hub `Subscribe` invocation, serialized as
/// `{"H":<hub>,"M":"Subscribe","A":[[<topic>]],"I":1}`.
#[derive(Debug, Serialize)]
pub struct SubscribeFrame<'a> {
    #[serde(rename = "H")]
    hub: &'a str,
    #[serde(rename = "M")]
    method: &'static str,
    #[serde(rename = "A")]
    args: [[&'a str; 1]; 1],
    #[serde(rename = "I")]
    invocation_id: u32,
}

impl<'a> SubscribeFrame<'a> {
    /// Builds the subscribe frame for a single topic.
    pub fn new(hub: &'a str, topic: &'a str) -> Self {
        Self {
            hub,
            method: "Subscribe",
            args: [[topic]],
            invocation_id: 1,
        }
    }
}

/// Sends the subscribe frame on a freshly opened connection.
///
/// Called exactly once per connection by the supervisor, before any frame is read.
pub async fn subscribe<C: Connection>(
    connection: &mut C,
    hub: &str,
    topic: &str,
) -> Result<(), TransportError> {
    let frame = serde_json::to_string(&SubscribeFrame::new(hub, topic))?;
    log::debug!("Sending subscribe frame: {}", frame);
    connection.send_text(frame).await?;
    log::info!("Subscribed to {}", topic);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_matches_hub_wire_shape() {
        let frame = serde_json::to_string(&SubscribeFrame::new("Streaming", "RaceControlMessages"))
            .unwrap();
        assert_eq!(
            frame,
            r#"{"H":"Streaming","M":"Subscribe","A":[["RaceControlMessages"]],"I":1}"#
        );
    }
}
