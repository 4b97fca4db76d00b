use std::time::Duration;

use serde_json::json;

/// Exponential reconnect delay settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// First delay after a failed attempt, and the value the delay resets to
    /// after every successful connect.
    pub floor: Duration,
    /// Upper bound for the delay.
    pub ceiling: Duration,
    /// Multiplier applied after each consecutive failure.
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(1000),
            ceiling: Duration::from_millis(60000),
            factor: 2.0,
        }
    }
}

/// Configuration for the live timing hub connection.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// HTTP endpoint handing out connection tokens.
    pub negotiate_url: String,
    /// Websocket endpoint the token is presented to.
    pub connect_url: String,
    /// Hub named in `connectionData` and in the subscribe frame.
    pub hub_name: String,
    /// Topic subscribed to once per connection.
    pub topic: String,
    /// Hub method carrying incremental updates.
    pub feed_method: String,
    /// SignalR protocol version sent as `clientProtocol`.
    pub client_protocol: String,
    pub user_agent: String,
    pub accept_encoding: String,
    /// Items stamped earlier than `connect time - startup_grace` are backlog.
    pub startup_grace: Duration,
    pub backoff: BackoffConfig,
    /// Reconnect when no frame at all arrives for this long. `None` disables the watchdog.
    pub inactivity_timeout: Option<Duration>,
    /// Per-request timeout for the negotiation call.
    pub negotiate_timeout: Duration,
    /// Transient HTTP retries inside a single negotiation attempt. With the
    /// default of 0 every failed response is reported to the supervisor, which
    /// owns the backoff between attempts.
    pub negotiate_max_retries: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            negotiate_url: "https://livetiming.formula1.com/signalr/negotiate".to_string(),
            connect_url: "wss://livetiming.formula1.com/signalr/connect".to_string(),
            hub_name: "Streaming".to_string(),
            topic: "RaceControlMessages".to_string(),
            feed_method: "feed".to_string(),
            client_protocol: "1.5".to_string(),
            user_agent: "BestHTTP".to_string(),
            accept_encoding: "gzip,identity".to_string(),
            startup_grace: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            negotiate_timeout: Duration::from_secs(10),
            negotiate_max_retries: 0,
        }
    }
}

impl HubConfig {
    /// The `connectionData` descriptor, e.g. `[{"name":"Streaming"}]`.
    pub fn connection_data(&self) -> String {
        json!([{ "name": self.hub_name }]).to_string()
    }
}
