//! # Websocket Transport
//!
//! Opens the persistent hub connection with the credentials from a
//! negotiation and exposes it as a pull-based source of text frames.
//! Heartbeats and binary frames are consumed here and never reach the
//! demultiplexer.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderValue, ACCEPT_ENCODING, COOKIE, USER_AGENT,
};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::config::HubConfig;
use super::error::TransportError;
use super::negotiate::ConnectionCredentials;

/// A live, exclusively owned hub connection.
pub trait Connection: Send {
    /// Waits for the next text frame.
    ///
    /// Resolves to `Ok(None)` once the connection is closed, by either side.
    fn next_frame(&mut self)
        -> impl Future<Output = Result<Option<String>, TransportError>> + Send;

    /// Sends one text frame.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the connection. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Whether the connection has been closed or has ended.
    fn is_closed(&self) -> bool;
}

/// Opens connections from single-use credentials.
pub trait Connect: Send + Sync {
    /// The connection type produced.
    type Connection: Connection;

    /// Performs the websocket handshake, consuming the credentials.
    fn connect(
        &self,
        credentials: ConnectionCredentials,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// Connector for the real `wss://` streaming endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    client_protocol: String,
    connection_data: String,
    user_agent: String,
    accept_encoding: String,
}

impl WsConnector {
    /// Builds a connector from the hub configuration.
    pub fn new(config: &HubConfig) -> Result<Self, TransportError> {
        Ok(Self {
            url: Url::parse(&config.connect_url)?,
            client_protocol: config.client_protocol.clone(),
            connection_data: config.connection_data(),
            user_agent: config.user_agent.clone(),
            accept_encoding: config.accept_encoding.clone(),
        })
    }

    /// Builds the upgrade request: connection parameters in the query string,
    /// client identity and the negotiated cookie as headers.
    pub fn build_request(
        &self,
        credentials: &ConnectionCredentials,
    ) -> Result<Request, TransportError> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("transport", "webSockets")
            .append_pair("clientProtocol", &self.client_protocol)
            .append_pair("connectionToken", &credentials.token)
            .append_pair("connectionData", &self.connection_data);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(TransportError::Handshake)?;

        let headers = request.headers_mut();
        headers.insert(USER_AGENT, header_value("User-Agent", &self.user_agent)?);
        headers.insert(
            ACCEPT_ENCODING,
            header_value("Accept-Encoding", &self.accept_encoding)?,
        );
        if let Some(cookie) = &credentials.cookie {
            headers.insert(COOKIE, header_value("Cookie", cookie)?);
        }

        Ok(request)
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|_| TransportError::Header { name })
}

impl Connect for WsConnector {
    type Connection = WsConnection;

    async fn connect(
        &self,
        credentials: ConnectionCredentials,
    ) -> Result<WsConnection, TransportError> {
        let request = self.build_request(&credentials)?;
        drop(credentials);

        log::info!("Connecting to hub stream: {}", self.url);
        let (stream, response) = connect_async(request)
            .await
            .map_err(TransportError::Handshake)?;
        log::debug!("Hub handshake completed with HTTP {}", response.status());

        Ok(WsConnection {
            stream: Some(stream),
        })
    }
}

/// A tungstenite websocket stream. `None` once closed.
pub struct WsConnection {
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl Connection for WsConnection {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => {
                    log::debug!("Ignoring binary frame ({} bytes)", data.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    log::info!("Hub closed the stream: {:?}", frame);
                    self.stream = None;
                    return Ok(None);
                }
                // Ping, Pong and raw frames. Pongs are queued by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    self.stream = None;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(TransportError::Read(e));
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream
            .send(Message::Text(text.into()))
            .await
            .map_err(TransportError::Send)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                log::debug!("Error while closing hub stream: {}", e);
            }
            log::debug!("Hub stream closed.");
        }
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn credentials(cookie: Option<&str>) -> ConnectionCredentials {
        ConnectionCredentials {
            token: "T1/+=".to_string(),
            cookie: cookie.map(str::to_string),
        }
    }

    fn query_of(request: &Request) -> HashMap<String, String> {
        let url = Url::parse(&request.uri().to_string()).unwrap();
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn request_carries_connection_parameters() {
        let connector = WsConnector::new(&HubConfig::default()).unwrap();
        let request = connector.build_request(&credentials(None)).unwrap();

        let query = query_of(&request);
        assert_eq!(query["transport"], "webSockets");
        assert_eq!(query["clientProtocol"], "1.5");
        assert_eq!(query["connectionToken"], "T1/+=");
        assert_eq!(query["connectionData"], r#"[{"name":"Streaming"}]"#);
        assert_eq!(request.uri().host(), Some("livetiming.formula1.com"));
        assert_eq!(request.uri().path(), "/signalr/connect");
    }

    #[test]
    fn request_carries_identity_and_cookie_headers() {
        let connector = WsConnector::new(&HubConfig::default()).unwrap();

        let request = connector
            .build_request(&credentials(Some("session=xyz")))
            .unwrap();
        assert_eq!(request.headers()[USER_AGENT], "BestHTTP");
        assert_eq!(request.headers()[ACCEPT_ENCODING], "gzip,identity");
        assert_eq!(request.headers()[COOKIE], "session=xyz");

        let request = connector.build_request(&credentials(None)).unwrap();
        assert!(request.headers().get(COOKIE).is_none());
    }

    #[test]
    fn cookie_with_control_characters_is_rejected() {
        let connector = WsConnector::new(&HubConfig::default()).unwrap();
        let err = connector
            .build_request(&credentials(Some("bad\nvalue")))
            .unwrap_err();
        assert!(matches!(err, TransportError::Header { name: "Cookie" }));
    }

    #[tokio::test]
    async fn closed_connection_is_inert() {
        let mut connection = WsConnection { stream: None };
        connection.close().await;
        connection.close().await;

        assert!(connection.is_closed());
        assert!(connection.next_frame().await.unwrap().is_none());
        assert!(matches!(
            connection.send_text("{}".to_string()).await,
            Err(TransportError::Closed)
        ));
    }
}
