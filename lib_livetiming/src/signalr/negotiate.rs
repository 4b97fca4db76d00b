//! # Hub Negotiation
//!
//! The first half of every connection attempt. A plain HTTP `GET` against the
//! negotiation endpoint returns a JSON body with the `ConnectionToken` the
//! websocket handshake must present, and usually a session cookie the server
//! expects to see again on the connect request.

use std::fmt;
use std::future::Future;

use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use super::config::HubConfig;
use super::error::NegotiationError;

/// Token and cookie handed out by one negotiation.
///
/// Not `Clone`: moved into exactly one connect attempt.
pub struct ConnectionCredentials {
    /// Opaque connection token.
    pub token: String,
    /// `Cookie` header value built from the negotiation `Set-Cookie` headers.
    pub cookie: Option<String>,
}

impl fmt::Debug for ConnectionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredentials")
            .field("token", &"<redacted>")
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Anything able to produce fresh credentials.
pub trait Negotiate: Send + Sync {
    /// Performs one negotiation round trip.
    fn negotiate(
        &self,
    ) -> impl Future<Output = Result<ConnectionCredentials, NegotiationError>> + Send;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NegotiateResponse {
    connection_token: Option<String>,
    connection_id: Option<String>,
}

/// Negotiator backed by a `reqwest` client with transient-retry middleware.
pub struct HttpNegotiator {
    inner: ClientWithMiddleware,
    url: Url,
    client_protocol: String,
    connection_data: String,
}

impl HttpNegotiator {
    /// Builds the negotiator from the hub configuration.
    ///
    /// # Errors
    /// Returns `NegotiationError::Url` if `negotiate_url` is not an absolute URL,
    /// or `NegotiationError::Body` if the HTTP client cannot be constructed.
    pub fn new(config: &HubConfig) -> Result<Self, NegotiationError> {
        let url = Url::parse(&config.negotiate_url)?;

        let retry_policy =
            ExponentialBackoff::builder().build_with_max_retries(config.negotiate_max_retries);

        let client = reqwest::Client::builder()
            .timeout(config.negotiate_timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        let inner = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            url,
            client_protocol: config.client_protocol.clone(),
            connection_data: config.connection_data(),
        })
    }
}

impl Negotiate for HttpNegotiator {
    async fn negotiate(&self) -> Result<ConnectionCredentials, NegotiationError> {
        log::debug!("Negotiating with {}", self.url);

        let response = self
            .inner
            .get(self.url.clone())
            .query(&[
                ("clientProtocol", self.client_protocol.as_str()),
                ("connectionData", self.connection_data.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NegotiationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let cookie = cookie_from_headers(response.headers());
        let body: NegotiateResponse = response.json().await?;
        let token = token_from_response(body)?;

        log::debug!(
            "Negotiation succeeded (session cookie {})",
            if cookie.is_some() { "present" } else { "absent" }
        );

        Ok(ConnectionCredentials { token, cookie })
    }
}

fn token_from_response(body: NegotiateResponse) -> Result<String, NegotiationError> {
    if let Some(id) = &body.connection_id {
        log::trace!("Negotiated connection id {}", id);
    }
    body.connection_token
        .filter(|token| !token.is_empty())
        .ok_or(NegotiationError::MissingToken)
}

/// Turns every `Set-Cookie` header into a single `Cookie` request value,
/// keeping only the `name=value` pair of each and dropping attributes such as
/// `Path` or `HttpOnly`.
pub(crate) fn cookie_from_headers(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| raw.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn cookie_keeps_only_name_value_pairs() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("ARRAffinity=abc123; Path=/; HttpOnly; Domain=livetiming"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("session=xyz; Secure"));

        assert_eq!(
            cookie_from_headers(&headers).as_deref(),
            Some("ARRAffinity=abc123; session=xyz")
        );
    }

    #[test]
    fn missing_cookie_is_not_an_error() {
        assert_eq!(cookie_from_headers(&HeaderMap::new()), None);
    }

    #[test]
    fn token_is_required() {
        let body: NegotiateResponse =
            serde_json::from_str(r#"{"Url":"/signalr","ConnectionId":"c-1"}"#).unwrap();
        assert!(matches!(
            token_from_response(body),
            Err(NegotiationError::MissingToken)
        ));

        let body: NegotiateResponse =
            serde_json::from_str(r#"{"ConnectionToken":"","ConnectionId":"c-1"}"#).unwrap();
        assert!(matches!(
            token_from_response(body),
            Err(NegotiationError::MissingToken)
        ));
    }

    #[test]
    fn token_is_extracted() {
        let body: NegotiateResponse = serde_json::from_str(
            r#"{"ConnectionToken":"T1","ConnectionId":"c-1","ProtocolVersion":"1.5"}"#,
        )
        .unwrap();
        assert_eq!(token_from_response(body).unwrap(), "T1");
    }

    #[test]
    fn invalid_url_is_rejected() {
        let config = HubConfig {
            negotiate_url: "not a url".to_string(),
            ..HubConfig::default()
        };
        assert!(matches!(
            HttpNegotiator::new(&config),
            Err(NegotiationError::Url(_))
        ));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = ConnectionCredentials {
            token: "secret-token".to_string(),
            cookie: Some("session=xyz".to_string()),
        };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret-token"));
        assert!(!printed.contains("xyz"));
    }
}
